//! Minimal JSONPath subset for oracle extraction.
//!
//! Supports `$`, dot members (`$.a.b`), quoted members (`$["a b"]`), and
//! array indexing (`$.list[0]`). That covers the paths user contracts
//! actually send; anything fancier is a malformed request.

use serde_json::Value;

/// One parsed path step.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Member(String),
    Index(usize),
}

fn parse(path: &str) -> Option<Vec<Step>> {
    let mut rest = path.trim();
    rest = rest.strip_prefix('$').unwrap_or(rest);

    let mut steps = Vec::new();
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('.') {
            let end = stripped
                .find(['.', '['])
                .unwrap_or(stripped.len());
            let name = &stripped[..end];
            if name.is_empty() {
                return None;
            }
            steps.push(Step::Member(name.to_string()));
            rest = &stripped[end..];
        } else if let Some(stripped) = rest.strip_prefix('[') {
            let end = stripped.find(']')?;
            let token = stripped[..end].trim();
            if let Some(quoted) = token
                .strip_prefix('"')
                .and_then(|t| t.strip_suffix('"'))
                .or_else(|| token.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
            {
                steps.push(Step::Member(quoted.to_string()));
            } else {
                steps.push(Step::Index(token.parse().ok()?));
            }
            rest = &stripped[end + 1..];
        } else {
            // Bare leading member, e.g. `price` or `data.price`.
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            steps.push(Step::Member(rest[..end].to_string()));
            rest = &rest[end..];
        }
    }
    Some(steps)
}

/// Evaluates a path against a document. `None` for unsupported syntax or
/// a missing location.
pub fn evaluate<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let steps = parse(path)?;
    let mut current = root;
    for step in steps {
        current = match step {
            Step::Member(name) => current.get(name.as_str())?,
            Step::Index(index) => current.get(index)?,
        };
    }
    Some(current)
}

/// Renders a scalar as result bytes. `None` for arrays and objects.
pub fn scalar_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Number(n) => Some(n.to_string().into_bytes()),
        Value::Bool(b) => Some(b.to_string().into_bytes()),
        Value::Null => Some(b"null".to_vec()),
        Value::Array(_) | Value::Object(_) => None,
    }
}
