//! Error types for the core domain crate.

use thiserror::Error;

/// Errors produced while decoding or validating domain values.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid hash literal: {0}")]
    InvalidHash(String),

    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidHashLength { expected: usize, actual: usize },

    #[error("unknown service kind: {0}")]
    UnknownServiceKind(String),

    #[error("payload exceeds limit for {kind}: {len} > {max}")]
    PayloadTooLarge {
        kind: &'static str,
        len: usize,
        max: usize,
    },

    #[error("malformed {kind} payload: {detail}")]
    MalformedPayload { kind: &'static str, detail: String },

    #[error("event {name} has {actual} fields, expected {expected}")]
    EventArity {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("event field {index} of {name}: {detail}")]
    EventField {
        name: &'static str,
        index: usize,
        detail: String,
    },
}
