//! Oracle handler: allowlisted HTTP fetch plus JSONPath extraction.

use crate::handlers::json_path;
use crate::handlers::ServiceHandler;
use async_trait::async_trait;
use nsl_core::{FailReason, Failure, HandlerOutcome, RequestPayload, ServiceRequest};
use reqwest::Method;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Boot-time host allowlist: exact hosts, or prefixes written with a
/// trailing dot (`"api."` matches `api.example.com`).
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: Vec<String>,
}

impl Allowlist {
    pub fn new(entries: Vec<String>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| e.trim().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.entries.iter().any(|entry| {
            if entry.ends_with('.') {
                host.starts_with(entry.as_str())
            } else {
                host == *entry
            }
        })
    }
}

pub struct OracleHandler {
    http: reqwest::Client,
    allowlist: Allowlist,
    http_timeout: Duration,
}

impl OracleHandler {
    pub fn new(allowlist: Allowlist, http_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self {
            http,
            allowlist,
            http_timeout,
        }
    }
}

#[async_trait]
impl ServiceHandler for OracleHandler {
    async fn handle(&self, request: &ServiceRequest, payload: &RequestPayload) -> HandlerOutcome {
        let RequestPayload::Oracle(oracle) = payload else {
            return HandlerOutcome::Permanent(Failure::with_detail(
                FailReason::BadRequest,
                "payload kind mismatch",
            ));
        };

        let url = match Url::parse(&oracle.url) {
            Ok(url) => url,
            Err(e) => {
                return HandlerOutcome::Permanent(Failure::with_detail(
                    FailReason::BadRequest,
                    format!("url: {e}"),
                ))
            }
        };
        if !matches!(url.scheme(), "http" | "https") {
            return HandlerOutcome::Permanent(Failure::with_detail(
                FailReason::BadRequest,
                format!("scheme {}", url.scheme()),
            ));
        }
        let Some(host) = url.host_str() else {
            return HandlerOutcome::Permanent(Failure::with_detail(
                FailReason::BadRequest,
                "url without host",
            ));
        };
        // Entries may pin a port (`host:port`) or cover the bare host.
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        if !self.allowlist.matches(host) && !self.allowlist.matches(&authority) {
            return HandlerOutcome::Permanent(Failure::of(FailReason::UrlNotAllowlisted));
        }

        let method = match oracle.method.to_ascii_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            other => {
                return HandlerOutcome::Permanent(Failure::with_detail(
                    FailReason::BadRequest,
                    format!("method {other}"),
                ))
            }
        };

        let mut builder = self
            .http
            .request(method, url)
            .timeout(self.http_timeout);
        for (name, value) in &oracle.headers {
            builder = builder.header(name, value);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return HandlerOutcome::Transient(Failure::with_detail(
                    FailReason::UpstreamTimeout,
                    e.to_string(),
                ))
            }
            Err(e) => {
                return HandlerOutcome::Transient(Failure::with_detail(
                    FailReason::UpstreamError,
                    e.to_string(),
                ))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let failure = Failure::with_detail(FailReason::UpstreamError, format!("status {status}"));
            // Rate limits and 5xx retry; other 4xx have stable semantics.
            return if status.as_u16() == 429
                || status.as_u16() == 408
                || status.is_server_error()
            {
                HandlerOutcome::Transient(failure)
            } else {
                HandlerOutcome::Permanent(failure)
            };
        }

        // Stream the body under the per-request cap.
        let mut body: Vec<u8> = Vec::new();
        let mut stream = response;
        loop {
            match stream.chunk().await {
                Ok(Some(chunk)) => {
                    if body.len() + chunk.len() > oracle.max_bytes {
                        return HandlerOutcome::Transient(Failure::of(
                            FailReason::UpstreamTooLarge,
                        ));
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    return HandlerOutcome::Transient(Failure::with_detail(
                        FailReason::UpstreamError,
                        e.to_string(),
                    ))
                }
            }
        }

        let document: serde_json::Value = match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                return HandlerOutcome::Permanent(Failure::with_detail(
                    FailReason::UpstreamError,
                    format!("body is not json: {e}"),
                ))
            }
        };

        let Some(extracted) = json_path::evaluate(&document, &oracle.json_path) else {
            return HandlerOutcome::Permanent(Failure::of(FailReason::PathNotFound));
        };
        let Some(result) = json_path::scalar_bytes(extracted) else {
            return HandlerOutcome::Permanent(Failure::of(FailReason::PathNotFound));
        };

        debug!(
            request_id = request.request_id,
            bytes = result.len(),
            "oracle extraction complete"
        );
        HandlerOutcome::Success(result)
    }
}
