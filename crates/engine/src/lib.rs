//! Request/response coordination engine for the Neo N3 TEE service layer.
//!
//! The engine watches a gateway contract for service requests, executes
//! them inside per-kind handlers against the attested signer, and writes
//! signed results back on chain with exactly-once semantics built from
//! registry leases and per-key-version nonces. Periodic loops push
//! data-feed updates and evaluate automation triggers. Everything is
//! owned by a single [`Engine`] value with an explicit start/stop
//! lifecycle.

pub mod automation;
pub mod datafeed;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handlers;
pub mod listener;
pub mod metrics;
pub mod nonce;
pub mod registry;
pub mod submitter;
pub mod supervisor;

pub use automation::TriggerScheduler;
pub use datafeed::{FeedScheduler, PriceSnapshot};
pub use dispatcher::Dispatcher;
pub use error::EngineError;
pub use events::{decode_notification, encode_event};
pub use handlers::randomness::{derive_randomness, verify_proof};
pub use handlers::{Allowlist, HandlerSet};
pub use listener::{EventListener, ListenerConfig};
pub use metrics::Metrics;
pub use nonce::NonceStore;
pub use registry::{CompleteOutcome, Lease, ReleaseResult, RequestRegistry};
pub use submitter::{SubmitError, SubmitReceipt, Submitter};
pub use supervisor::{Engine, ReadinessReport};

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
