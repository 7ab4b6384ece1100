//! Engine error types.

use nsl_core::RequestStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] nsl_store::StoreError),

    #[error(transparent)]
    Chain(#[from] nsl_chain::ChainError),

    #[error(transparent)]
    Signer(#[from] nsl_signer::SignerError),

    #[error(transparent)]
    Core(#[from] nsl_core::CoreError),

    #[error("codec: {0}")]
    Codec(String),

    #[error("event {name}: {detail}")]
    EventDecode { name: String, detail: String },

    #[error("stale lease for request {request_id}")]
    StaleLease { request_id: u64 },

    #[error("request {request_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        request_id: u64,
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("metrics: {0}")]
    Metrics(String),

    #[error("configuration: {0}")]
    Config(String),
}

impl From<bincode::Error> for EngineError {
    fn from(e: bincode::Error) -> Self {
        EngineError::Codec(e.to_string())
    }
}

impl From<prometheus::Error> for EngineError {
    fn from(e: prometheus::Error) -> Self {
        EngineError::Metrics(e.to_string())
    }
}
