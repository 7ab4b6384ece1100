//! Signer error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("signer rpc: {0}")]
    Rpc(String),

    #[error("signer rpc returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("signer unavailable after {attempts} attempts: {last}")]
    Unavailable { attempts: u32, last: String },

    #[error("attestation unavailable: {0}")]
    Attestation(String),

    #[error("unseal failed: {0}")]
    Unseal(String),
}

impl SignerError {
    /// Whether retrying the signer may help.
    pub fn is_transient(&self) -> bool {
        match self {
            SignerError::Rpc(_) => true,
            SignerError::Status { status, .. } => *status >= 500 || *status == 429,
            SignerError::Unavailable { .. } => true,
            _ => false,
        }
    }
}
