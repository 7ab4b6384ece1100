// Copyright (C) 2015-2025 The Neo Project.
//
// error.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! Chain client errors and VM fault classification.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("all rpc endpoints failed; last: {last}")]
    AllEndpointsFailed { last: String },

    #[error("decode: {0}")]
    Decode(String),

    #[error("vm fault: {0}")]
    Fault(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization: {0}")]
    Serialization(String),

    #[error("witness: {0}")]
    Witness(String),

    #[error("timed out waiting for execution of {0}")]
    ConfirmationTimeout(String),
}

impl ChainError {
    /// Whether the operation may succeed on retry (possibly against a
    /// different endpoint).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::Transport(_)
                | ChainError::AllEndpointsFailed { .. }
                | ChainError::ConfirmationTimeout(_)
        )
    }
}

/// Recognized revert reasons surfaced by gateway FAULTs. The reason table
/// decides whether a submission retries with a fresh nonce or stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultReason {
    /// The nonce was consumed by an earlier submission; retry fresh.
    NonceUsed,
    /// The gateway does not know the request; permanent.
    UnknownRequest,
    /// The request's deadline has passed on chain; permanent.
    DeadlinePast,
    /// Anything else the contract reported.
    Other(String),
}

impl FaultReason {
    pub fn classify(exception: &str) -> Self {
        let lower = exception.to_ascii_lowercase();
        if lower.contains("nonce_used") || lower.contains("nonce already used") {
            FaultReason::NonceUsed
        } else if lower.contains("unknown_request") || lower.contains("unknown request") {
            FaultReason::UnknownRequest
        } else if lower.contains("deadline_past") || lower.contains("deadline passed") {
            FaultReason::DeadlinePast
        } else {
            FaultReason::Other(exception.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_reason_table() {
        assert_eq!(
            FaultReason::classify("Gateway: nonce_used"),
            FaultReason::NonceUsed
        );
        assert_eq!(
            FaultReason::classify("unknown_request id=9"),
            FaultReason::UnknownRequest
        );
        assert_eq!(
            FaultReason::classify("deadline_past"),
            FaultReason::DeadlinePast
        );
        assert!(matches!(
            FaultReason::classify("stack underflow"),
            FaultReason::Other(_)
        ));
    }

    #[test]
    fn transience_is_transport_scoped() {
        assert!(ChainError::Transport("reset".into()).is_transient());
        assert!(!ChainError::Fault("abort".into()).is_transient());
        assert!(!ChainError::Rpc {
            code: -32602,
            message: "bad params".into()
        }
        .is_transient());
    }
}
