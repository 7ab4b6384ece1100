// Copyright (C) 2015-2025 The Neo Project.
//
// request.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! Service request records and the handler outcome taxonomy.

use crate::error::CoreError;
use crate::hash::{UInt160, UInt256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The service kinds the gateway dispatches. The set is closed: adding a
/// kind is a code change, not a runtime registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Oracle,
    Randomness,
    Mixer,
    Confidential,
    Automation,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::Oracle,
        ServiceKind::Randomness,
        ServiceKind::Mixer,
        ServiceKind::Confidential,
        ServiceKind::Automation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Oracle => "oracle",
            ServiceKind::Randomness => "randomness",
            ServiceKind::Mixer => "mixer",
            ServiceKind::Confidential => "confidential",
            ServiceKind::Automation => "automation",
        }
    }

    /// Numeric code used by the gateway contract's `service_type` field.
    pub fn type_code(&self) -> u8 {
        match self {
            ServiceKind::Oracle => 1,
            ServiceKind::Randomness => 2,
            ServiceKind::Mixer => 3,
            ServiceKind::Confidential => 4,
            ServiceKind::Automation => 5,
        }
    }

    pub fn from_type_code(code: i64) -> Result<Self, CoreError> {
        match code {
            1 => Ok(ServiceKind::Oracle),
            2 => Ok(ServiceKind::Randomness),
            3 => Ok(ServiceKind::Mixer),
            4 => Ok(ServiceKind::Confidential),
            5 => Ok(ServiceKind::Automation),
            other => Err(CoreError::UnknownServiceKind(other.to_string())),
        }
    }

    /// Upper bound on the opaque payload carried by a request of this kind.
    /// Oversized payloads fail before any external I/O happens.
    pub fn payload_limit(&self) -> usize {
        match self {
            ServiceKind::Oracle => 8 * 1024,
            ServiceKind::Randomness => 1024,
            ServiceKind::Mixer => 16 * 1024,
            ServiceKind::Confidential => 64 * 1024,
            ServiceKind::Automation => 8 * 1024,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "oracle" => Ok(ServiceKind::Oracle),
            "randomness" | "random" | "vrf" => Ok(ServiceKind::Randomness),
            "mixer" => Ok(ServiceKind::Mixer),
            "confidential" => Ok(ServiceKind::Confidential),
            "automation" => Ok(ServiceKind::Automation),
            other => Err(CoreError::UnknownServiceKind(other.to_string())),
        }
    }
}

/// Lifecycle state of a service request. Terminal states never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InFlight,
    Fulfilled,
    Failed,
    Expired,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Fulfilled | RequestStatus::Failed | RequestStatus::Expired
        )
    }

    /// Single-byte tag used in index keys; pending sorts first.
    pub fn index_tag(&self) -> u8 {
        match self {
            RequestStatus::Pending => 0,
            RequestStatus::InFlight => 1,
            RequestStatus::Fulfilled => 2,
            RequestStatus::Failed => 3,
            RequestStatus::Expired => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InFlight => "in_flight",
            RequestStatus::Fulfilled => "fulfilled",
            RequestStatus::Failed => "failed",
            RequestStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A service request as observed on chain, immutable after ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub request_id: u64,
    pub kind: ServiceKind,
    pub app_id: String,
    pub requester: UInt160,
    pub callback_contract: UInt160,
    pub callback_method: String,
    pub payload: Vec<u8>,
    pub created_at_block: u32,
    pub deadline_block: Option<u32>,
}

/// The persisted row for a request: the chain-observed request plus the
/// registry-owned scheduling state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request: ServiceRequest,
    pub status: RequestStatus,
    pub attempt_count: u32,
    pub panic_count: u32,
    pub leased_by: Option<String>,
    pub lease_id: u64,
    pub leased_until_ms: u64,
    /// Earliest wall-clock instant (unix ms) the row may be claimed again.
    pub not_before_ms: u64,
    pub last_error: Option<String>,
    pub result_hash: Option<UInt256>,
    pub tx_hash: Option<UInt256>,
    pub completed_at_ms: Option<u64>,
}

impl RequestRecord {
    pub fn pending(request: ServiceRequest) -> Self {
        Self {
            request,
            status: RequestStatus::Pending,
            attempt_count: 0,
            panic_count: 0,
            leased_by: None,
            lease_id: 0,
            leased_until_ms: 0,
            not_before_ms: 0,
            last_error: None,
            result_hash: None,
            tx_hash: None,
            completed_at_ms: None,
        }
    }
}

/// Stable, enumerated failure vocabulary. These strings go on chain through
/// `failRequest` and must stay short and free of internal detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    BadRequest,
    PayloadTooLarge,
    UrlNotAllowlisted,
    PathNotFound,
    UpstreamTooLarge,
    UpstreamError,
    UpstreamTimeout,
    SignerUnavailable,
    DecryptFailed,
    FundsInvariantViolated,
    UnknownTrigger,
    DeadlinePast,
    UnknownRequest,
    NonceUsed,
    MaxAttemptsExceeded,
    SubmitExhausted,
    HandlerTimeout,
    RefundDeadline,
    InternalBug,
}

impl FailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailReason::BadRequest => "bad_request",
            FailReason::PayloadTooLarge => "payload_too_large",
            FailReason::UrlNotAllowlisted => "url_not_allowlisted",
            FailReason::PathNotFound => "path_not_found",
            FailReason::UpstreamTooLarge => "upstream_too_large",
            FailReason::UpstreamError => "upstream_error",
            FailReason::UpstreamTimeout => "upstream_timeout",
            FailReason::SignerUnavailable => "signer_unavailable",
            FailReason::DecryptFailed => "decrypt_failed",
            FailReason::FundsInvariantViolated => "funds_invariant_violated",
            FailReason::UnknownTrigger => "unknown_trigger",
            FailReason::DeadlinePast => "deadline_past",
            FailReason::UnknownRequest => "unknown_request",
            FailReason::NonceUsed => "nonce_used",
            FailReason::MaxAttemptsExceeded => "max_attempts_exceeded",
            FailReason::SubmitExhausted => "submit_exhausted",
            FailReason::HandlerTimeout => "handler_timeout",
            FailReason::RefundDeadline => "refund_deadline",
            FailReason::InternalBug => "internal_bug",
        }
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified handler failure. `detail` stays in local logs and the
/// registry row; only `reason` ever reaches the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub reason: FailReason,
    pub detail: Option<String>,
}

impl Failure {
    pub fn of(reason: FailReason) -> Self {
        Self {
            reason,
            detail: None,
        }
    }

    pub fn with_detail(reason: FailReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: Some(detail.into()),
        }
    }

    /// Rendering used for the registry's `last_error` column.
    pub fn log_line(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{}: {}", self.reason, detail),
            None => self.reason.to_string(),
        }
    }
}

/// What a service handler produced. Handlers never talk to the chain or the
/// registry; the dispatcher and submitter act on this value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success(Vec<u8>),
    Transient(Failure),
    Permanent(Failure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_round_trip() {
        for kind in ServiceKind::ALL {
            assert_eq!(
                ServiceKind::from_type_code(kind.type_code() as i64).unwrap(),
                kind
            );
        }
        assert!(ServiceKind::from_type_code(0).is_err());
        assert!(ServiceKind::from_type_code(99).is_err());
    }

    #[test]
    fn kind_parses_common_aliases() {
        assert_eq!("vrf".parse::<ServiceKind>().unwrap(), ServiceKind::Randomness);
        assert_eq!("Oracle".parse::<ServiceKind>().unwrap(), ServiceKind::Oracle);
        assert!("escrow".parse::<ServiceKind>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::InFlight.is_terminal());
        assert!(RequestStatus::Fulfilled.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(RequestStatus::Expired.is_terminal());
    }

    #[test]
    fn index_tags_put_pending_first() {
        assert!(RequestStatus::Pending.index_tag() < RequestStatus::InFlight.index_tag());
    }

    #[test]
    fn fail_reasons_fit_on_chain() {
        let reasons = [
            FailReason::BadRequest,
            FailReason::PayloadTooLarge,
            FailReason::UrlNotAllowlisted,
            FailReason::PathNotFound,
            FailReason::UpstreamTooLarge,
            FailReason::UpstreamError,
            FailReason::UpstreamTimeout,
            FailReason::SignerUnavailable,
            FailReason::DecryptFailed,
            FailReason::FundsInvariantViolated,
            FailReason::UnknownTrigger,
            FailReason::DeadlinePast,
            FailReason::UnknownRequest,
            FailReason::NonceUsed,
            FailReason::MaxAttemptsExceeded,
            FailReason::SubmitExhausted,
            FailReason::HandlerTimeout,
            FailReason::RefundDeadline,
            FailReason::InternalBug,
        ];
        for reason in reasons {
            assert!(reason.as_str().len() <= 64);
            assert!(reason.as_str().is_ascii());
        }
    }

    #[test]
    fn failure_log_line_includes_detail() {
        let failure = Failure::with_detail(FailReason::UpstreamError, "status 404");
        assert_eq!(failure.log_line(), "upstream_error: status 404");
        assert_eq!(Failure::of(FailReason::BadRequest).log_line(), "bad_request");
    }
}
