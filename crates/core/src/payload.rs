// Copyright (C) 2015-2025 The Neo Project.
//
// payload.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! Typed per-kind request payloads.
//!
//! The opaque `payload` bytes of a service request carry JSON with a fixed
//! schema per kind. Decoding happens once at ingest; the decoded variant is
//! carried through the dispatcher so handlers never re-parse.

use crate::error::CoreError;
use crate::hash::UInt160;
use crate::request::ServiceKind;
use crate::trigger::TriggerCondition;
use serde::{Deserialize, Serialize};

/// Default cap on an oracle response body.
pub const DEFAULT_ORACLE_MAX_BYTES: usize = 2 * 1024 * 1024;

/// Hard cap on requested VRF output words.
pub const MAX_VRF_WORDS: u32 = 256;

fn default_method() -> String {
    "GET".to_string()
}

fn default_num_words() -> u32 {
    1
}

fn default_oracle_max_bytes() -> usize {
    DEFAULT_ORACLE_MAX_BYTES
}

/// Oracle HTTP fetch parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OraclePayload {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub json_path: String,
    #[serde(default = "default_oracle_max_bytes")]
    pub max_bytes: usize,
}

/// Verifiable randomness parameters. `seed` is hex-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomnessPayload {
    #[serde(with = "hex_bytes")]
    pub seed: Vec<u8>,
    #[serde(default = "default_num_words")]
    pub num_words: u32,
}

/// Mixer coordination phases as they appear at the contract boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum MixerPayload {
    /// Funds were deposited; the handler records the session.
    Deposit { amount: u64, deadline_block: u32 },
    /// TEE-signed release instruction for the deposited funds.
    Claim {
        recipients: Vec<UInt160>,
        amounts: Vec<u64>,
        #[serde(with = "hex_bytes")]
        signature: Vec<u8>,
        key_version: u32,
    },
    /// The TEE reports the session finished.
    Complete,
}

/// The fixed confidential-compute operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidentialOp {
    Aggregate,
    Compare,
    Auction,
    Vote,
}

impl ConfidentialOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidentialOp::Aggregate => "aggregate",
            ConfidentialOp::Compare => "compare",
            ConfidentialOp::Auction => "auction",
            ConfidentialOp::Vote => "vote",
        }
    }
}

/// Confidential compute request: sealed input, one fixed operation, and the
/// key the output is encrypted under when it stays private.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidentialPayload {
    pub operation: ConfidentialOp,
    #[serde(with = "hex_bytes")]
    pub input: Vec<u8>,
    #[serde(default, with = "hex_bytes")]
    pub user_public_key: Vec<u8>,
    #[serde(default)]
    pub output_public: bool,
}

/// Trigger management actions carried by automation-kind requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AutomationAction {
    Register {
        condition: TriggerCondition,
        callback_contract: UInt160,
        callback_method: String,
        #[serde(default)]
        max_executions: Option<u32>,
        #[serde(default)]
        expires_at_ms: Option<u64>,
    },
    Pause { trigger_id: u64 },
    Resume { trigger_id: u64 },
    Cancel { trigger_id: u64 },
}

/// A decoded request payload, one variant per service kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestPayload {
    Oracle(OraclePayload),
    Randomness(RandomnessPayload),
    Mixer(MixerPayload),
    Confidential(ConfidentialPayload),
    Automation(AutomationAction),
}

impl RequestPayload {
    /// Decodes raw payload bytes for the given kind, enforcing the kind's
    /// size limit before touching the content.
    pub fn decode(kind: ServiceKind, bytes: &[u8]) -> Result<Self, CoreError> {
        let max = kind.payload_limit();
        if bytes.len() > max {
            return Err(CoreError::PayloadTooLarge {
                kind: kind.as_str(),
                len: bytes.len(),
                max,
            });
        }

        let malformed = |detail: String| CoreError::MalformedPayload {
            kind: kind.as_str(),
            detail,
        };

        match kind {
            ServiceKind::Oracle => {
                let payload: OraclePayload =
                    serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
                if payload.url.is_empty() {
                    return Err(malformed("empty url".into()));
                }
                if payload.max_bytes == 0 || payload.max_bytes > DEFAULT_ORACLE_MAX_BYTES {
                    return Err(malformed(format!(
                        "max_bytes out of range: {}",
                        payload.max_bytes
                    )));
                }
                Ok(RequestPayload::Oracle(payload))
            }
            ServiceKind::Randomness => {
                let payload: RandomnessPayload =
                    serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
                if payload.num_words == 0 || payload.num_words > MAX_VRF_WORDS {
                    return Err(malformed(format!(
                        "num_words out of range: {}",
                        payload.num_words
                    )));
                }
                Ok(RequestPayload::Randomness(payload))
            }
            ServiceKind::Mixer => {
                let payload: MixerPayload =
                    serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
                if let MixerPayload::Claim {
                    recipients,
                    amounts,
                    ..
                } = &payload
                {
                    if recipients.is_empty() || recipients.len() != amounts.len() {
                        return Err(malformed("recipients/amounts mismatch".into()));
                    }
                }
                Ok(RequestPayload::Mixer(payload))
            }
            ServiceKind::Confidential => {
                let payload: ConfidentialPayload =
                    serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
                if payload.input.is_empty() {
                    return Err(malformed("empty input".into()));
                }
                if !payload.output_public && payload.user_public_key.is_empty() {
                    return Err(malformed("private output requires user_public_key".into()));
                }
                Ok(RequestPayload::Confidential(payload))
            }
            ServiceKind::Automation => {
                let payload: AutomationAction =
                    serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
                Ok(RequestPayload::Automation(payload))
            }
        }
    }
}

/// Hex (de)serialization for byte fields, accepting an optional 0x prefix.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let trimmed = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(trimmed).map_err(serde::de::Error::custom)
    }
}
