// Copyright (C) 2015-2025 The Neo Project.
//
// models.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! Typed views over Neo N3 RPC payloads.

use crate::error::ChainError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nsl_core::{UInt160, UInt256};
use serde_json::Value;
use std::fmt;

/// VM halting state reported by `invokescript` and application logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Halt,
    Fault,
    Break,
    None,
}

impl VmState {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "HALT" => VmState::Halt,
            "FAULT" => VmState::Fault,
            "BREAK" => VmState::Break,
            _ => VmState::None,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmState::Halt => "HALT",
            VmState::Fault => "FAULT",
            VmState::Break => "BREAK",
            VmState::None => "NONE",
        };
        f.write_str(s)
    }
}

/// A VM stack item as rendered in RPC JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackValue {
    Any,
    Boolean(bool),
    Integer(i64),
    ByteString(Vec<u8>),
    Array(Vec<StackValue>),
}

impl StackValue {
    pub fn from_json(value: &Value) -> Result<Self, ChainError> {
        let item_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Decode("stack item without type".into()))?;

        match item_type {
            "Any" => Ok(StackValue::Any),
            "Boolean" => {
                let b = value
                    .get("value")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| ChainError::Decode("Boolean without bool value".into()))?;
                Ok(StackValue::Boolean(b))
            }
            "Integer" => {
                let raw = value
                    .get("value")
                    .ok_or_else(|| ChainError::Decode("Integer without value".into()))?;
                let parsed = match raw {
                    Value::String(s) => s
                        .parse::<i64>()
                        .map_err(|e| ChainError::Decode(format!("integer {s}: {e}")))?,
                    Value::Number(n) => n
                        .as_i64()
                        .ok_or_else(|| ChainError::Decode(format!("integer out of range: {n}")))?,
                    other => {
                        return Err(ChainError::Decode(format!("integer value: {other}")));
                    }
                };
                Ok(StackValue::Integer(parsed))
            }
            "ByteString" | "Buffer" => {
                let encoded = value
                    .get("value")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let bytes = BASE64
                    .decode(encoded)
                    .map_err(|e| ChainError::Decode(format!("bytestring base64: {e}")))?;
                Ok(StackValue::ByteString(bytes))
            }
            "Array" | "Struct" => {
                let items = value
                    .get("value")
                    .and_then(Value::as_array)
                    .ok_or_else(|| ChainError::Decode("Array without items".into()))?;
                let parsed = items
                    .iter()
                    .map(StackValue::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(StackValue::Array(parsed))
            }
            other => Err(ChainError::Decode(format!("unsupported stack type: {other}"))),
        }
    }

    /// JSON rendering matching the RPC wire form.
    pub fn to_json(&self) -> Value {
        match self {
            StackValue::Any => serde_json::json!({ "type": "Any" }),
            StackValue::Boolean(b) => serde_json::json!({ "type": "Boolean", "value": b }),
            StackValue::Integer(i) => {
                serde_json::json!({ "type": "Integer", "value": i.to_string() })
            }
            StackValue::ByteString(bytes) => {
                serde_json::json!({ "type": "ByteString", "value": BASE64.encode(bytes) })
            }
            StackValue::Array(items) => serde_json::json!({
                "type": "Array",
                "value": items.iter().map(StackValue::to_json).collect::<Vec<_>>(),
            }),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StackValue::Integer(i) => Some(*i),
            StackValue::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_int().and_then(|i| u64::try_from(i).ok())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StackValue::Boolean(b) => Some(*b),
            StackValue::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            StackValue::ByteString(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_utf8(&self) -> Option<String> {
        self.as_bytes()
            .and_then(|b| String::from_utf8(b.to_vec()).ok())
    }

    /// Interprets byte content, or an integer's decimal rendering, as a
    /// string. Contracts emit both forms for identifier fields.
    pub fn as_text(&self) -> Option<String> {
        match self {
            StackValue::ByteString(_) => self.as_utf8(),
            StackValue::Integer(i) => Some(i.to_string()),
            _ => None,
        }
    }

    pub fn as_uint160(&self) -> Option<UInt160> {
        self.as_bytes().and_then(|b| UInt160::from_bytes(b).ok())
    }

    pub fn as_uint256(&self) -> Option<UInt256> {
        self.as_bytes().and_then(|b| UInt256::from_bytes(b).ok())
    }

    pub fn as_array(&self) -> Option<&[StackValue]> {
        match self {
            StackValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// One contract notification inside an execution.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcNotification {
    pub contract: UInt160,
    pub event_name: String,
    pub state: Vec<StackValue>,
}

impl RpcNotification {
    pub fn from_json(value: &Value) -> Result<Self, ChainError> {
        let contract = value
            .get("contract")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Decode("notification without contract".into()))?;
        let event_name = value
            .get("eventname")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Decode("notification without eventname".into()))?;
        let state = value
            .get("state")
            .map(StackValue::from_json)
            .transpose()?
            .unwrap_or(StackValue::Array(Vec::new()));

        let fields = match state {
            StackValue::Array(items) => items,
            other => vec![other],
        };

        Ok(Self {
            contract: UInt160::parse(contract).map_err(|e| ChainError::Decode(e.to_string()))?,
            event_name: event_name.to_string(),
            state: fields,
        })
    }
}

/// One execution inside an application log.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcExecution {
    pub trigger: String,
    pub vm_state: VmState,
    pub exception: Option<String>,
    pub gas_consumed: i64,
    pub notifications: Vec<RpcNotification>,
}

impl RpcExecution {
    pub fn from_json(value: &Value) -> Result<Self, ChainError> {
        let trigger = value
            .get("trigger")
            .and_then(Value::as_str)
            .unwrap_or("Application")
            .to_string();
        let vm_state = value
            .get("vmstate")
            .and_then(Value::as_str)
            .map(VmState::parse)
            .ok_or_else(|| ChainError::Decode("execution without vmstate".into()))?;
        let exception = value
            .get("exception")
            .and_then(Value::as_str)
            .map(str::to_string);
        let gas_consumed = parse_gas(value.get("gasconsumed"))?;
        let notifications = value
            .get("notifications")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(RpcNotification::from_json)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            trigger,
            vm_state,
            exception,
            gas_consumed,
            notifications,
        })
    }
}

/// Application log for one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcApplicationLog {
    pub tx_hash: UInt256,
    pub executions: Vec<RpcExecution>,
}

impl RpcApplicationLog {
    pub fn from_json(value: &Value) -> Result<Self, ChainError> {
        let txid = value
            .get("txid")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Decode("application log without txid".into()))?;
        let executions = value
            .get("executions")
            .and_then(Value::as_array)
            .ok_or_else(|| ChainError::Decode("application log without executions".into()))?
            .iter()
            .map(RpcExecution::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            tx_hash: UInt256::parse(txid).map_err(|e| ChainError::Decode(e.to_string()))?,
            executions,
        })
    }

    /// The application-trigger execution, when present.
    pub fn application_execution(&self) -> Option<&RpcExecution> {
        self.executions
            .iter()
            .find(|e| e.trigger.eq_ignore_ascii_case("Application"))
            .or_else(|| self.executions.first())
    }
}

/// `invokescript` result.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcInvokeResult {
    pub state: VmState,
    pub gas_consumed: i64,
    pub exception: Option<String>,
    pub stack: Vec<StackValue>,
}

impl RpcInvokeResult {
    pub fn from_json(value: &Value) -> Result<Self, ChainError> {
        let state = value
            .get("state")
            .and_then(Value::as_str)
            .map(VmState::parse)
            .ok_or_else(|| ChainError::Decode("invoke result without state".into()))?;
        let gas_consumed = parse_gas(value.get("gasconsumed"))?;
        let exception = value
            .get("exception")
            .and_then(Value::as_str)
            .map(str::to_string);
        let stack = value
            .get("stack")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(StackValue::from_json)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            state,
            gas_consumed,
            exception,
            stack,
        })
    }
}

/// Block header fields plus the transaction hashes in chain order.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSummary {
    pub hash: UInt256,
    pub index: u32,
    pub time_ms: u64,
    pub tx_hashes: Vec<UInt256>,
}

impl BlockSummary {
    pub fn from_json(value: &Value) -> Result<Self, ChainError> {
        let hash = value
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Decode("block without hash".into()))?;
        let index = value
            .get("index")
            .and_then(Value::as_u64)
            .ok_or_else(|| ChainError::Decode("block without index".into()))?;
        let time_ms = value.get("time").and_then(Value::as_u64).unwrap_or(0);
        let tx_hashes = value
            .get("tx")
            .and_then(Value::as_array)
            .map(|txs| {
                txs.iter()
                    .map(|tx| {
                        let hash = tx
                            .get("hash")
                            .and_then(Value::as_str)
                            .ok_or_else(|| ChainError::Decode("tx without hash".into()))?;
                        UInt256::parse(hash).map_err(|e| ChainError::Decode(e.to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            hash: UInt256::parse(hash).map_err(|e| ChainError::Decode(e.to_string()))?,
            index: index as u32,
            time_ms,
            tx_hashes,
        })
    }
}

/// `gasconsumed` arrives as a decimal string of GAS fractions.
fn parse_gas(value: Option<&Value>) -> Result<i64, ChainError> {
    match value {
        None => Ok(0),
        Some(Value::String(s)) => s
            .parse::<i64>()
            .map_err(|e| ChainError::Decode(format!("gasconsumed {s}: {e}"))),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| ChainError::Decode(format!("gasconsumed out of range: {n}"))),
        Some(other) => Err(ChainError::Decode(format!("gasconsumed: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_value_json_round_trip() {
        let original = StackValue::Array(vec![
            StackValue::Integer(42),
            StackValue::ByteString(b"hello".to_vec()),
            StackValue::Boolean(true),
            StackValue::Any,
        ]);
        let decoded = StackValue::from_json(&original.to_json()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn notification_parses_rpc_shape() {
        let json: Value = serde_json::from_str(
            r#"{
                "contract": "0xd2a4cff31913016155e38e474a2c06d08be276cf",
                "eventname": "ServiceRequested",
                "state": {"type":"Array","value":[
                    {"type":"Integer","value":"42"},
                    {"type":"ByteString","value":"YXBw"}
                ]}
            }"#,
        )
        .unwrap();

        let notification = RpcNotification::from_json(&json).unwrap();
        assert_eq!(notification.event_name, "ServiceRequested");
        assert_eq!(notification.state.len(), 2);
        assert_eq!(notification.state[0].as_u64(), Some(42));
        assert_eq!(notification.state[1].as_utf8().as_deref(), Some("app"));
    }

    #[test]
    fn application_log_parses_fault_execution() {
        let json: Value = serde_json::from_str(&format!(
            r#"{{
                "txid": "0x{}",
                "executions": [{{
                    "trigger": "Application",
                    "vmstate": "FAULT",
                    "exception": "nonce_used",
                    "gasconsumed": "997750",
                    "notifications": []
                }}]
            }}"#,
            "ab".repeat(32)
        ))
        .unwrap();

        let log = RpcApplicationLog::from_json(&json).unwrap();
        let exec = log.application_execution().unwrap();
        assert_eq!(exec.vm_state, VmState::Fault);
        assert_eq!(exec.exception.as_deref(), Some("nonce_used"));
        assert_eq!(exec.gas_consumed, 997750);
    }

    #[test]
    fn invoke_result_parses_stack() {
        let json: Value = serde_json::from_str(
            r#"{
                "state": "HALT",
                "gasconsumed": "1998520",
                "exception": null,
                "stack": [{"type":"Integer","value":"7"}]
            }"#,
        )
        .unwrap();
        let result = RpcInvokeResult::from_json(&json).unwrap();
        assert_eq!(result.state, VmState::Halt);
        assert_eq!(result.stack[0].as_int(), Some(7));
    }

    #[test]
    fn block_summary_collects_tx_hashes() {
        let json: Value = serde_json::from_str(&format!(
            r#"{{
                "hash": "0x{}",
                "index": 120,
                "time": 1700000000000,
                "tx": [{{"hash": "0x{}"}}, {{"hash": "0x{}"}}]
            }}"#,
            "01".repeat(32),
            "02".repeat(32),
            "03".repeat(32)
        ))
        .unwrap();
        let block = BlockSummary::from_json(&json).unwrap();
        assert_eq!(block.index, 120);
        assert_eq!(block.tx_hashes.len(), 2);
    }

    #[test]
    fn integer_out_of_byte_context_is_rejected() {
        let json = serde_json::json!({"type": "Integer", "value": "not-a-number"});
        assert!(StackValue::from_json(&json).is_err());
    }
}
