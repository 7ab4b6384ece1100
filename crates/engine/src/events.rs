//! Positional decoding of contract notifications into typed events.
//!
//! Schemas are fixed per event name. Unknown names are dropped (counted,
//! not logged per event); a known name with the wrong arity or field types
//! is a decode error the listener logs and skips.

use crate::error::EngineError;
use nsl_chain::{RpcNotification, StackValue};
use nsl_core::events::*;
use nsl_core::{ChainEvent, ServiceKind, UInt256};
use std::str::FromStr;

fn field<'a>(
    name: &str,
    state: &'a [StackValue],
    index: usize,
) -> Result<&'a StackValue, EngineError> {
    state.get(index).ok_or_else(|| EngineError::EventDecode {
        name: name.to_string(),
        detail: format!("missing field {index}"),
    })
}

fn decode_err(name: &str, index: usize, what: &str) -> EngineError {
    EngineError::EventDecode {
        name: name.to_string(),
        detail: format!("field {index}: expected {what}"),
    }
}

fn expect_arity(name: &str, state: &[StackValue], arity: usize) -> Result<(), EngineError> {
    if state.len() != arity {
        return Err(EngineError::EventDecode {
            name: name.to_string(),
            detail: format!("{} fields, expected {arity}", state.len()),
        });
    }
    Ok(())
}

/// Decodes one notification. `Ok(None)` means the event name is not ours.
pub fn decode_notification(
    notification: &RpcNotification,
) -> Result<Option<ChainEvent>, EngineError> {
    let name = notification.event_name.as_str();
    let state = &notification.state;

    let event = match name {
        EVENT_SERVICE_REQUESTED => {
            expect_arity(name, state, 7)?;
            let kind_field = field(name, state, 2)?;
            let kind = match kind_field {
                StackValue::Integer(code) => {
                    ServiceKind::from_type_code(*code).map_err(|e| EngineError::EventDecode {
                        name: name.to_string(),
                        detail: e.to_string(),
                    })?
                }
                other => {
                    let text = other
                        .as_utf8()
                        .ok_or_else(|| decode_err(name, 2, "service kind"))?;
                    ServiceKind::from_str(&text).map_err(|e| EngineError::EventDecode {
                        name: name.to_string(),
                        detail: e.to_string(),
                    })?
                }
            };
            ChainEvent::ServiceRequested(ServiceRequestedEvent {
                request_id: field(name, state, 0)?
                    .as_u64()
                    .ok_or_else(|| decode_err(name, 0, "request id"))?,
                app_id: field(name, state, 1)?
                    .as_text()
                    .ok_or_else(|| decode_err(name, 1, "app id"))?,
                kind,
                requester: field(name, state, 3)?
                    .as_uint160()
                    .ok_or_else(|| decode_err(name, 3, "requester hash"))?,
                callback_contract: field(name, state, 4)?
                    .as_uint160()
                    .ok_or_else(|| decode_err(name, 4, "callback contract"))?,
                callback_method: field(name, state, 5)?
                    .as_utf8()
                    .ok_or_else(|| decode_err(name, 5, "callback method"))?,
                payload: field(name, state, 6)?
                    .as_bytes()
                    .ok_or_else(|| decode_err(name, 6, "payload bytes"))?
                    .to_vec(),
            })
        }
        EVENT_SERVICE_FULFILLED => {
            expect_arity(name, state, 4)?;
            ChainEvent::ServiceFulfilled(ServiceFulfilledEvent {
                request_id: field(name, state, 0)?
                    .as_u64()
                    .ok_or_else(|| decode_err(name, 0, "request id"))?,
                success: field(name, state, 1)?
                    .as_bool()
                    .ok_or_else(|| decode_err(name, 1, "success flag"))?,
                result: field(name, state, 2)?
                    .as_bytes()
                    .unwrap_or_default()
                    .to_vec(),
                error: field(name, state, 3)?.as_utf8().unwrap_or_default(),
            })
        }
        EVENT_PAYMENT_RECEIVED => {
            expect_arity(name, state, 5)?;
            ChainEvent::PaymentReceived(PaymentReceivedEvent {
                payment_id: field(name, state, 0)?
                    .as_u64()
                    .ok_or_else(|| decode_err(name, 0, "payment id"))?,
                app_id: field(name, state, 1)?
                    .as_text()
                    .ok_or_else(|| decode_err(name, 1, "app id"))?,
                sender: field(name, state, 2)?
                    .as_uint160()
                    .ok_or_else(|| decode_err(name, 2, "sender"))?,
                amount: field(name, state, 3)?
                    .as_u64()
                    .ok_or_else(|| decode_err(name, 3, "amount"))?,
                memo: field(name, state, 4)?.as_utf8().unwrap_or_default(),
            })
        }
        EVENT_RANDOMNESS_RECORDED => {
            expect_arity(name, state, 4)?;
            ChainEvent::RandomnessRecorded(RandomnessRecordedEvent {
                request_id: field(name, state, 0)?
                    .as_u64()
                    .ok_or_else(|| decode_err(name, 0, "request id"))?,
                randomness: field(name, state, 1)?
                    .as_bytes()
                    .ok_or_else(|| decode_err(name, 1, "randomness"))?
                    .to_vec(),
                attestation_hash: field(name, state, 2)?
                    .as_uint256()
                    .unwrap_or_else(UInt256::zero),
                timestamp: field(name, state, 3)?
                    .as_u64()
                    .ok_or_else(|| decode_err(name, 3, "timestamp"))?,
            })
        }
        EVENT_PRICE_UPDATED => {
            expect_arity(name, state, 6)?;
            ChainEvent::PriceUpdated(PriceUpdatedEvent {
                symbol: field(name, state, 0)?
                    .as_text()
                    .ok_or_else(|| decode_err(name, 0, "symbol"))?,
                round_id: field(name, state, 1)?
                    .as_u64()
                    .ok_or_else(|| decode_err(name, 1, "round id"))?,
                price: field(name, state, 2)?
                    .as_u64()
                    .ok_or_else(|| decode_err(name, 2, "price"))?,
                timestamp: field(name, state, 3)?
                    .as_u64()
                    .ok_or_else(|| decode_err(name, 3, "timestamp"))?,
                attestation_hash: field(name, state, 4)?
                    .as_uint256()
                    .unwrap_or_else(UInt256::zero),
                source_set_id: field(name, state, 5)?
                    .as_bytes()
                    .unwrap_or_default()
                    .to_vec(),
            })
        }
        _ => return Ok(None),
    };

    Ok(Some(event))
}

/// Encodes a typed event into its notification stack form. Inverse of
/// [`decode_notification`]; the test chain and fixtures build
/// notifications through this.
pub fn encode_event(event: &ChainEvent) -> Vec<StackValue> {
    match event {
        ChainEvent::ServiceRequested(e) => vec![
            StackValue::Integer(e.request_id as i64),
            StackValue::ByteString(e.app_id.as_bytes().to_vec()),
            StackValue::Integer(e.kind.type_code() as i64),
            StackValue::ByteString(e.requester.as_bytes().to_vec()),
            StackValue::ByteString(e.callback_contract.as_bytes().to_vec()),
            StackValue::ByteString(e.callback_method.as_bytes().to_vec()),
            StackValue::ByteString(e.payload.clone()),
        ],
        ChainEvent::ServiceFulfilled(e) => vec![
            StackValue::Integer(e.request_id as i64),
            StackValue::Boolean(e.success),
            StackValue::ByteString(e.result.clone()),
            StackValue::ByteString(e.error.as_bytes().to_vec()),
        ],
        ChainEvent::PaymentReceived(e) => vec![
            StackValue::Integer(e.payment_id as i64),
            StackValue::ByteString(e.app_id.as_bytes().to_vec()),
            StackValue::ByteString(e.sender.as_bytes().to_vec()),
            StackValue::Integer(e.amount as i64),
            StackValue::ByteString(e.memo.as_bytes().to_vec()),
        ],
        ChainEvent::RandomnessRecorded(e) => vec![
            StackValue::Integer(e.request_id as i64),
            StackValue::ByteString(e.randomness.clone()),
            StackValue::ByteString(e.attestation_hash.as_bytes().to_vec()),
            StackValue::Integer(e.timestamp as i64),
        ],
        ChainEvent::PriceUpdated(e) => vec![
            StackValue::ByteString(e.symbol.as_bytes().to_vec()),
            StackValue::Integer(e.round_id as i64),
            StackValue::Integer(e.price as i64),
            StackValue::Integer(e.timestamp as i64),
            StackValue::ByteString(e.attestation_hash.as_bytes().to_vec()),
            StackValue::ByteString(e.source_set_id.clone()),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsl_core::UInt160;

    fn notification(event_name: &str, state: Vec<StackValue>) -> RpcNotification {
        RpcNotification {
            contract: UInt160::zero(),
            event_name: event_name.to_string(),
            state,
        }
    }

    fn sample_requested() -> ChainEvent {
        ChainEvent::ServiceRequested(ServiceRequestedEvent {
            request_id: 42,
            app_id: "weather-app".into(),
            kind: ServiceKind::Oracle,
            requester: UInt160::parse("0xd2a4cff31913016155e38e474a2c06d08be276cf").unwrap(),
            callback_contract: UInt160::parse("0x1f4e89dfc5f1d1af5a1d4e97a3d5e3bf20c0aabc")
                .unwrap(),
            callback_method: "onOracleResult".into(),
            payload: br#"{"url":"https://allowed.example/api","json_path":"$.price"}"#.to_vec(),
        })
    }

    #[test]
    fn decode_inverts_encode_for_every_kind() {
        let events = vec![
            sample_requested(),
            ChainEvent::ServiceFulfilled(ServiceFulfilledEvent {
                request_id: 42,
                success: true,
                result: b"12345".to_vec(),
                error: String::new(),
            }),
            ChainEvent::PaymentReceived(PaymentReceivedEvent {
                payment_id: 9,
                app_id: "app".into(),
                sender: UInt160::zero(),
                amount: 1_0000_0000,
                memo: "deposit".into(),
            }),
            ChainEvent::RandomnessRecorded(RandomnessRecordedEvent {
                request_id: 44,
                randomness: vec![7u8; 32],
                attestation_hash: UInt256::parse(&"aa".repeat(32)).unwrap(),
                timestamp: 1_700_000_000,
            }),
            ChainEvent::PriceUpdated(PriceUpdatedEvent {
                symbol: "BTC-USD".into(),
                round_id: 12,
                price: 50_000_0000_0000,
                timestamp: 1_700_000_000,
                attestation_hash: UInt256::parse(&"bb".repeat(32)).unwrap(),
                source_set_id: vec![1, 2, 3],
            }),
        ];

        for event in events {
            let n = notification(event.name(), encode_event(&event));
            let decoded = decode_notification(&n).unwrap().unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn unknown_event_name_is_dropped() {
        let n = notification("Transfer", vec![StackValue::Integer(1)]);
        assert!(decode_notification(&n).unwrap().is_none());
    }

    #[test]
    fn wrong_arity_is_a_decode_error() {
        let n = notification(EVENT_SERVICE_REQUESTED, vec![StackValue::Integer(1)]);
        assert!(matches!(
            decode_notification(&n),
            Err(EngineError::EventDecode { .. })
        ));
    }

    #[test]
    fn service_kind_accepts_name_form() {
        let mut state = encode_event(&sample_requested());
        state[2] = StackValue::ByteString(b"oracle".to_vec());
        let n = notification(EVENT_SERVICE_REQUESTED, state);
        match decode_notification(&n).unwrap().unwrap() {
            ChainEvent::ServiceRequested(e) => assert_eq!(e.kind, ServiceKind::Oracle),
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn negative_request_id_is_rejected() {
        let mut state = encode_event(&sample_requested());
        state[0] = StackValue::Integer(-1);
        let n = notification(EVENT_SERVICE_REQUESTED, state);
        assert!(decode_notification(&n).is_err());
    }
}
