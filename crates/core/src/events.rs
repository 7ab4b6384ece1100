//! Typed chain events.
//!
//! Gateway and per-service contracts surface state through notifications
//! with fixed positional schemas. The listener decodes them into these
//! variants before anything downstream sees them.

use crate::hash::{UInt160, UInt256};
use crate::request::ServiceKind;
use serde::{Deserialize, Serialize};

pub const EVENT_SERVICE_REQUESTED: &str = "ServiceRequested";
pub const EVENT_SERVICE_FULFILLED: &str = "ServiceFulfilled";
pub const EVENT_PAYMENT_RECEIVED: &str = "PaymentReceived";
pub const EVENT_RANDOMNESS_RECORDED: &str = "RandomnessRecorded";
pub const EVENT_PRICE_UPDATED: &str = "PriceUpdated";

/// `ServiceRequested(request_id, app_id, service_type, requester,
/// callback_contract, callback_method, payload)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequestedEvent {
    pub request_id: u64,
    pub app_id: String,
    pub kind: ServiceKind,
    pub requester: UInt160,
    pub callback_contract: UInt160,
    pub callback_method: String,
    pub payload: Vec<u8>,
}

/// `ServiceFulfilled(request_id, success, result, error)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFulfilledEvent {
    pub request_id: u64,
    pub success: bool,
    pub result: Vec<u8>,
    pub error: String,
}

/// `PaymentReceived(payment_id, app_id, sender, amount, memo)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceivedEvent {
    pub payment_id: u64,
    pub app_id: String,
    pub sender: UInt160,
    pub amount: u64,
    pub memo: String,
}

/// `RandomnessRecorded(request_id, randomness, attestation_hash, timestamp)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomnessRecordedEvent {
    pub request_id: u64,
    pub randomness: Vec<u8>,
    pub attestation_hash: UInt256,
    pub timestamp: u64,
}

/// `PriceUpdated(symbol, round_id, price, timestamp, attestation_hash,
/// source_set_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdatedEvent {
    pub symbol: String,
    pub round_id: u64,
    pub price: u64,
    pub timestamp: u64,
    pub attestation_hash: UInt256,
    pub source_set_id: Vec<u8>,
}

/// One decoded notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChainEvent {
    ServiceRequested(ServiceRequestedEvent),
    ServiceFulfilled(ServiceFulfilledEvent),
    PaymentReceived(PaymentReceivedEvent),
    RandomnessRecorded(RandomnessRecordedEvent),
    PriceUpdated(PriceUpdatedEvent),
}

impl ChainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChainEvent::ServiceRequested(_) => EVENT_SERVICE_REQUESTED,
            ChainEvent::ServiceFulfilled(_) => EVENT_SERVICE_FULFILLED,
            ChainEvent::PaymentReceived(_) => EVENT_PAYMENT_RECEIVED,
            ChainEvent::RandomnessRecorded(_) => EVENT_RANDOMNESS_RECORDED,
            ChainEvent::PriceUpdated(_) => EVENT_PRICE_UPDATED,
        }
    }
}

/// A decoded event with its position on the chain. `(tx_hash,
/// notification_index)` identifies a delivery; consumers deduplicate by
/// request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent {
    pub height: u32,
    pub block_hash: UInt256,
    pub tx_hash: UInt256,
    pub notification_index: u32,
    pub contract: UInt160,
    pub event: ChainEvent,
}
