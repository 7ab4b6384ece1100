//! Domain types shared across the Neo N3 service layer.
//!
//! This crate defines the vocabulary of the off-chain coordination engine:
//! request and trigger records, typed per-kind payloads, typed chain events,
//! the handler outcome taxonomy, and the canonical byte encodings that every
//! attested signature covers.

pub mod encoding;
pub mod error;
pub mod events;
pub mod hash;
pub mod payload;
pub mod request;
pub mod trigger;

pub use encoding::{
    canonical_fulfillment, domain_message, feed_update_message, mixer_claim_message, sha256,
    sha256_hash, vrf_seed_message, DOMAIN_FEED_UPDATE, DOMAIN_FULFILL, DOMAIN_MIXER_CLAIM,
    DOMAIN_TX_WITNESS, DOMAIN_VRF,
};
pub use error::CoreError;
pub use events::{
    ChainEvent, DecodedEvent, PaymentReceivedEvent, PriceUpdatedEvent, RandomnessRecordedEvent,
    ServiceFulfilledEvent, ServiceRequestedEvent,
};
pub use hash::{UInt160, UInt256};
pub use payload::{
    AutomationAction, ConfidentialOp, ConfidentialPayload, MixerPayload, OraclePayload,
    RandomnessPayload, RequestPayload,
};
pub use request::{
    FailReason, Failure, HandlerOutcome, RequestRecord, RequestStatus, ServiceKind, ServiceRequest,
};
pub use trigger::{Direction, TriggerCondition, TriggerRecord, TriggerStatus};
