//! Mixer coordination handler.
//!
//! Tracks each session through `created → claimed → completed | refunded`
//! at the contract boundary. Claims must carry a signature from the
//! attested TEE key over the release instruction, and outbound amounts can
//! never exceed the deposit plus the posted bond. A supervisor sweep
//! pushes sessions past `deadline + safety_window` onto the refund path.

use crate::error::EngineError;
use crate::handlers::ServiceHandler;
use crate::metrics::Metrics;
use async_trait::async_trait;
use nsl_core::{
    mixer_claim_message, FailReason, Failure, HandlerOutcome, MixerPayload, PaymentReceivedEvent,
    RequestPayload, ServiceRequest, UInt160, DOMAIN_MIXER_CLAIM,
};
use nsl_signer::{verify_signature, ServiceSigner, SharedSigner};
use nsl_store::{Column, SharedStore, Store};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixerState {
    Created,
    Claimed,
    Completed,
    Refunded,
}

/// Persisted mixer session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    pub request_id: u64,
    pub payer: UInt160,
    pub amount: u64,
    pub bond: u64,
    pub deadline_block: u32,
    pub state: MixerState,
    pub outbound_total: u64,
}

fn deposit_key(request_id: u64) -> [u8; 8] {
    request_id.to_be_bytes()
}

fn payment_key(payment_id: u64) -> Vec<u8> {
    let mut key = b"pay:".to_vec();
    key.extend_from_slice(&payment_id.to_be_bytes());
    key
}

pub struct MixerHandler {
    store: SharedStore,
    signer: SharedSigner,
    metrics: Arc<Metrics>,
}

impl MixerHandler {
    pub fn new(store: SharedStore, signer: SharedSigner, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            signer,
            metrics,
        }
    }

    pub fn deposit(&self, request_id: u64) -> Result<Option<DepositRecord>, EngineError> {
        Ok(self
            .store
            .get(Column::Deposits, &deposit_key(request_id))?
            .map(|bytes| bincode::deserialize(&bytes))
            .transpose()?)
    }

    fn put_deposit(&self, record: &DepositRecord) -> Result<(), EngineError> {
        self.store.put(
            Column::Deposits,
            &deposit_key(record.request_id),
            &bincode::serialize(record)?,
        )?;
        Ok(())
    }

    /// Records an observed on-chain payment for audit.
    pub fn record_payment(&self, payment: &PaymentReceivedEvent) -> Result<(), EngineError> {
        self.store.put(
            Column::Deposits,
            &payment_key(payment.payment_id),
            &bincode::serialize(payment)?,
        )?;
        Ok(())
    }

    /// Sessions past `deadline + safety_window` that are not completed;
    /// each is flipped to `refunded` and reported for the on-chain refund
    /// path.
    pub fn sweep_refunds(&self, current_height: u32, safety_window: u32) -> Result<Vec<u64>, EngineError> {
        let rows = self.store.scan_prefix(Column::Deposits, &[], 4096)?;
        let mut refunds = Vec::new();
        for (key, raw) in rows {
            if key.len() != 8 {
                continue; // payment audit rows
            }
            let mut record: DepositRecord = bincode::deserialize(&raw)?;
            let overdue = current_height > record.deadline_block.saturating_add(safety_window);
            if overdue && matches!(record.state, MixerState::Created | MixerState::Claimed) {
                record.state = MixerState::Refunded;
                self.put_deposit(&record)?;
                info!(request_id = record.request_id, "mixer session refunded");
                refunds.push(record.request_id);
            }
        }
        Ok(refunds)
    }

    async fn handle_claim(
        &self,
        request: &ServiceRequest,
        recipients: &[UInt160],
        amounts: &[u64],
        signature: &[u8],
        key_version: u32,
    ) -> HandlerOutcome {
        let mut record = match self.deposit(request.request_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                return HandlerOutcome::Permanent(Failure::of(FailReason::UnknownRequest))
            }
            Err(e) => {
                return HandlerOutcome::Transient(Failure::with_detail(
                    FailReason::UpstreamError,
                    e.to_string(),
                ))
            }
        };

        if record.state != MixerState::Created {
            return HandlerOutcome::Permanent(Failure::with_detail(
                FailReason::BadRequest,
                format!("claim in state {:?}", record.state),
            ));
        }

        let attestation = match self.signer.attestation().await {
            Ok(att) => att,
            Err(e) if e.is_transient() => {
                return HandlerOutcome::Transient(Failure::with_detail(
                    FailReason::SignerUnavailable,
                    e.to_string(),
                ))
            }
            Err(e) => {
                return HandlerOutcome::Permanent(Failure::with_detail(
                    FailReason::SignerUnavailable,
                    e.to_string(),
                ))
            }
        };
        if attestation.key_version != key_version {
            return HandlerOutcome::Permanent(Failure::with_detail(
                FailReason::BadRequest,
                format!(
                    "claim key version {key_version}, attested {}",
                    attestation.key_version
                ),
            ));
        }

        let message = mixer_claim_message(request.request_id, recipients, amounts);
        match verify_signature(&attestation.public_key, DOMAIN_MIXER_CLAIM, &message, signature) {
            Ok(true) => {}
            _ => {
                return HandlerOutcome::Permanent(Failure::with_detail(
                    FailReason::BadRequest,
                    "claim signature invalid",
                ))
            }
        }

        // Funds accounting invariant: sum(outbound) ≤ deposited + bond.
        let mut outbound: u64 = 0;
        for amount in amounts {
            outbound = match outbound.checked_add(*amount) {
                Some(total) => total,
                None => {
                    return HandlerOutcome::Permanent(Failure::with_detail(
                        FailReason::FundsInvariantViolated,
                        "outbound overflow",
                    ))
                }
            };
        }
        let budget = record.amount.saturating_add(record.bond);
        if outbound > budget {
            self.metrics.funds_violations.inc();
            error!(
                request_id = request.request_id,
                outbound, budget, "mixer funds invariant violated; operator attention required"
            );
            return HandlerOutcome::Permanent(Failure::of(FailReason::FundsInvariantViolated));
        }

        record.state = MixerState::Claimed;
        record.outbound_total = outbound;
        if let Err(e) = self.put_deposit(&record) {
            return HandlerOutcome::Transient(Failure::with_detail(
                FailReason::UpstreamError,
                e.to_string(),
            ));
        }

        // Release instruction the gateway forwards to the mixer contract.
        let release = serde_json::json!({
            "request_id": request.request_id,
            "recipients": recipients.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            "amounts": amounts,
        });
        HandlerOutcome::Success(release.to_string().into_bytes())
    }
}

#[async_trait]
impl ServiceHandler for MixerHandler {
    async fn handle(&self, request: &ServiceRequest, payload: &RequestPayload) -> HandlerOutcome {
        let RequestPayload::Mixer(mixer) = payload else {
            return HandlerOutcome::Permanent(Failure::with_detail(
                FailReason::BadRequest,
                "payload kind mismatch",
            ));
        };

        match mixer {
            MixerPayload::Deposit {
                amount,
                deadline_block,
            } => {
                let record = DepositRecord {
                    request_id: request.request_id,
                    payer: request.requester,
                    amount: *amount,
                    bond: 0,
                    deadline_block: *deadline_block,
                    state: MixerState::Created,
                    outbound_total: 0,
                };
                let encoded = match bincode::serialize(&record) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        return HandlerOutcome::Permanent(Failure::with_detail(
                            FailReason::InternalBug,
                            e.to_string(),
                        ))
                    }
                };
                match self.store.create_if_absent(
                    Column::Deposits,
                    &deposit_key(request.request_id),
                    &encoded,
                ) {
                    Ok(_created) => HandlerOutcome::Success(b"created".to_vec()),
                    Err(e) => HandlerOutcome::Transient(Failure::with_detail(
                        FailReason::UpstreamError,
                        e.to_string(),
                    )),
                }
            }
            MixerPayload::Claim {
                recipients,
                amounts,
                signature,
                key_version,
            } => {
                self.handle_claim(request, recipients, amounts, signature, *key_version)
                    .await
            }
            MixerPayload::Complete => {
                let mut record = match self.deposit(request.request_id) {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        return HandlerOutcome::Permanent(Failure::of(FailReason::UnknownRequest))
                    }
                    Err(e) => {
                        return HandlerOutcome::Transient(Failure::with_detail(
                            FailReason::UpstreamError,
                            e.to_string(),
                        ))
                    }
                };
                match record.state {
                    MixerState::Claimed => {
                        record.state = MixerState::Completed;
                        if let Err(e) = self.put_deposit(&record) {
                            return HandlerOutcome::Transient(Failure::with_detail(
                                FailReason::UpstreamError,
                                e.to_string(),
                            ));
                        }
                        HandlerOutcome::Success(b"completed".to_vec())
                    }
                    MixerState::Completed => HandlerOutcome::Success(b"completed".to_vec()),
                    other => HandlerOutcome::Permanent(Failure::with_detail(
                        FailReason::BadRequest,
                        format!("complete in state {other:?}"),
                    )),
                }
            }
        }
    }
}
