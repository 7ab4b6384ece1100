//! Fulfillment submitter.
//!
//! Turns a handler outcome into a confirmed on-chain gateway call. Every
//! attempt allocates a fresh persisted nonce, signs the canonical payload
//! under the fulfillment domain, invokes the gateway, and waits for HALT.
//! FAULT reasons branch through the reason table; timeouts retry with a
//! fresh nonce up to `max_submit_attempts`.

use crate::error::EngineError;
use crate::metrics::Metrics;
use crate::nonce::NonceStore;
use crate::now_ms;
use nsl_chain::{ChainError, ContractParameter, FaultReason, TransactionSender};
use nsl_config::SubmitterConfig;
use nsl_core::{
    canonical_fulfillment, FailReason, Failure, UInt160, UInt256, DOMAIN_FULFILL,
};
use nsl_signer::{ServiceSigner, SharedSigner};
use nsl_store::{Column, SharedStore, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// A confirmed submission.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub tx_hash: UInt256,
    pub nonce: u64,
    pub key_version: u32,
}

/// Submission failure, classified for the dispatcher.
#[derive(Debug, Clone)]
pub enum SubmitError {
    Transient(Failure),
    Permanent(Failure),
}

impl SubmitError {
    fn transient(reason: FailReason, detail: impl Into<String>) -> Self {
        SubmitError::Transient(Failure::with_detail(reason, detail))
    }

    fn permanent(reason: FailReason, detail: impl Into<String>) -> Self {
        SubmitError::Permanent(Failure::with_detail(reason, detail))
    }
}

pub struct Submitter {
    sender: Arc<TransactionSender>,
    signer: SharedSigner,
    nonces: NonceStore,
    store: SharedStore,
    gateway: UInt160,
    config: SubmitterConfig,
    permits: Semaphore,
    metrics: Arc<Metrics>,
}

fn receipt_key(request_id: u64) -> Vec<u8> {
    let mut key = b"rcpt:".to_vec();
    key.extend_from_slice(&request_id.to_be_bytes());
    key
}

impl Submitter {
    pub fn new(
        sender: Arc<TransactionSender>,
        signer: SharedSigner,
        store: SharedStore,
        gateway: UInt160,
        config: SubmitterConfig,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let permits = Semaphore::new(config.submit_parallelism.max(1));
        Arc::new(Self {
            sender,
            signer,
            nonces: NonceStore::new(Arc::clone(&store)),
            store,
            gateway,
            config,
            permits,
            metrics,
        })
    }

    pub fn sender(&self) -> &Arc<TransactionSender> {
        &self.sender
    }

    /// Submits `fulfillRequest(request_id, result, nonce, signature)`.
    pub async fn fulfill(
        &self,
        request_id: u64,
        result: &[u8],
    ) -> Result<SubmitReceipt, SubmitError> {
        self.submit(request_id, true, result).await
    }

    /// Submits `failRequest(request_id, reason, nonce, signature)`.
    pub async fn fail(
        &self,
        request_id: u64,
        reason: FailReason,
    ) -> Result<SubmitReceipt, SubmitError> {
        self.submit(request_id, false, reason.as_str().as_bytes())
            .await
    }

    /// Confirmed tx hash for a previously submitted request, if any.
    pub fn receipt(&self, request_id: u64) -> Option<UInt256> {
        self.store
            .get(Column::Meta, &receipt_key(request_id))
            .ok()
            .flatten()
            .and_then(|bytes| UInt256::from_bytes(&bytes).ok())
    }

    async fn submit(
        &self,
        request_id: u64,
        success: bool,
        body: &[u8],
    ) -> Result<SubmitReceipt, SubmitError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SubmitError::permanent(FailReason::InternalBug, "submitter closed"))?;

        let method = if success { "fulfillRequest" } else { "failRequest" };
        let max_attempts = self.config.max_submit_attempts.max(1);
        let mut last_detail = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.metrics.submit_retries.inc();
                tokio::time::sleep(Duration::from_millis(250 * attempt as u64)).await;
            }
            match self.submit_once(request_id, success, body, method).await {
                Ok(receipt) => {
                    info!(
                        request_id,
                        method,
                        nonce = receipt.nonce,
                        tx_hash = %receipt.tx_hash,
                        attempt,
                        "submission confirmed"
                    );
                    return Ok(receipt);
                }
                Err(SubmitError::Transient(failure)) => {
                    warn!(request_id, method, attempt, error = %failure.log_line(), "submission attempt failed");
                    last_detail = failure.log_line();
                }
                Err(permanent) => return Err(permanent),
            }
        }

        Err(SubmitError::permanent(
            FailReason::SubmitExhausted,
            format!("{max_attempts} attempts; last: {last_detail}"),
        ))
    }

    async fn submit_once(
        &self,
        request_id: u64,
        success: bool,
        body: &[u8],
        method: &str,
    ) -> Result<SubmitReceipt, SubmitError> {
        // Key version first: the nonce is scoped to it.
        let attestation = self.signer.attestation().await.map_err(|e| {
            if e.is_transient() {
                SubmitError::transient(FailReason::SignerUnavailable, e.to_string())
            } else {
                SubmitError::permanent(FailReason::SignerUnavailable, e.to_string())
            }
        })?;
        let key_version = attestation.key_version;

        let nonce = self
            .nonces
            .allocate(key_version, now_ms())
            .await
            .map_err(|e| SubmitError::transient(FailReason::UpstreamError, e.to_string()))?;

        let payload = canonical_fulfillment(request_id, success, body, nonce);
        let bundle = self
            .signer
            .sign(DOMAIN_FULFILL, &payload)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    SubmitError::transient(FailReason::SignerUnavailable, e.to_string())
                } else {
                    SubmitError::permanent(FailReason::SignerUnavailable, e.to_string())
                }
            })?;

        let parameters = [
            ContractParameter::Int(request_id as i64),
            ContractParameter::Bytes(body.to_vec()),
            ContractParameter::Int(nonce as i64),
            ContractParameter::Bytes(bundle.signature.clone()),
        ];

        let pending = match self.sender.invoke(&self.gateway, method, &parameters).await {
            Ok(pending) => pending,
            Err(err) => return Err(self.classify_chain_error(err)),
        };

        match self
            .sender
            .wait_for_execution(
                &pending.tx_hash,
                Duration::from_secs(self.config.submit_timeout_secs),
                Duration::from_secs(2),
            )
            .await
        {
            Ok(_execution) => {
                let _ = self.nonces.mark_spent(key_version, nonce, now_ms());
                let _ = self.store.put(
                    Column::Meta,
                    &receipt_key(request_id),
                    pending.tx_hash.as_bytes(),
                );
                Ok(SubmitReceipt {
                    tx_hash: pending.tx_hash,
                    nonce,
                    key_version,
                })
            }
            Err(err) => Err(self.classify_chain_error(err)),
        }
    }

    /// The reason table: `nonce_used` retries with a fresh nonce,
    /// `unknown_request`/`deadline_past` stop, transport-level failures
    /// retry.
    fn classify_chain_error(&self, err: ChainError) -> SubmitError {
        match &err {
            ChainError::Fault(exception) => match FaultReason::classify(exception) {
                FaultReason::NonceUsed => {
                    SubmitError::transient(FailReason::NonceUsed, exception.clone())
                }
                FaultReason::UnknownRequest => {
                    SubmitError::permanent(FailReason::UnknownRequest, exception.clone())
                }
                FaultReason::DeadlinePast => {
                    SubmitError::permanent(FailReason::DeadlinePast, exception.clone())
                }
                FaultReason::Other(detail) => {
                    SubmitError::permanent(FailReason::UpstreamError, detail)
                }
            },
            _ if err.is_transient() => {
                SubmitError::transient(FailReason::UpstreamError, err.to_string())
            }
            _ => SubmitError::permanent(FailReason::UpstreamError, err.to_string()),
        }
    }
}
