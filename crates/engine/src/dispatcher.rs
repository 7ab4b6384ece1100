//! Dispatcher: event ingestion, worker pool, retry policy, deadlines.
//!
//! Ingestion converts listener events into registry rows (idempotently,
//! so reorg replay and duplicate delivery are harmless). A fixed pool of
//! workers claims the oldest pending rows, runs the per-kind handler
//! under a deadline, and drives the outcome through the submitter and
//! registry. Handler panics are contained at the worker boundary.

use crate::error::EngineError;
use crate::handlers::HandlerSet;
use crate::metrics::Metrics;
use crate::now_ms;
use crate::registry::{CompleteOutcome, Lease, RequestRegistry};
use crate::submitter::{SubmitError, Submitter};
use nsl_chain::ChainTip;
use nsl_config::{EngineConfig, HandlerConfig};
use nsl_core::{
    sha256_hash, ChainEvent, DecodedEvent, FailReason, Failure, HandlerOutcome, RequestPayload,
    RequestRecord, ServiceKind, ServiceRequest, ServiceRequestedEvent,
};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

/// Neo N3 block time, used to convert block deadlines into wall time.
const BLOCK_TIME_MS: u64 = 15_000;
/// Worker poll fallback when no ingest notification arrives.
const WORKER_IDLE_POLL: Duration = Duration::from_millis(250);
/// How often the deadline watcher scans for overdue rows.
const DEADLINE_SCAN_INTERVAL: Duration = Duration::from_secs(15);

fn kind_index(kind: ServiceKind) -> usize {
    match kind {
        ServiceKind::Oracle => 0,
        ServiceKind::Randomness => 1,
        ServiceKind::Mixer => 2,
        ServiceKind::Confidential => 3,
        ServiceKind::Automation => 4,
    }
}

struct Job {
    lease: Lease,
    record: RequestRecord,
    payload: Option<RequestPayload>,
}

pub struct Dispatcher {
    registry: Arc<RequestRegistry>,
    handlers: Arc<HandlerSet>,
    submitter: Arc<Submitter>,
    engine_config: EngineConfig,
    handler_config: HandlerConfig,
    metrics: Arc<Metrics>,
    tips: watch::Receiver<ChainTip>,
    /// Payloads decoded at ingest, carried to the handler invocation.
    decoded: RwLock<HashMap<u64, RequestPayload>>,
    /// In-flight executions per kind, for the fairness quota.
    quota_used: [AtomicUsize; 5],
    work_available: Notify,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RequestRegistry>,
        handlers: Arc<HandlerSet>,
        submitter: Arc<Submitter>,
        engine_config: EngineConfig,
        handler_config: HandlerConfig,
        tips: watch::Receiver<ChainTip>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            handlers,
            submitter,
            engine_config,
            handler_config,
            metrics,
            tips,
            decoded: RwLock::new(HashMap::new()),
            quota_used: Default::default(),
            work_available: Notify::new(),
        })
    }

    fn tip_height(&self) -> Option<u32> {
        self.tips.borrow().height()
    }

    /// Consumes listener events. Every event is also fanned out on
    /// `event_tee` for the automation scheduler's event triggers.
    pub async fn run_ingest(
        self: Arc<Self>,
        mut events: mpsc::Receiver<DecodedEvent>,
        event_tee: broadcast::Sender<DecodedEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            let event = tokio::select! {
                received = events.recv() => match received {
                    Some(event) => event,
                    None => return,
                },
                _ = shutdown.recv() => return,
            };

            let _ = event_tee.send(event.clone());

            match &event.event {
                ChainEvent::ServiceRequested(requested) => {
                    if let Err(err) = Self::ingest_request(&self, requested, event.height) {
                        warn!(
                            request_id = requested.request_id,
                            error = %err,
                            "request ingest failed"
                        );
                    }
                }
                ChainEvent::ServiceFulfilled(fulfilled) => {
                    let result = self.registry.converge_terminal(
                        fulfilled.request_id,
                        fulfilled.success,
                        &fulfilled.result,
                        &fulfilled.error,
                        now_ms(),
                    );
                    if let Err(err) = result {
                        warn!(request_id = fulfilled.request_id, error = %err, "converge failed");
                    }
                    self.decoded.write().remove(&fulfilled.request_id);
                }
                ChainEvent::PaymentReceived(payment) => {
                    if let Err(err) = self.handlers.mixer.record_payment(payment) {
                        warn!(payment_id = payment.payment_id, error = %err, "payment record failed");
                    }
                }
                ChainEvent::RandomnessRecorded(_) | ChainEvent::PriceUpdated(_) => {}
            }
        }
    }

    fn ingest_request(
        this: &Arc<Self>,
        event: &ServiceRequestedEvent,
        height: u32,
    ) -> Result<(), EngineError> {
        // The event schema carries no explicit deadline; requests declare
        // one as a top-level payload field.
        let deadline_block = serde_json::from_slice::<serde_json::Value>(&event.payload)
            .ok()
            .and_then(|v| v.get("deadline_block").and_then(|d| d.as_u64()))
            .map(|d| d as u32);

        let request = ServiceRequest {
            request_id: event.request_id,
            kind: event.kind,
            app_id: event.app_id.clone(),
            requester: event.requester,
            callback_contract: event.callback_contract,
            callback_method: event.callback_method.clone(),
            payload: event.payload.clone(),
            created_at_block: height,
            deadline_block,
        };

        let record = this.registry.upsert_pending(request)?;
        if record.status.is_terminal() {
            debug!(request_id = event.request_id, status = %record.status, "replayed event ignored");
            return Ok(());
        }

        // Past its deadline already: expired, never claimed.
        if let (Some(deadline), Some(tip)) = (deadline_block, this.tip_height()) {
            if deadline < tip {
                if this.registry.expire(event.request_id, now_ms())? {
                    this.metrics.requests_expired.inc();
                    info!(request_id = event.request_id, deadline, tip, "expired at ingest");
                }
                return Ok(());
            }
        }

        match RequestPayload::decode(event.kind, &event.payload) {
            Ok(payload) => {
                this.decoded.write().insert(event.request_id, payload);
                this.work_available.notify_waiters();
            }
            Err(err) => {
                let reason = match err {
                    nsl_core::CoreError::PayloadTooLarge { .. } => FailReason::PayloadTooLarge,
                    _ => FailReason::BadRequest,
                };
                warn!(request_id = event.request_id, error = %err, "payload rejected at ingest");
                Self::fail_fast(this, event.request_id, reason);
            }
        }
        Ok(())
    }

    /// Fails a just-ingested request without running any handler I/O.
    fn fail_fast(this: &Arc<Self>, request_id: u64, reason: FailReason) {
        let dispatcher = Arc::clone(this);
        tokio::spawn(async move {
            let now = now_ms();
            let lease = match dispatcher.registry.claim(
                request_id,
                "ingest-reject",
                dispatcher.engine_config.lease_duration_ms,
                now,
            ) {
                Ok(Some(lease)) => lease,
                Ok(None) => return,
                Err(err) => {
                    warn!(request_id, error = %err, "fail-fast claim error");
                    return;
                }
            };
            let tx_hash = match dispatcher.submitter.fail(request_id, reason).await {
                Ok(receipt) => Some(receipt.tx_hash),
                Err(err) => {
                    debug!(request_id, ?err, "fail-fast submission did not confirm");
                    None
                }
            };
            let outcome = CompleteOutcome::Failed {
                reason: reason.as_str().to_string(),
                tx_hash,
            };
            if let Err(err) = dispatcher.registry.complete(&lease, outcome, now_ms()) {
                warn!(request_id, error = %err, "fail-fast completion error");
            } else {
                dispatcher.metrics.requests_failed.inc();
            }
        });
    }

    /// One worker of the pool.
    pub async fn run_worker(
        self: Arc<Self>,
        worker_id: String,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = self.work_available.notified() => {}
                _ = tokio::time::sleep(WORKER_IDLE_POLL) => {}
                _ = shutdown.recv() => return,
            }

            loop {
                if shutdown.try_recv().is_ok() {
                    return;
                }
                let job = match self.try_claim(&worker_id) {
                    Ok(Some(job)) => job,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(worker = %worker_id, error = %err, "claim scan failed");
                        break;
                    }
                };
                if self.execute(&worker_id, job, &mut shutdown).await {
                    return;
                }
            }
        }
    }

    /// Claims the best eligible pending row: oldest first, preferring
    /// kinds with spare quota so one noisy kind cannot monopolize the
    /// pool.
    fn try_claim(&self, worker_id: &str) -> Result<Option<Job>, EngineError> {
        let now = now_ms();
        let candidates = self.registry.claim_candidates(32, now)?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut eligible: Vec<(u64, ServiceKind, u32, usize)> = Vec::new();
        for (id, kind, block) in candidates {
            let used = self.quota_used[kind_index(kind)].load(Ordering::Relaxed);
            let limit = self.engine_config.quota_for(kind);
            if used >= limit {
                continue;
            }
            // Coarse usage bucket keeps ordering oldest-first among
            // similarly-loaded kinds.
            let bucket = used * 4 / limit;
            eligible.push((id, kind, block, bucket));
        }
        eligible.sort_by_key(|(id, _, block, bucket)| (*bucket, *block, *id));

        for (id, _, _, _) in eligible {
            if let Some(lease) =
                self.registry
                    .claim(id, worker_id, self.engine_config.lease_duration_ms, now)?
            {
                let Some(record) = self.registry.get(id)? else {
                    continue;
                };
                let payload = self.decoded.read().get(&id).cloned();
                return Ok(Some(Job {
                    lease,
                    record,
                    payload,
                }));
            }
        }
        Ok(None)
    }

    /// Runs one claimed job. Returns `true` when a shutdown signal was
    /// observed mid-execution.
    async fn execute(
        &self,
        worker_id: &str,
        job: Job,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        let request = job.record.request.clone();
        let request_id = request.request_id;
        let kind = request.kind;
        let index = kind_index(kind);

        self.quota_used[index].fetch_add(1, Ordering::Relaxed);
        self.metrics.inflight_requests.inc();
        let _guard = scopeguard(self, index);

        // Decoded at ingest; on restart the cache is cold and we decode
        // again here.
        let payload = match job.payload {
            Some(payload) => payload,
            None => match RequestPayload::decode(kind, &request.payload) {
                Ok(payload) => payload,
                Err(err) => {
                    let reason = match err {
                        nsl_core::CoreError::PayloadTooLarge { .. } => FailReason::PayloadTooLarge,
                        _ => FailReason::BadRequest,
                    };
                    warn!(request_id, error = %err, "payload rejected at claim");
                    self.complete_failed_with_submission(&job.lease, Failure::of(reason))
                        .await;
                    return false;
                }
            },
        };

        let budget = self.execution_budget(&request);
        debug!(
            worker = %worker_id,
            request_id,
            kind = %kind,
            budget_ms = budget.as_millis() as u64,
            attempt = job.record.attempt_count,
            "handler starting"
        );

        let handlers = Arc::clone(&self.handlers);
        let task_request = request.clone();
        let task_payload = payload.clone();
        let handler_task = tokio::spawn(async move {
            handlers
                .dispatch(task_request.kind)
                .handle(&task_request, &task_payload)
                .await
        });

        let outcome = tokio::select! {
            joined = tokio::time::timeout(budget, handler_task) => match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(join_error)) if join_error.is_panic() => {
                    self.metrics.handler_panics.inc();
                    error!(request_id, "handler panicked");
                    self.handle_panic(&job.lease).await;
                    return false;
                }
                Ok(Err(_)) => {
                    // Cancelled task: treat like shutdown.
                    self.release_for_shutdown(&job.lease);
                    return false;
                }
                Err(_elapsed) => HandlerOutcome::Transient(Failure::of(FailReason::HandlerTimeout)),
            },
            _ = shutdown.recv() => {
                // Cancelled in-flight at shutdown: back to pending without
                // burning an attempt.
                self.release_for_shutdown(&job.lease);
                return true;
            }
        };

        match outcome {
            HandlerOutcome::Success(result) => {
                let result_hash = sha256_hash(&result);
                match self.submitter.fulfill(request_id, &result).await {
                    Ok(receipt) => {
                        let outcome = CompleteOutcome::Fulfilled {
                            result_hash,
                            tx_hash: receipt.tx_hash,
                        };
                        match self.registry.complete(&job.lease, outcome, now_ms()) {
                            Ok(_) => {
                                self.metrics.requests_fulfilled.inc();
                                self.decoded.write().remove(&request_id);
                                info!(request_id, tx_hash = %receipt.tx_hash, "request fulfilled");
                            }
                            Err(err) => warn!(request_id, error = %err, "completion failed"),
                        }
                    }
                    Err(SubmitError::Transient(failure)) => {
                        self.release_transient(&job.lease, &job.record, failure).await;
                    }
                    Err(SubmitError::Permanent(failure)) => {
                        // The chain rejected the fulfillment; nothing
                        // further to submit.
                        self.complete_failed_locally(&job.lease, failure);
                    }
                }
            }
            HandlerOutcome::Permanent(failure) => {
                self.complete_failed_with_submission(&job.lease, failure).await;
            }
            HandlerOutcome::Transient(failure) => {
                self.release_transient(&job.lease, &job.record, failure).await;
            }
        }
        false
    }

    /// `min(lease, handler_max_runtime, blocks to deadline)`.
    fn execution_budget(&self, request: &ServiceRequest) -> Duration {
        let mut budget = Duration::from_millis(self.engine_config.lease_duration_ms)
            .min(self.handler_config.max_runtime(request.kind));
        if let (Some(deadline), Some(tip)) = (request.deadline_block, self.tip_height()) {
            let blocks_left = deadline.saturating_sub(tip) as u64;
            budget = budget.min(Duration::from_millis(blocks_left.max(1) * BLOCK_TIME_MS));
        }
        budget.max(Duration::from_secs(1))
    }

    async fn handle_panic(&self, lease: &Lease) {
        match self.registry.record_panic(lease) {
            Ok(count) if count >= 2 => {
                self.complete_failed_with_submission(
                    lease,
                    Failure::of(FailReason::InternalBug),
                )
                .await;
            }
            Ok(_) => {
                let now = now_ms();
                let backoff = self.backoff_ms(0);
                if let Err(err) = self.registry.release(
                    lease,
                    Some("handler_panic".into()),
                    now + backoff,
                    true,
                    now,
                ) {
                    warn!(request_id = lease.request_id, error = %err, "panic release failed");
                }
            }
            Err(err) => {
                warn!(request_id = lease.request_id, error = %err, "panic bookkeeping failed");
            }
        }
    }

    fn release_for_shutdown(&self, lease: &Lease) {
        let now = now_ms();
        if let Err(err) = self.registry.release(lease, None, now, false, now) {
            warn!(request_id = lease.request_id, error = %err, "shutdown release failed");
        }
    }

    /// `min(cap, base · 2^attempt) ± 20%`.
    fn backoff_ms(&self, attempt: u32) -> u64 {
        let base = self.engine_config.retry_base_ms;
        let cap = self.engine_config.retry_cap_ms;
        let raw = base.saturating_mul(1u64 << attempt.min(20)).min(cap);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        (raw as f64 * jitter) as u64
    }

    async fn release_transient(
        &self,
        lease: &Lease,
        record: &RequestRecord,
        failure: Failure,
    ) {
        // The record was read post-claim, so it already counts this
        // attempt.
        let attempt = record.attempt_count.max(1);
        if attempt >= self.engine_config.max_attempts {
            // Out of attempts: the user sees a terminal failure, not a
            // silent timeout.
            let tx_hash = match self
                .submitter
                .fail(lease.request_id, FailReason::MaxAttemptsExceeded)
                .await
            {
                Ok(receipt) => Some(receipt.tx_hash),
                Err(_) => None,
            };
            let outcome = CompleteOutcome::Failed {
                reason: FailReason::MaxAttemptsExceeded.as_str().to_string(),
                tx_hash,
            };
            match self.registry.complete(lease, outcome, now_ms()) {
                Ok(_) => self.metrics.requests_failed.inc(),
                Err(err) => warn!(request_id = lease.request_id, error = %err, "exhaustion failed"),
            }
            return;
        }

        let now = now_ms();
        let not_before = now + self.backoff_ms(attempt - 1);
        match self
            .registry
            .release(lease, Some(failure.log_line()), not_before, true, now)
        {
            Ok(_) => {
                self.metrics.requests_released.inc();
                debug!(
                    request_id = lease.request_id,
                    not_before, "released for retry"
                );
            }
            Err(err) => warn!(request_id = lease.request_id, error = %err, "release failed"),
        }
    }

    /// Permanent handler failure: surface it on chain via `failRequest`,
    /// then record the terminal state.
    async fn complete_failed_with_submission(&self, lease: &Lease, failure: Failure) {
        let tx_hash = match self.submitter.fail(lease.request_id, failure.reason).await {
            Ok(receipt) => Some(receipt.tx_hash),
            Err(SubmitError::Transient(submit_failure)) => {
                // The chain may still accept it later; retry the request.
                if let Some(record) = self.registry.get(lease.request_id).ok().flatten() {
                    self.release_transient(lease, &record, submit_failure).await;
                    return;
                }
                None
            }
            Err(SubmitError::Permanent(_)) => None,
        };
        let outcome = CompleteOutcome::Failed {
            reason: failure.log_line(),
            tx_hash,
        };
        match self.registry.complete(lease, outcome, now_ms()) {
            Ok(_) => {
                self.metrics.requests_failed.inc();
                self.decoded.write().remove(&lease.request_id);
            }
            Err(err) => warn!(request_id = lease.request_id, error = %err, "failure completion failed"),
        }
    }

    fn complete_failed_locally(&self, lease: &Lease, failure: Failure) {
        let outcome = CompleteOutcome::Failed {
            reason: failure.log_line(),
            tx_hash: None,
        };
        match self.registry.complete(lease, outcome, now_ms()) {
            Ok(_) => {
                self.metrics.requests_failed.inc();
                self.decoded.write().remove(&lease.request_id);
            }
            Err(err) => warn!(request_id = lease.request_id, error = %err, "local completion failed"),
        }
    }

    /// Expires rows past their deadline block.
    pub async fn run_deadline_watcher(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(DEADLINE_SCAN_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(height) = self.tip_height() else { continue };
                    match self.registry.expire_overdue(height, now_ms()) {
                        Ok(expired) => {
                            for id in &expired {
                                self.decoded.write().remove(id);
                                self.metrics.requests_expired.inc();
                            }
                        }
                        Err(err) => warn!(error = %err, "deadline scan failed"),
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }
}

/// Decrements the quota counter and inflight gauge on scope exit.
struct QuotaGuard<'a> {
    dispatcher: &'a Dispatcher,
    index: usize,
}

fn scopeguard<'a>(dispatcher: &'a Dispatcher, index: usize) -> QuotaGuard<'a> {
    QuotaGuard { dispatcher, index }
}

impl Drop for QuotaGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.quota_used[self.index].fetch_sub(1, Ordering::Relaxed);
        self.dispatcher.metrics.inflight_requests.dec();
    }
}
