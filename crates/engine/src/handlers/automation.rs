//! Automation handler: trigger registration and lifecycle actions.
//!
//! Automation-kind requests manage triggers; the scheduler in
//! `crate::automation` evaluates and fires them. A registered trigger's
//! id is its originating request id, which makes registration naturally
//! idempotent under event replay.

use crate::error::EngineError;
use crate::handlers::ServiceHandler;
use crate::now_ms;
use async_trait::async_trait;
use nsl_core::{
    AutomationAction, FailReason, Failure, HandlerOutcome, RequestPayload, ServiceRequest,
    TriggerCondition, TriggerRecord, TriggerStatus,
};
use nsl_store::{Column, SharedStore, Store};
use tracing::info;

pub fn trigger_key(trigger_id: u64) -> [u8; 8] {
    trigger_id.to_be_bytes()
}

pub struct AutomationHandler {
    store: SharedStore,
}

impl AutomationHandler {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    // Trigger rows carry an internally tagged condition enum, so they
    // persist as JSON rather than bincode.
    pub fn get_trigger(&self, trigger_id: u64) -> Result<Option<TriggerRecord>, EngineError> {
        self.store
            .get(Column::Triggers, &trigger_key(trigger_id))?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(|e| EngineError::Codec(e.to_string()))
    }

    fn put_trigger(&self, record: &TriggerRecord) -> Result<(), EngineError> {
        let encoded =
            serde_json::to_vec(record).map_err(|e| EngineError::Codec(e.to_string()))?;
        self.store
            .put(Column::Triggers, &trigger_key(record.trigger_id), &encoded)?;
        Ok(())
    }

    fn set_status(
        &self,
        trigger_id: u64,
        from_ok: impl Fn(TriggerStatus) -> bool,
        to: TriggerStatus,
    ) -> Result<Option<TriggerStatus>, EngineError> {
        let Some(mut record) = self.get_trigger(trigger_id)? else {
            return Ok(None);
        };
        if record.status == to {
            return Ok(Some(to)); // idempotent
        }
        if !from_ok(record.status) {
            return Ok(Some(record.status));
        }
        record.status = to;
        self.put_trigger(&record)?;
        Ok(Some(to))
    }
}

#[async_trait]
impl ServiceHandler for AutomationHandler {
    async fn handle(&self, request: &ServiceRequest, payload: &RequestPayload) -> HandlerOutcome {
        let RequestPayload::Automation(action) = payload else {
            return HandlerOutcome::Permanent(Failure::with_detail(
                FailReason::BadRequest,
                "payload kind mismatch",
            ));
        };

        let store_failure = |e: EngineError| {
            HandlerOutcome::Transient(Failure::with_detail(FailReason::UpstreamError, e.to_string()))
        };

        match action {
            AutomationAction::Register {
                condition,
                callback_contract,
                callback_method,
                max_executions,
                expires_at_ms,
            } => {
                let trigger_id = request.request_id;
                let next_fire_ms = match condition {
                    TriggerCondition::Time {
                        interval_ms,
                        start_at_ms,
                    } => Some(start_at_ms.unwrap_or_else(|| now_ms() + interval_ms)),
                    _ => None,
                };
                let record = TriggerRecord {
                    trigger_id,
                    owner_app_id: request.app_id.clone(),
                    condition: condition.clone(),
                    callback_contract: *callback_contract,
                    callback_method: callback_method.clone(),
                    status: TriggerStatus::Active,
                    max_executions: *max_executions,
                    executions_used: 0,
                    last_executed_at_ms: None,
                    expires_at_ms: *expires_at_ms,
                    next_fire_ms,
                    armed: true,
                };
                let encoded = match serde_json::to_vec(&record) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        return HandlerOutcome::Permanent(Failure::with_detail(
                            FailReason::InternalBug,
                            e.to_string(),
                        ))
                    }
                };
                match self.store.create_if_absent(
                    Column::Triggers,
                    &trigger_key(trigger_id),
                    &encoded,
                ) {
                    Ok(created) => {
                        if created {
                            info!(
                                trigger_id,
                                kind = record.condition.kind_str(),
                                "trigger registered"
                            );
                        }
                        let ack = serde_json::json!({ "trigger_id": trigger_id });
                        HandlerOutcome::Success(ack.to_string().into_bytes())
                    }
                    Err(e) => store_failure(e.into()),
                }
            }
            AutomationAction::Pause { trigger_id } => {
                match self.set_status(*trigger_id, |s| s == TriggerStatus::Active, TriggerStatus::Paused)
                {
                    Ok(Some(TriggerStatus::Paused)) => {
                        HandlerOutcome::Success(b"paused".to_vec())
                    }
                    Ok(Some(other)) => HandlerOutcome::Permanent(Failure::with_detail(
                        FailReason::BadRequest,
                        format!("pause in state {other:?}"),
                    )),
                    Ok(None) => HandlerOutcome::Permanent(Failure::of(FailReason::UnknownTrigger)),
                    Err(e) => store_failure(e),
                }
            }
            AutomationAction::Resume { trigger_id } => {
                match self.set_status(*trigger_id, |s| s == TriggerStatus::Paused, TriggerStatus::Active)
                {
                    Ok(Some(TriggerStatus::Active)) => {
                        HandlerOutcome::Success(b"resumed".to_vec())
                    }
                    Ok(Some(other)) => HandlerOutcome::Permanent(Failure::with_detail(
                        FailReason::BadRequest,
                        format!("resume in state {other:?}"),
                    )),
                    Ok(None) => HandlerOutcome::Permanent(Failure::of(FailReason::UnknownTrigger)),
                    Err(e) => store_failure(e),
                }
            }
            AutomationAction::Cancel { trigger_id } => {
                match self.set_status(*trigger_id, |s| !s.is_terminal(), TriggerStatus::Cancelled) {
                    Ok(Some(TriggerStatus::Cancelled)) => {
                        HandlerOutcome::Success(b"cancelled".to_vec())
                    }
                    Ok(Some(other)) => HandlerOutcome::Permanent(Failure::with_detail(
                        FailReason::BadRequest,
                        format!("cancel in state {other:?}"),
                    )),
                    Ok(None) => HandlerOutcome::Permanent(Failure::of(FailReason::UnknownTrigger)),
                    Err(e) => store_failure(e),
                }
            }
        }
    }
}
