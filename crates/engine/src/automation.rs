//! Automation scheduler.
//!
//! Evaluates registered triggers on a fixed tick: time triggers by their
//! stored next-fire instant, price triggers against the data-feed cache,
//! threshold triggers against on-chain reads, and event triggers against
//! the listener's stream. A fire allocates a synthetic request id and
//! goes through the submitter's fulfillment path under the automation
//! kind.

use crate::datafeed::FeedScheduler;
use crate::error::EngineError;
use crate::handlers::automation::trigger_key;
use crate::metrics::Metrics;
use crate::now_ms;
use crate::submitter::Submitter;
use nsl_chain::TransactionSender;
use nsl_core::{
    ChainEvent, DecodedEvent, Direction, TriggerCondition, TriggerRecord, TriggerStatus,
};
use nsl_store::{Column, SharedStore, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Synthetic request ids live far above chain-assigned ones.
const SYNTHETIC_ID_BASE: u64 = 1 << 48;

const SYNTHETIC_COUNTER_KEY: &[u8] = b"automation:next_request_id";

pub struct TriggerScheduler {
    store: SharedStore,
    submitter: Arc<Submitter>,
    sender: Arc<TransactionSender>,
    feeds: Arc<FeedScheduler>,
    tick_interval: Duration,
    metrics: Arc<Metrics>,
}

impl TriggerScheduler {
    pub fn new(
        store: SharedStore,
        submitter: Arc<Submitter>,
        sender: Arc<TransactionSender>,
        feeds: Arc<FeedScheduler>,
        tick_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            submitter,
            sender,
            feeds,
            tick_interval,
            metrics,
        })
    }

    fn active_triggers(&self) -> Result<Vec<TriggerRecord>, EngineError> {
        let rows = self.store.scan_prefix(Column::Triggers, &[], 4096)?;
        let mut out = Vec::new();
        for (_, raw) in rows {
            let record: TriggerRecord =
                serde_json::from_slice(&raw).map_err(|e| EngineError::Codec(e.to_string()))?;
            if record.status == TriggerStatus::Active {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn persist(&self, record: &TriggerRecord) -> Result<(), EngineError> {
        let encoded =
            serde_json::to_vec(record).map_err(|e| EngineError::Codec(e.to_string()))?;
        self.store
            .put(Column::Triggers, &trigger_key(record.trigger_id), &encoded)?;
        Ok(())
    }

    fn allocate_synthetic_id(&self) -> Result<u64, EngineError> {
        // Single-writer counter; the scheduler is the only allocator.
        let next = match self.store.get(Column::Meta, SYNTHETIC_COUNTER_KEY)? {
            Some(bytes) => u64::from_be_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| EngineError::Codec("synthetic counter width".into()))?,
            ),
            None => SYNTHETIC_ID_BASE,
        } + 1;
        self.store
            .put(Column::Meta, SYNTHETIC_COUNTER_KEY, &next.to_be_bytes())?;
        Ok(next)
    }

    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<DecodedEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.evaluate_tick(now_ms()).await {
                        warn!(error = %err, "trigger tick failed");
                    }
                }
                received = events.recv() => match received {
                    Ok(event) => {
                        if let Err(err) = self.evaluate_event(&event).await {
                            warn!(error = %err, "event trigger evaluation failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event trigger stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = shutdown.recv() => return,
            }
        }
    }

    /// Evaluates every non-event trigger against `tick_ms`. Applying the
    /// same tick twice fires nothing new: `last_executed_at_ms` guards
    /// re-entry.
    pub async fn evaluate_tick(&self, tick_ms: u64) -> Result<usize, EngineError> {
        let mut fired = 0;
        for mut record in self.active_triggers()? {
            if record.last_executed_at_ms.is_some_and(|at| at >= tick_ms) {
                continue;
            }
            if record.exhausted(tick_ms) {
                record.status = TriggerStatus::Expired;
                self.persist(&record)?;
                continue;
            }

            // Owned copy keeps the record free for arming updates.
            let due = match record.condition.clone() {
                TriggerCondition::Time { interval_ms, .. } => {
                    let next = record.next_fire_ms.unwrap_or(tick_ms);
                    if next <= tick_ms {
                        record.next_fire_ms = Some(next.max(tick_ms) + interval_ms);
                        true
                    } else {
                        false
                    }
                }
                TriggerCondition::Price {
                    feed,
                    threshold,
                    direction,
                } => {
                    let Some(snapshot) = self.feeds.latest(&feed) else {
                        continue;
                    };
                    self.edge(&mut record, compare(snapshot.price, threshold, direction))
                }
                TriggerCondition::Threshold {
                    contract,
                    method,
                    threshold,
                    direction,
                } => {
                    let observed = match self.sender.test_invoke(&contract, &method, &[]).await {
                        Ok(result) => result
                            .stack
                            .first()
                            .and_then(|item| item.as_u64()),
                        Err(err) => {
                            debug!(trigger_id = record.trigger_id, error = %err, "threshold read failed");
                            None
                        }
                    };
                    let Some(observed) = observed else { continue };
                    self.edge(&mut record, compare(observed, threshold, direction))
                }
                TriggerCondition::Event { .. } => false,
            };

            if due {
                self.fire(&mut record, tick_ms).await?;
                fired += 1;
            } else {
                // Persist re-armed or rescheduled state.
                self.persist(&record)?;
            }
        }
        Ok(fired)
    }

    /// Fires event triggers matching a decoded notification.
    pub async fn evaluate_event(&self, event: &DecodedEvent) -> Result<usize, EngineError> {
        let name = match &event.event {
            ChainEvent::ServiceRequested(_) => return Ok(0),
            other => other.name(),
        };
        let mut fired = 0;
        for mut record in self.active_triggers()? {
            let TriggerCondition::Event {
                contract,
                event_name,
            } = &record.condition
            else {
                continue;
            };
            if *contract != event.contract || event_name != name {
                continue;
            }
            let now = now_ms();
            if record.exhausted(now) {
                record.status = TriggerStatus::Expired;
                self.persist(&record)?;
                continue;
            }
            self.fire(&mut record, now).await?;
            fired += 1;
        }
        Ok(fired)
    }

    /// Condition held: fire only when armed, then disarm until it clears.
    fn edge(&self, record: &mut TriggerRecord, holds: bool) -> bool {
        if holds && record.armed {
            record.armed = false;
            true
        } else {
            if !holds {
                record.armed = true;
            }
            false
        }
    }

    async fn fire(&self, record: &mut TriggerRecord, fired_at_ms: u64) -> Result<(), EngineError> {
        let request_id = self.allocate_synthetic_id()?;
        let callback = serde_json::json!({
            "trigger_id": record.trigger_id,
            "kind": record.condition.kind_str(),
            "fired_at_ms": fired_at_ms,
            "callback_contract": record.callback_contract.to_string(),
            "callback_method": record.callback_method,
            "execution": record.executions_used + 1,
        });

        match self
            .submitter
            .fulfill(request_id, callback.to_string().as_bytes())
            .await
        {
            Ok(receipt) => {
                info!(
                    trigger_id = record.trigger_id,
                    request_id,
                    tx_hash = %receipt.tx_hash,
                    "trigger fired"
                );
                self.metrics.trigger_fires.inc();
            }
            Err(err) => {
                // The tick loop will try again on the next evaluation.
                warn!(trigger_id = record.trigger_id, ?err, "trigger callback submission failed");
                return Ok(());
            }
        }

        record.executions_used += 1;
        record.last_executed_at_ms = Some(fired_at_ms);
        if record.exhausted(fired_at_ms) {
            record.status = TriggerStatus::Expired;
        }
        self.persist(record)?;
        Ok(())
    }
}

fn compare(observed: u64, threshold: u64, direction: Direction) -> bool {
    match direction {
        Direction::Above => observed >= threshold,
        Direction::Below => observed <= threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_are_inclusive() {
        assert!(compare(100, 100, Direction::Above));
        assert!(compare(101, 100, Direction::Above));
        assert!(!compare(99, 100, Direction::Above));
        assert!(compare(100, 100, Direction::Below));
        assert!(compare(99, 100, Direction::Below));
        assert!(!compare(101, 100, Direction::Below));
    }
}
