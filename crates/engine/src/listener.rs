//! Chain event listener.
//!
//! Scans blocks in order, decodes filtered notifications, and forwards
//! typed events on a bounded channel. Delivery is at least once: the
//! persisted height advances only after a block's events are fully
//! enqueued, and a restart rewinds by the reorg depth. A hash mismatch at
//! the persisted height rewinds to the last agreed block and replays;
//! downstream consumers deduplicate by request id.

use crate::error::EngineError;
use crate::events::decode_notification;
use crate::metrics::Metrics;
use nsl_chain::{ChainClient, ChainTip, SharedChainClient, VmState};
use nsl_core::{DecodedEvent, UInt160, UInt256};
use nsl_store::{Column, SharedStore, Store};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

/// Persisted ingestion cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeightRecord {
    last_ingested_height: u32,
    last_hash: UInt256,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Identifies this listener's cursor row.
    pub listener_id: String,
    /// Contracts whose notifications are decoded.
    pub contracts: Vec<UInt160>,
    pub reorg_depth: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Poll delay once caught up with the tip.
    pub idle_delay: Duration,
}

pub struct EventListener {
    chain: SharedChainClient,
    store: SharedStore,
    config: ListenerConfig,
    contracts: HashSet<UInt160>,
    metrics: Arc<Metrics>,
}

/// Exponential backoff with ±20% jitter.
fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.min(16)));
    let capped = exp.min(cap);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    capped.mul_f64(jitter)
}

impl EventListener {
    pub fn new(
        chain: SharedChainClient,
        store: SharedStore,
        config: ListenerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let contracts = config.contracts.iter().copied().collect();
        Self {
            chain,
            store,
            config,
            contracts,
            metrics,
        }
    }

    fn cursor_key(&self) -> Vec<u8> {
        self.config.listener_id.as_bytes().to_vec()
    }

    fn load_cursor(&self) -> Result<Option<HeightRecord>, EngineError> {
        Ok(self
            .store
            .get(Column::Heights, &self.cursor_key())?
            .map(|bytes| bincode::deserialize(&bytes))
            .transpose()?)
    }

    fn persist_cursor(&self, height: u32, hash: UInt256) -> Result<(), EngineError> {
        let record = HeightRecord {
            last_ingested_height: height,
            last_hash: hash,
        };
        self.store
            .put(Column::Heights, &self.cursor_key(), &bincode::serialize(&record)?)?;
        Ok(())
    }

    /// Decides the first height to scan, verifying the stored hash
    /// against the chain and rewinding on mismatch.
    async fn resume_height(&self, tip_height: u32) -> u32 {
        let Some(cursor) = self.load_cursor().ok().flatten() else {
            // First boot: start at the tip, do not replay history.
            return tip_height;
        };

        let persisted = cursor.last_ingested_height;
        match self.chain.block_hash(persisted).await {
            Ok(hash) if hash == cursor.last_hash => persisted + 1,
            Ok(_) => {
                // Confirmed reorg at the persisted height.
                let rewound = persisted.saturating_sub(self.config.reorg_depth);
                self.metrics.reorg_rewinds.inc();
                warn!(persisted, rewound, "stored block hash mismatch, rewinding");
                rewound
            }
            Err(err) => {
                warn!(persisted, error = %err, "cannot verify stored hash, resuming in place");
                persisted + 1
            }
        }
    }

    /// Runs until shutdown. Events go out on `events`; every send applies
    /// backpressure from the bounded channel.
    pub async fn run(
        self,
        events: mpsc::Sender<DecodedEvent>,
        mut tips: watch::Receiver<ChainTip>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        // Wait for the first tip observation.
        let tip_height = loop {
            if let Some(height) = tips.borrow().height() {
                break height;
            }
            tokio::select! {
                changed = tips.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = shutdown.recv() => return,
            }
        };

        let mut next = self.resume_height(tip_height).await;
        let mut previous_hash: Option<UInt256> = None;
        let mut failures: u32 = 0;
        info!(start_height = next, "event listener started");

        loop {
            let tip = *tips.borrow();
            let caught_up = tip.height().map(|h| next > h).unwrap_or(true);

            if caught_up {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.idle_delay) => continue,
                    _ = shutdown.recv() => return,
                }
            }

            match self.ingest_block(next, previous_hash, &events, &mut shutdown).await {
                Ok(Some(block_hash)) => {
                    failures = 0;
                    previous_hash = Some(block_hash);
                    if let Err(err) = self.persist_cursor(next, block_hash) {
                        warn!(height = next, error = %err, "failed to persist cursor");
                    }
                    next += 1;
                }
                Ok(None) => {
                    // Reorg detected against the parent block.
                    let rewound = next.saturating_sub(self.config.reorg_depth);
                    self.metrics.reorg_rewinds.inc();
                    warn!(height = next, rewound, "parent hash mismatch, rewinding");
                    previous_hash = None;
                    next = rewound;
                }
                Err(EngineError::Chain(err)) if err.is_transient() => {
                    failures += 1;
                    let delay = backoff_delay(
                        failures - 1,
                        self.config.backoff_base,
                        self.config.backoff_cap,
                    );
                    warn!(height = next, error = %err, ?delay, "transient rpc failure");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => return,
                    }
                }
                Err(err) => {
                    failures += 1;
                    let delay = backoff_delay(
                        failures - 1,
                        self.config.backoff_base,
                        self.config.backoff_cap,
                    );
                    warn!(height = next, error = %err, ?delay, "block ingest failed");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => return,
                    }
                }
            }
        }
    }

    /// Ingests one block. Returns its hash, or `None` when the parent
    /// linkage does not match (reorg).
    async fn ingest_block(
        &self,
        height: u32,
        previous_hash: Option<UInt256>,
        events: &mpsc::Sender<DecodedEvent>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<Option<UInt256>, EngineError> {
        if let (Some(expected), Some(parent)) = (previous_hash, height.checked_sub(1)) {
            let actual = self.chain.block_hash(parent).await?;
            if actual != expected {
                return Ok(None);
            }
        }

        let block = self.chain.block_summary(height).await?;
        for tx_hash in &block.tx_hashes {
            let Some(log) = self.chain.application_log(tx_hash).await? else {
                continue;
            };
            let mut notification_index: u32 = 0;
            for execution in &log.executions {
                if execution.vm_state != VmState::Halt {
                    continue;
                }
                for notification in &execution.notifications {
                    let index = notification_index;
                    notification_index += 1;

                    if !self.contracts.contains(&notification.contract) {
                        continue;
                    }
                    let event = match decode_notification(notification) {
                        Ok(Some(event)) => event,
                        Ok(None) => {
                            self.metrics.unknown_events.inc();
                            continue;
                        }
                        Err(err) => {
                            self.metrics.decode_errors.inc();
                            warn!(height, %tx_hash, error = %err, "notification decode failed");
                            continue;
                        }
                    };

                    self.metrics.events_decoded.inc();
                    let decoded = DecodedEvent {
                        height,
                        block_hash: block.hash,
                        tx_hash: *tx_hash,
                        notification_index: index,
                        contract: notification.contract,
                        event,
                    };
                    tokio::select! {
                        sent = events.send(decoded) => {
                            if sent.is_err() {
                                // Consumer gone; treat as shutdown.
                                return Err(EngineError::Config("event channel closed".into()));
                            }
                        }
                        _ = shutdown.recv() => {
                            return Err(EngineError::Config("shutdown during ingest".into()));
                        }
                    }
                }
            }
        }
        debug!(height, txs = block.tx_hashes.len(), "block ingested");
        Ok(Some(block.hash))
    }
}
