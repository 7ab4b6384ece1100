//! Engine assembly and lifecycle.
//!
//! One `Engine` value owns every component. Components start in
//! dependency order, share a single shutdown signal, and stop in reverse
//! order within the configured grace period. No loop starts without a
//! registered stop path.

use crate::automation::TriggerScheduler;
use crate::datafeed::FeedScheduler;
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::handlers::{
    Allowlist, AutomationHandler, ConfidentialHandler, HandlerSet, MixerHandler, OracleHandler,
    RandomnessHandler,
};
use crate::listener::{EventListener, ListenerConfig};
use crate::metrics::Metrics;
use crate::now_ms;
use crate::registry::RequestRegistry;
use crate::submitter::Submitter;
use async_trait::async_trait;
use nsl_chain::{
    ChainError, ChainTip, SharedChainClient, TipWatcher, TransactionSender, WitnessSigner,
};
use nsl_config::ServiceLayerConfig;
use nsl_core::{DecodedEvent, FailReason, DOMAIN_TX_WITNESS};
use nsl_signer::{ServiceSigner, SharedSigner};
use nsl_store::SharedStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Interval between chain tip polls.
const TIP_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Interval between retention GC passes.
const GC_INTERVAL: Duration = Duration::from_secs(3_600);
/// Interval between mixer refund sweeps.
const REFUND_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Adapts the service signer to transaction witness production.
struct ServiceWitness {
    signer: SharedSigner,
}

#[async_trait]
impl WitnessSigner for ServiceWitness {
    async fn public_key(&self) -> Result<Vec<u8>, ChainError> {
        let attestation = self
            .signer
            .attestation()
            .await
            .map_err(|e| ChainError::Witness(e.to_string()))?;
        Ok(attestation.public_key.clone())
    }

    async fn sign_witness(&self, sign_data: &[u8]) -> Result<Vec<u8>, ChainError> {
        let bundle = self
            .signer
            .sign(DOMAIN_TX_WITNESS, sign_data)
            .await
            .map_err(|e| ChainError::Witness(e.to_string()))?;
        Ok(bundle.signature)
    }
}

/// Point-in-time readiness view, served at `GET /ready`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub started: bool,
    pub signer_attested: bool,
    pub tip_height: Option<u32>,
    pub tip_stale: bool,
    pub components: Vec<(&'static str, bool)>,
}

pub struct Engine {
    config: ServiceLayerConfig,
    store: SharedStore,
    chain: SharedChainClient,
    signer: SharedSigner,
    metrics: Arc<Metrics>,
    registry: Arc<RequestRegistry>,
    handlers: Arc<HandlerSet>,
    submitter: Arc<Submitter>,
    dispatcher: Arc<Dispatcher>,
    feeds: Arc<FeedScheduler>,
    automation: Arc<TriggerScheduler>,
    tips: watch::Receiver<ChainTip>,
    tip_watcher: Mutex<Option<TipWatcher>>,
    event_tee: broadcast::Sender<DecodedEvent>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    started: AtomicBool,
    attested: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(
        config: ServiceLayerConfig,
        store: SharedStore,
        chain: SharedChainClient,
        signer: SharedSigner,
    ) -> Result<Arc<Self>, EngineError> {
        let metrics = Arc::new(Metrics::new()?);

        let tip_watcher = TipWatcher::new(Arc::clone(&chain), TIP_POLL_INTERVAL);
        let tips = tip_watcher.subscribe();

        let witness = Arc::new(ServiceWitness {
            signer: Arc::clone(&signer),
        });
        let sender = Arc::new(TransactionSender::new(
            Arc::clone(&chain),
            witness,
            config.network.network_magic,
        ));

        let registry = RequestRegistry::new(Arc::clone(&store), config.engine.max_attempts);
        let submitter = Submitter::new(
            Arc::clone(&sender),
            Arc::clone(&signer),
            Arc::clone(&store),
            config.network.gateway_contract,
            config.submitter.clone(),
            Arc::clone(&metrics),
        );

        let handlers = Arc::new(HandlerSet {
            oracle: OracleHandler::new(
                Allowlist::new(config.handlers.url_allowlist.clone()),
                Duration::from_secs(config.handlers.oracle_http_timeout_secs),
            ),
            randomness: RandomnessHandler::new(Arc::clone(&signer)),
            mixer: MixerHandler::new(
                Arc::clone(&store),
                Arc::clone(&signer),
                Arc::clone(&metrics),
            ),
            confidential: ConfidentialHandler::new(Arc::clone(&signer)),
            automation: AutomationHandler::new(Arc::clone(&store)),
        });

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&handlers),
            Arc::clone(&submitter),
            config.engine.clone(),
            config.handlers.clone(),
            tips.clone(),
            Arc::clone(&metrics),
        );

        let feeds = FeedScheduler::new(
            Arc::clone(&sender),
            Arc::clone(&signer),
            Arc::clone(&store),
            config.service_contract("datafeed"),
            config.datafeed.clone(),
            Arc::clone(&metrics),
        );

        let automation = TriggerScheduler::new(
            Arc::clone(&store),
            Arc::clone(&submitter),
            Arc::clone(&sender),
            Arc::clone(&feeds),
            Duration::from_secs(config.automation.tick_interval_secs.max(1)),
            Arc::clone(&metrics),
        );

        let (event_tee, _) = broadcast::channel(config.engine.event_channel_capacity.max(16));
        let (shutdown, _) = broadcast::channel(8);

        Ok(Arc::new(Self {
            config,
            store,
            chain,
            signer,
            metrics,
            registry,
            handlers,
            submitter,
            dispatcher,
            feeds,
            automation,
            tips,
            tip_watcher: Mutex::new(Some(tip_watcher)),
            event_tee,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            attested: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn spawn(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.lock().push((name, handle));
    }

    /// Starts every component in dependency order:
    /// store → chain (tip watcher) → signer warm-up → registry →
    /// listener → dispatcher → schedulers.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.registry.rebuild_index()?;

        // Chain tip watcher.
        let watcher = self
            .tip_watcher
            .lock()
            .take()
            .ok_or_else(|| EngineError::Config("engine already started once".into()))?;
        self.spawn(
            "tip_watcher",
            tokio::spawn(watcher.run(self.shutdown.subscribe())),
        );

        // Signer warm-up: readiness requires attested evidence.
        {
            let signer = Arc::clone(&self.signer);
            let attested = Arc::clone(&self.attested);
            let mut shutdown = self.shutdown.subscribe();
            self.spawn(
                "signer_warmup",
                tokio::spawn(async move {
                    loop {
                        match signer.attestation().await {
                            Ok(attestation) => {
                                info!(
                                    key_version = attestation.key_version,
                                    simulated = attestation.simulated,
                                    "signer attested"
                                );
                                attested.store(true, Ordering::SeqCst);
                                return;
                            }
                            Err(err) => {
                                warn!(error = %err, "attestation warm-up failed, retrying");
                            }
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(10)) => {}
                            _ = shutdown.recv() => return,
                        }
                    }
                }),
            );
        }

        // Event listener feeding the dispatcher.
        let (events_tx, events_rx) =
            mpsc::channel::<DecodedEvent>(self.config.engine.event_channel_capacity.max(16));
        let mut contracts = vec![self.config.network.gateway_contract];
        contracts.extend(self.config.network.service_contracts.values().copied());
        let listener = EventListener::new(
            Arc::clone(&self.chain),
            Arc::clone(&self.store),
            ListenerConfig {
                listener_id: "main".into(),
                contracts,
                reorg_depth: self.config.engine.reorg_depth,
                backoff_base: Duration::from_millis(nsl_config::DEFAULT_LISTENER_BACKOFF_BASE_MS),
                backoff_cap: Duration::from_millis(nsl_config::DEFAULT_LISTENER_BACKOFF_CAP_MS),
                idle_delay: Duration::from_secs(1),
            },
            Arc::clone(&self.metrics),
        );
        self.spawn(
            "event_listener",
            tokio::spawn(listener.run(
                events_tx,
                self.tips.clone(),
                self.shutdown.subscribe(),
            )),
        );

        // Dispatcher: ingest loop, workers, deadline watcher.
        self.spawn(
            "dispatcher_ingest",
            tokio::spawn(Arc::clone(&self.dispatcher).run_ingest(
                events_rx,
                self.event_tee.clone(),
                self.shutdown.subscribe(),
            )),
        );
        for worker in 0..self.config.engine.worker_pool_width {
            self.spawn(
                "worker",
                tokio::spawn(Arc::clone(&self.dispatcher).run_worker(
                    format!("worker-{worker}"),
                    self.shutdown.subscribe(),
                )),
            );
        }
        self.spawn(
            "deadline_watcher",
            tokio::spawn(
                Arc::clone(&self.dispatcher).run_deadline_watcher(self.shutdown.subscribe()),
            ),
        );

        // Registry lease sweep.
        {
            let registry = Arc::clone(&self.registry);
            let mut shutdown = self.shutdown.subscribe();
            let interval = Duration::from_secs(self.config.supervisor.lease_sweep_secs.max(1));
            self.spawn(
                "lease_sweep",
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                if let Err(err) = registry.sweep_expired_leases(now_ms()) {
                                    warn!(error = %err, "lease sweep failed");
                                }
                            }
                            _ = shutdown.recv() => return,
                        }
                    }
                }),
            );
        }

        // Terminal-row retention GC.
        {
            let registry = Arc::clone(&self.registry);
            let retention_ms = self.config.engine.retention_days * 24 * 3_600 * 1_000;
            let mut shutdown = self.shutdown.subscribe();
            self.spawn(
                "retention_gc",
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(GC_INTERVAL);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                match registry.gc_terminal(retention_ms, now_ms()) {
                                    Ok(collected) if collected > 0 => {
                                        info!(collected, "terminal requests collected");
                                    }
                                    Ok(_) => {}
                                    Err(err) => warn!(error = %err, "retention gc failed"),
                                }
                            }
                            _ = shutdown.recv() => return,
                        }
                    }
                }),
            );
        }

        // Mixer refund sweep.
        {
            let handlers = Arc::clone(&self.handlers);
            let submitter = Arc::clone(&self.submitter);
            let tips = self.tips.clone();
            let window = self.config.handlers.mixer_safety_window_blocks;
            let mut shutdown = self.shutdown.subscribe();
            self.spawn(
                "mixer_refund_sweep",
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(REFUND_SWEEP_INTERVAL);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                let Some(height) = tips.borrow().height() else { continue };
                                match handlers.mixer.sweep_refunds(height, window) {
                                    Ok(refunds) => {
                                        for request_id in refunds {
                                            if let Err(err) = submitter
                                                .fail(request_id, FailReason::RefundDeadline)
                                                .await
                                            {
                                                warn!(request_id, ?err, "refund submission failed");
                                            }
                                        }
                                    }
                                    Err(err) => warn!(error = %err, "refund sweep failed"),
                                }
                            }
                            _ = shutdown.recv() => return,
                        }
                    }
                }),
            );
        }

        // Data-feed scheduler.
        self.spawn(
            "datafeed",
            tokio::spawn(Arc::clone(&self.feeds).run(self.shutdown.subscribe())),
        );

        // Automation scheduler.
        self.spawn(
            "automation",
            tokio::spawn(Arc::clone(&self.automation).run(
                self.event_tee.subscribe(),
                self.shutdown.subscribe(),
            )),
        );

        info!(
            workers = self.config.engine.worker_pool_width,
            feeds = self.config.datafeed.feeds.len(),
            "engine started"
        );
        Ok(())
    }

    /// Stops components in reverse start order within the grace period.
    pub async fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(());

        let grace = Duration::from_secs(self.config.supervisor.shutdown_grace_secs.max(1));
        let deadline = tokio::time::Instant::now() + grace;

        let mut tasks = {
            let mut guard = self.tasks.lock();
            std::mem::take(&mut *guard)
        };
        while let Some((name, handle)) = tasks.pop() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_panic() => error!(component = name, "component panicked"),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(component = name, "did not stop within grace, aborting");
                }
            }
        }
        info!("engine stopped");
    }

    pub fn readiness(&self) -> ReadinessReport {
        let tip = *self.tips.borrow();
        let tip_stale = tip.is_stale(Duration::from_secs(
            self.config.supervisor.tip_staleness_secs,
        ));
        let started = self.started.load(Ordering::SeqCst);
        let attested = self.attested.load(Ordering::SeqCst);

        let components: Vec<(&'static str, bool)> = self
            .tasks
            .lock()
            .iter()
            .map(|(name, handle)| (*name, !handle.is_finished()))
            .collect();
        let components_live = components
            .iter()
            .all(|(name, live)| *live || *name == "signer_warmup");

        ReadinessReport {
            ready: started && attested && !tip_stale && components_live,
            started,
            signer_attested: attested,
            tip_height: tip.height(),
            tip_stale,
            components,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn feeds(&self) -> &Arc<FeedScheduler> {
        &self.feeds
    }

    pub fn signer(&self) -> &SharedSigner {
        &self.signer
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServiceLayerConfig {
        &self.config
    }
}
