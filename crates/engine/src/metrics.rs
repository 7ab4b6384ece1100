//! Engine-level Prometheus counters.

use crate::error::EngineError;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Counters and gauges exposed at `GET /metrics`.
pub struct Metrics {
    registry: Registry,
    pub events_decoded: IntCounter,
    pub unknown_events: IntCounter,
    pub decode_errors: IntCounter,
    pub reorg_rewinds: IntCounter,
    pub requests_fulfilled: IntCounter,
    pub requests_failed: IntCounter,
    pub requests_expired: IntCounter,
    pub requests_released: IntCounter,
    pub handler_panics: IntCounter,
    pub submit_retries: IntCounter,
    pub feed_updates: IntCounter,
    pub feed_ticks_skipped: IntCounter,
    pub trigger_fires: IntCounter,
    pub funds_violations: IntCounter,
    pub inflight_requests: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, EngineError> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    pub fn new() -> Result<Self, EngineError> {
        let registry = Registry::new();
        let inflight_requests =
            IntGauge::with_opts(Opts::new("nsl_inflight_requests", "requests currently leased"))?;
        registry.register(Box::new(inflight_requests.clone()))?;

        Ok(Self {
            events_decoded: counter(&registry, "nsl_events_decoded_total", "decoded chain events")?,
            unknown_events: counter(
                &registry,
                "nsl_unknown_events_total",
                "notifications with unknown event names",
            )?,
            decode_errors: counter(
                &registry,
                "nsl_decode_errors_total",
                "notifications that failed positional decoding",
            )?,
            reorg_rewinds: counter(&registry, "nsl_reorg_rewinds_total", "listener reorg rewinds")?,
            requests_fulfilled: counter(
                &registry,
                "nsl_requests_fulfilled_total",
                "requests completed as fulfilled",
            )?,
            requests_failed: counter(
                &registry,
                "nsl_requests_failed_total",
                "requests completed as failed",
            )?,
            requests_expired: counter(
                &registry,
                "nsl_requests_expired_total",
                "requests expired past their deadline",
            )?,
            requests_released: counter(
                &registry,
                "nsl_requests_released_total",
                "transient releases back to pending",
            )?,
            handler_panics: counter(&registry, "nsl_handler_panics_total", "handler panics caught")?,
            submit_retries: counter(
                &registry,
                "nsl_submit_retries_total",
                "fulfillment submissions retried with a fresh nonce",
            )?,
            feed_updates: counter(&registry, "nsl_feed_updates_total", "on-chain price updates")?,
            feed_ticks_skipped: counter(
                &registry,
                "nsl_feed_ticks_skipped_total",
                "feed ticks skipped for lack of sources",
            )?,
            trigger_fires: counter(&registry, "nsl_trigger_fires_total", "automation trigger fires")?,
            funds_violations: counter(
                &registry,
                "nsl_funds_violations_total",
                "mixer funds-invariant violations",
            )?,
            inflight_requests,
            registry,
        })
    }

    /// Prometheus text exposition.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
