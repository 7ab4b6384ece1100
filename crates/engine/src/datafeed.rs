//! Data-feed scheduler.
//!
//! Per enabled feed, every tick: fetch all sources, drop stale and
//! outlier samples, take the weighted median, and push an update on chain
//! when the price moved past the deviation threshold or the heartbeat
//! elapsed. Round ids are strictly monotonic per feed and survive
//! restarts through the store.

use crate::error::EngineError;
use crate::handlers::json_path;
use crate::metrics::Metrics;
use crate::now_ms;
use nsl_chain::{ContractParameter, TransactionSender};
use nsl_config::{DataFeedConfig, FeedConfig, FeedSourceConfig};
use nsl_core::{feed_update_message, sha256, UInt160, DOMAIN_FEED_UPDATE};
use nsl_signer::{ServiceSigner, SharedSigner};
use nsl_store::{Column, SharedStore, Store};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Latest aggregated price for one pair, cached for the automation
/// scheduler and the price read proxy.
#[derive(Debug, Clone, Serialize)]
pub struct PriceSnapshot {
    pub pair: String,
    pub price: u64,
    pub decimals: u32,
    pub round_id: u64,
    pub source_prices: Vec<(String, u64)>,
    pub signed_at_ms: u64,
    pub key_version: u32,
    /// Signature over the canonical feed-update message; lets off-chain
    /// consumers verify the proxyed price.
    #[serde(with = "nsl_core::payload::hex_bytes")]
    pub signature: Vec<u8>,
}

/// Persisted per-feed submission state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FeedCursor {
    last_price: u64,
    last_submitted_at_ms: u64,
    round_id: u64,
}

#[derive(Debug, Clone)]
struct Sample {
    source: String,
    price: u64,
    weight: f64,
    fetched_at_ms: u64,
}

pub struct FeedScheduler {
    http: reqwest::Client,
    sender: Arc<TransactionSender>,
    signer: SharedSigner,
    store: SharedStore,
    /// Data-feed contract; feeds run in observe-only mode without one.
    contract: Option<UInt160>,
    config: DataFeedConfig,
    metrics: Arc<Metrics>,
    cache: RwLock<HashMap<String, Arc<PriceSnapshot>>>,
}

fn cursor_key(pair: &str) -> Vec<u8> {
    let mut key = b"feed:".to_vec();
    key.extend_from_slice(pair.as_bytes());
    key
}

/// Weighted median over `(price, weight)` pairs sorted by price.
fn weighted_median(samples: &mut [(u64, f64)]) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by_key(|(price, _)| *price);
    let total: f64 = samples.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }
    let mut accumulated = 0.0;
    for (price, weight) in samples.iter() {
        accumulated += weight;
        if accumulated >= total / 2.0 {
            return Some(*price);
        }
    }
    samples.last().map(|(price, _)| *price)
}

fn mean_and_std(prices: &[u64]) -> (f64, f64) {
    let n = prices.len() as f64;
    let mean = prices.iter().map(|p| *p as f64).sum::<f64>() / n;
    let variance = prices
        .iter()
        .map(|p| {
            let d = *p as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

impl FeedScheduler {
    pub fn new(
        sender: Arc<TransactionSender>,
        signer: SharedSigner,
        store: SharedStore,
        contract: Option<UInt160>,
        config: DataFeedConfig,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            http,
            sender,
            signer,
            store,
            contract,
            config,
            metrics,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Latest snapshot for a pair, if any tick has aggregated one.
    pub fn latest(&self, pair: &str) -> Option<Arc<PriceSnapshot>> {
        self.cache.read().get(pair).cloned()
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.update_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for feed in self.config.feeds.clone() {
                        if !feed.is_enabled() {
                            continue;
                        }
                        if let Err(err) = self.tick_feed(&feed).await {
                            warn!(pair = %feed.pair, error = %err, "feed tick failed");
                        }
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }

    async fn fetch_source(&self, feed: &FeedConfig, source: &FeedSourceConfig) -> Option<Sample> {
        let price = match (&source.contract, &source.method) {
            (Some(contract), Some(method)) => self.fetch_onchain(source, contract, method).await,
            _ => self.fetch_http(feed, source).await,
        };
        let Some(price) = price else {
            // Primary (priority 0) sources failing deserves attention.
            if source.priority == 0 {
                warn!(source = %source.name, pair = %feed.pair, "primary source unusable");
            }
            return None;
        };
        Some(Sample {
            source: source.name.clone(),
            price,
            weight: source.weight.max(0.0),
            fetched_at_ms: now_ms(),
        })
    }

    /// On-chain oracle read: the method leaves the scaled price on top
    /// of the stack.
    async fn fetch_onchain(
        &self,
        source: &FeedSourceConfig,
        contract: &nsl_core::UInt160,
        method: &str,
    ) -> Option<u64> {
        match self.sender.test_invoke(contract, method, &[]).await {
            Ok(result) => result.stack.first().and_then(|item| item.as_u64()),
            Err(err) => {
                debug!(source = %source.name, error = %err, "on-chain source read failed");
                None
            }
        }
    }

    async fn fetch_http(&self, feed: &FeedConfig, source: &FeedSourceConfig) -> Option<u64> {
        let url = source.url.as_ref()?;
        let path = source.json_path.as_ref()?;
        let request = self
            .http
            .get(url)
            .timeout(Duration::from_millis(source.timeout_ms));
        let response = match request.send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(source = %source.name, status = %response.status(), "source rejected");
                return None;
            }
            Err(err) => {
                debug!(source = %source.name, error = %err, "source unreachable");
                return None;
            }
        };
        let document: serde_json::Value = response.json().await.ok()?;
        let value = json_path::evaluate(&document, path)?;
        let price_f64 = match value {
            serde_json::Value::Number(n) => n.as_f64()?,
            serde_json::Value::String(s) => s.parse::<f64>().ok()?,
            _ => return None,
        };
        if !price_f64.is_finite() || price_f64 <= 0.0 {
            return None;
        }
        let scaled = (price_f64 * 10f64.powi(feed.decimals as i32)).round();
        if scaled < 1.0 || scaled > u64::MAX as f64 {
            return None;
        }
        Some(scaled as u64)
    }

    fn load_cursor(&self, pair: &str) -> Result<FeedCursor, EngineError> {
        Ok(self
            .store
            .get(Column::Meta, &cursor_key(pair))?
            .map(|bytes| bincode::deserialize(&bytes))
            .transpose()?
            .unwrap_or_default())
    }

    fn persist_cursor(&self, pair: &str, cursor: &FeedCursor) -> Result<(), EngineError> {
        self.store
            .put(Column::Meta, &cursor_key(pair), &bincode::serialize(cursor)?)?;
        Ok(())
    }

    /// Runs one evaluation for a feed: fetch, filter, aggregate, gate,
    /// submit.
    pub async fn tick_feed(&self, feed: &FeedConfig) -> Result<(), EngineError> {
        // Fetch all sources concurrently; failures just drop out.
        let fetches = feed
            .sources
            .iter()
            .map(|source| self.fetch_source(feed, source));
        let samples: Vec<Sample> = futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect();

        let now = now_ms();
        let max_age_ms = self.config.max_sample_age_secs * 1_000;
        let fresh: Vec<&Sample> = samples
            .iter()
            .filter(|s| now.saturating_sub(s.fetched_at_ms) <= max_age_ms)
            .collect();

        // Outlier rejection around the unweighted median band.
        let prices: Vec<u64> = fresh.iter().map(|s| s.price).collect();
        let filtered: Vec<&Sample> = if prices.len() >= 3 {
            let (_, std) = mean_and_std(&prices);
            let mut sorted = prices.clone();
            sorted.sort_unstable();
            let median = sorted[sorted.len() / 2] as f64;
            let band = self.config.outlier_std * std;
            fresh
                .iter()
                .copied()
                .filter(|s| std == 0.0 || (s.price as f64 - median).abs() <= band)
                .collect()
        } else {
            fresh.clone()
        };

        if filtered.len() < self.config.min_sources {
            self.metrics.feed_ticks_skipped.inc();
            warn!(
                pair = %feed.pair,
                usable = filtered.len(),
                required = self.config.min_sources,
                "tick skipped, not enough usable sources"
            );
            return Ok(());
        }

        let mut weighted: Vec<(u64, f64)> =
            filtered.iter().map(|s| (s.price, s.weight)).collect();
        let Some(aggregated) = weighted_median(&mut weighted) else {
            self.metrics.feed_ticks_skipped.inc();
            return Ok(());
        };

        let mut cursor = self.load_cursor(&feed.pair)?;
        let deviation_hit = cursor.last_price == 0
            || (aggregated.abs_diff(cursor.last_price) as f64 / cursor.last_price as f64)
                >= self.config.deviation_threshold;
        let heartbeat_hit =
            now.saturating_sub(cursor.last_submitted_at_ms) >= self.config.heartbeat_secs * 1_000;

        if !deviation_hit && !heartbeat_hit {
            debug!(pair = %feed.pair, price = aggregated, "within deviation, no update");
            return Ok(());
        }

        cursor.round_id += 1;
        let timestamp = now / 1_000;
        let message = feed_update_message(&feed.pair, cursor.round_id, aggregated, timestamp);
        let bundle = self.signer.sign(DOMAIN_FEED_UPDATE, &message).await?;
        let attestation = self.signer.attestation().await?;

        let source_names: Vec<&str> = {
            let mut names: Vec<&str> = filtered.iter().map(|s| s.source.as_str()).collect();
            names.sort_unstable();
            names
        };
        let source_set_id = sha256(source_names.join(",").as_bytes());

        if let Some(contract) = self.contract {
            let parameters = [
                ContractParameter::String(feed.pair.clone()),
                ContractParameter::Int(cursor.round_id as i64),
                ContractParameter::Int(aggregated as i64),
                ContractParameter::Int(timestamp as i64),
                ContractParameter::Bytes(attestation.quote_hash().as_bytes().to_vec()),
                ContractParameter::Bytes(source_set_id.to_vec()),
            ];
            let pending = self
                .sender
                .invoke(&contract, "updatePrice", &parameters)
                .await?;
            self.sender
                .wait_for_execution(
                    &pending.tx_hash,
                    Duration::from_secs(60),
                    Duration::from_secs(2),
                )
                .await?;
            info!(
                pair = %feed.pair,
                round_id = cursor.round_id,
                price = aggregated,
                tx_hash = %pending.tx_hash,
                "price update confirmed"
            );
        } else {
            info!(
                pair = %feed.pair,
                round_id = cursor.round_id,
                price = aggregated,
                "price aggregated (no feed contract configured)"
            );
        }

        cursor.last_price = aggregated;
        cursor.last_submitted_at_ms = now;
        self.persist_cursor(&feed.pair, &cursor)?;
        self.metrics.feed_updates.inc();

        let snapshot = Arc::new(PriceSnapshot {
            pair: feed.pair.clone(),
            price: aggregated,
            decimals: feed.decimals,
            round_id: cursor.round_id,
            source_prices: filtered
                .iter()
                .map(|s| (s.source.clone(), s.price))
                .collect(),
            signed_at_ms: now,
            key_version: bundle.key_version,
            signature: bundle.signature,
        });
        self.cache.write().insert(feed.pair.clone(), snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_median_respects_weights() {
        let mut samples = vec![(100u64, 1.0), (200, 1.0), (300, 10.0)];
        assert_eq!(weighted_median(&mut samples), Some(300));

        let mut samples = vec![(100u64, 1.0), (200, 1.0), (300, 1.0)];
        assert_eq!(weighted_median(&mut samples), Some(200));

        let mut empty: Vec<(u64, f64)> = vec![];
        assert_eq!(weighted_median(&mut empty), None);
    }

    #[test]
    fn std_dev_of_identical_prices_is_zero() {
        let (mean, std) = mean_and_std(&[100, 100, 100]);
        assert_eq!(mean, 100.0);
        assert_eq!(std, 0.0);
    }
}
