//! Data-feed aggregation and submission gating.

mod common;

use async_trait::async_trait;
use common::{gateway_hash, MockChain};
use nsl_chain::{ChainError, TransactionSender, WitnessSigner};
use nsl_config::{DataFeedConfig, FeedConfig, FeedSourceConfig};
use nsl_engine::{FeedScheduler, Metrics};
use nsl_signer::{LocalSigner, ServiceSigner, SharedSigner};
use nsl_store::{MemoryStore, SharedStore};
use std::sync::Arc;
use std::time::Duration;

struct TestWitness {
    signer: SharedSigner,
}

#[async_trait]
impl WitnessSigner for TestWitness {
    async fn public_key(&self) -> Result<Vec<u8>, ChainError> {
        let att = self
            .signer
            .attestation()
            .await
            .map_err(|e| ChainError::Witness(e.to_string()))?;
        Ok(att.public_key.clone())
    }

    async fn sign_witness(&self, sign_data: &[u8]) -> Result<Vec<u8>, ChainError> {
        let bundle = self
            .signer
            .sign("tx:witness", sign_data)
            .await
            .map_err(|e| ChainError::Witness(e.to_string()))?;
        Ok(bundle.signature)
    }
}

fn source(name: &str, url: String) -> FeedSourceConfig {
    FeedSourceConfig {
        name: name.into(),
        url: Some(url),
        json_path: Some("$.price".into()),
        contract: None,
        method: None,
        weight: 1.0,
        timeout_ms: 2_000,
        priority: 0,
    }
}

fn feed(sources: Vec<FeedSourceConfig>) -> FeedConfig {
    FeedConfig {
        pair: "BTC-USD".into(),
        decimals: 2,
        sources,
        enabled: None,
    }
}

fn scheduler(
    chain: Arc<MockChain>,
    config: DataFeedConfig,
) -> (Arc<FeedScheduler>, SharedStore) {
    let signer: SharedSigner = Arc::new(LocalSigner::generate());
    let store: SharedStore = Arc::new(MemoryStore::new());
    let witness = Arc::new(TestWitness {
        signer: Arc::clone(&signer),
    });
    let sender = Arc::new(TransactionSender::new(
        chain as nsl_chain::SharedChainClient,
        witness,
        0x4E454F54,
    ));
    let feeds = FeedScheduler::new(
        sender,
        signer,
        Arc::clone(&store),
        Some(gateway_hash()),
        config,
        Arc::new(Metrics::new().unwrap()),
    );
    (feeds, store)
}

fn feed_config(heartbeat_secs: u64) -> DataFeedConfig {
    DataFeedConfig {
        update_interval_secs: 60,
        deviation_threshold: 0.005,
        heartbeat_secs,
        max_sample_age_secs: 300,
        outlier_std: 3.0,
        min_sources: 2,
        feeds: vec![],
    }
}

fn update_count(chain: &MockChain) -> usize {
    chain
        .sent()
        .iter()
        .filter(|tx| tx.calls("updatePrice"))
        .count()
}

#[tokio::test]
async fn deviation_gate_suppresses_small_moves() {
    let mut server = mockito::Server::new_async().await;
    let price_a = server
        .mock("GET", "/a")
        .with_body(r#"{"price":"100.00"}"#)
        .create_async()
        .await;
    let _price_b = server
        .mock("GET", "/b")
        .with_body(r#"{"price":"100.00"}"#)
        .create_async()
        .await;

    let chain = MockChain::new();
    let (feeds, _store) = scheduler(Arc::clone(&chain), feed_config(3_600));
    let feed = feed(vec![
        source("a", format!("{}/a", server.url())),
        source("b", format!("{}/b", server.url())),
    ]);

    // First tick always submits (no prior price).
    feeds.tick_feed(&feed).await.unwrap();
    assert_eq!(update_count(&chain), 1);
    let first = feeds.latest("BTC-USD").unwrap();
    assert_eq!(first.round_id, 1);
    assert_eq!(first.price, 10_000); // 100.00 at 2 decimals

    // Unchanged price inside the deviation threshold: no submission.
    feeds.tick_feed(&feed).await.unwrap();
    assert_eq!(update_count(&chain), 1);

    // 0.1% move still under the 0.5% threshold: no submission.
    price_a.remove_async().await;
    let _moved = server
        .mock("GET", "/a")
        .with_body(r#"{"price":"100.10"}"#)
        .create_async()
        .await;
    feeds.tick_feed(&feed).await.unwrap();
    assert_eq!(update_count(&chain), 1);
}

#[tokio::test]
async fn large_move_submits_with_increasing_round() {
    let mut server = mockito::Server::new_async().await;
    let price_a = server
        .mock("GET", "/a")
        .with_body(r#"{"price":"100.00"}"#)
        .create_async()
        .await;
    let price_b = server
        .mock("GET", "/b")
        .with_body(r#"{"price":"100.00"}"#)
        .create_async()
        .await;

    let chain = MockChain::new();
    let (feeds, _store) = scheduler(Arc::clone(&chain), feed_config(3_600));
    let feed = feed(vec![
        source("a", format!("{}/a", server.url())),
        source("b", format!("{}/b", server.url())),
    ]);

    feeds.tick_feed(&feed).await.unwrap();
    assert_eq!(feeds.latest("BTC-USD").unwrap().round_id, 1);

    // 2% move crosses the deviation threshold.
    price_a.remove_async().await;
    price_b.remove_async().await;
    let _a = server
        .mock("GET", "/a")
        .with_body(r#"{"price":"102.00"}"#)
        .create_async()
        .await;
    let _b = server
        .mock("GET", "/b")
        .with_body(r#"{"price":"102.00"}"#)
        .create_async()
        .await;

    feeds.tick_feed(&feed).await.unwrap();
    assert_eq!(update_count(&chain), 2);
    let snapshot = feeds.latest("BTC-USD").unwrap();
    assert_eq!(snapshot.round_id, 2, "round ids are strictly monotonic");
    assert_eq!(snapshot.price, 10_200);
}

#[tokio::test]
async fn heartbeat_forces_submission_without_deviation() {
    let mut server = mockito::Server::new_async().await;
    let _a = server
        .mock("GET", "/a")
        .with_body(r#"{"price":"100.00"}"#)
        .create_async()
        .await;
    let _b = server
        .mock("GET", "/b")
        .with_body(r#"{"price":"100.00"}"#)
        .create_async()
        .await;

    let chain = MockChain::new();
    // One-second heartbeat for the test.
    let (feeds, _store) = scheduler(Arc::clone(&chain), feed_config(1));
    let feed = feed(vec![
        source("a", format!("{}/a", server.url())),
        source("b", format!("{}/b", server.url())),
    ]);

    feeds.tick_feed(&feed).await.unwrap();
    assert_eq!(update_count(&chain), 1);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    feeds.tick_feed(&feed).await.unwrap();
    assert_eq!(update_count(&chain), 2, "heartbeat elapsed, same price submits");
    assert_eq!(feeds.latest("BTC-USD").unwrap().round_id, 2);
}

#[tokio::test]
async fn tick_skips_below_min_sources() {
    let mut server = mockito::Server::new_async().await;
    let _a = server
        .mock("GET", "/a")
        .with_body(r#"{"price":"100.00"}"#)
        .create_async()
        .await;
    let _b = server
        .mock("GET", "/b")
        .with_status(503)
        .create_async()
        .await;

    let chain = MockChain::new();
    let (feeds, _store) = scheduler(Arc::clone(&chain), feed_config(3_600));
    let feed = feed(vec![
        source("a", format!("{}/a", server.url())),
        source("b", format!("{}/b", server.url())),
    ]);

    feeds.tick_feed(&feed).await.unwrap();
    assert_eq!(update_count(&chain), 0, "one usable source of two required");
    assert!(feeds.latest("BTC-USD").is_none());
}

#[tokio::test]
async fn outliers_are_rejected_before_the_median() {
    let mut server = mockito::Server::new_async().await;
    let _a = server
        .mock("GET", "/a")
        .with_body(r#"{"price":"100.00"}"#)
        .create_async()
        .await;
    let _b = server
        .mock("GET", "/b")
        .with_body(r#"{"price":"100.20"}"#)
        .create_async()
        .await;
    let _c = server
        .mock("GET", "/c")
        .with_body(r#"{"price":"4000.00"}"#)
        .create_async()
        .await;

    let chain = MockChain::new();
    let mut config = feed_config(3_600);
    config.outlier_std = 1.0;
    let (feeds, _store) = scheduler(Arc::clone(&chain), config);
    let feed = feed(vec![
        source("a", format!("{}/a", server.url())),
        source("b", format!("{}/b", server.url())),
        source("c", format!("{}/c", server.url())),
    ]);

    feeds.tick_feed(&feed).await.unwrap();
    let snapshot = feeds.latest("BTC-USD").unwrap();
    assert!(
        snapshot.price <= 10_020,
        "wild source must not drag the aggregate: {}",
        snapshot.price
    );
    assert_eq!(snapshot.source_prices.len(), 2);
}
