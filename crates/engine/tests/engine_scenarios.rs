//! End-to-end engine scenarios against an in-memory chain.

mod common;

use common::{gateway_hash, test_config, wait_for, MockChain};
use nsl_core::{sha256_hash, RequestStatus, ServiceKind};
use nsl_engine::Engine;
use nsl_signer::LocalSigner;
use nsl_store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

async fn start_engine(
    chain: Arc<MockChain>,
    allowlist: Vec<String>,
) -> (Arc<Engine>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let signer = Arc::new(LocalSigner::generate());
    let engine = Engine::new(
        test_config(allowlist),
        Arc::clone(&store) as nsl_store::SharedStore,
        chain,
        signer,
    )
    .unwrap();
    engine.start().await.unwrap();
    (engine, store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oracle_request_is_fulfilled_end_to_end() {
    let mut upstream = mockito::Server::new_async().await;
    let _m = upstream
        .mock("GET", "/api")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"price":"12345"}"#)
        .create_async()
        .await;

    let chain = MockChain::new();
    let (engine, _store) = start_engine(
        Arc::clone(&chain),
        vec![upstream.host_with_port()],
    )
    .await;

    chain.push_service_requested(
        42,
        ServiceKind::Oracle,
        serde_json::json!({
            "url": format!("{}/api", upstream.url()),
            "method": "GET",
            "json_path": "$.price",
        }),
    );

    let registry = Arc::clone(engine.registry());
    assert!(
        wait_for(Duration::from_secs(10), || {
            registry
                .get(42)
                .ok()
                .flatten()
                .is_some_and(|r| r.status == RequestStatus::Fulfilled)
        })
        .await,
        "request 42 should reach fulfilled"
    );

    let record = registry.get(42).unwrap().unwrap();
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.result_hash, Some(sha256_hash(b"12345")));
    assert!(record.tx_hash.is_some());

    let fulfillments: Vec<_> = chain
        .sent()
        .into_iter()
        .filter(|tx| tx.calls("fulfillRequest"))
        .collect();
    assert_eq!(fulfillments.len(), 1, "exactly one on-chain fulfillment");
    assert_eq!(Some(fulfillments[0].tx_hash), record.tx_hash);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn denied_oracle_url_fails_without_http() {
    let mut upstream = mockito::Server::new_async().await;
    let never_hit = upstream
        .mock("GET", "/api")
        .expect(0)
        .create_async()
        .await;

    let chain = MockChain::new();
    // Allowlist covers a different host entirely.
    let (engine, _store) = start_engine(Arc::clone(&chain), vec!["allowed.example".into()]).await;

    chain.push_service_requested(
        43,
        ServiceKind::Oracle,
        serde_json::json!({
            "url": format!("{}/api", upstream.url()),
            "json_path": "$.price",
        }),
    );

    let registry = Arc::clone(engine.registry());
    assert!(
        wait_for(Duration::from_secs(10), || {
            registry
                .get(43)
                .ok()
                .flatten()
                .is_some_and(|r| r.status == RequestStatus::Failed)
        })
        .await
    );

    let record = registry.get(43).unwrap().unwrap();
    assert!(record
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("url_not_allowlisted"));
    assert!(chain.sent().iter().any(|tx| tx.calls("failRequest")));
    assert!(!chain.sent().iter().any(|tx| tx.calls("fulfillRequest")));
    never_hit.assert_async().await;

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transient_upstream_failure_retries_then_succeeds() {
    let mut upstream = mockito::Server::new_async().await;
    let flaky = upstream
        .mock("GET", "/api")
        .with_status(503)
        .create_async()
        .await;

    let chain = MockChain::new();
    let (engine, _store) = start_engine(
        Arc::clone(&chain),
        vec![upstream.host_with_port()],
    )
    .await;

    chain.push_service_requested(
        44,
        ServiceKind::Oracle,
        serde_json::json!({
            "url": format!("{}/api", upstream.url()),
            "json_path": "$.price",
        }),
    );

    let registry = Arc::clone(engine.registry());
    // First attempt lands a 503 and releases the row.
    assert!(
        wait_for(Duration::from_secs(10), || {
            registry
                .get(44)
                .ok()
                .flatten()
                .is_some_and(|r| r.attempt_count >= 1 && r.last_error.is_some())
        })
        .await
    );

    // Upstream recovers: a later-defined mock takes precedence.
    flaky.remove_async().await;
    let _ok = upstream
        .mock("GET", "/api")
        .with_status(200)
        .with_body(r#"{"price":"67890"}"#)
        .create_async()
        .await;

    assert!(
        wait_for(Duration::from_secs(10), || {
            registry
                .get(44)
                .ok()
                .flatten()
                .is_some_and(|r| r.status == RequestStatus::Fulfilled)
        })
        .await,
        "request should succeed after retry"
    );

    let record = registry.get(44).unwrap().unwrap();
    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.result_hash, Some(sha256_hash(b"67890")));
    let fulfillments = chain
        .sent()
        .into_iter()
        .filter(|tx| tx.calls("fulfillRequest"))
        .count();
    assert_eq!(fulfillments, 1, "a single on-chain fulfillment");

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn randomness_request_is_fulfilled() {
    let chain = MockChain::new();
    let (engine, _store) = start_engine(Arc::clone(&chain), vec![]).await;

    chain.push_service_requested(
        45,
        ServiceKind::Randomness,
        serde_json::json!({ "seed": "deadbeef", "num_words": 2 }),
    );

    let registry = Arc::clone(engine.registry());
    assert!(
        wait_for(Duration::from_secs(10), || {
            registry
                .get(45)
                .ok()
                .flatten()
                .is_some_and(|r| r.status == RequestStatus::Fulfilled)
        })
        .await
    );
    assert!(chain.sent().iter().any(|tx| tx.calls("fulfillRequest")));

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_payload_fails_before_any_io() {
    let chain = MockChain::new();
    let (engine, _store) = start_engine(Arc::clone(&chain), vec!["allowed.example".into()]).await;

    // 2 KiB over the randomness payload limit.
    let big_seed = "ab".repeat(ServiceKind::Randomness.payload_limit());
    chain.push_service_requested(
        46,
        ServiceKind::Randomness,
        serde_json::json!({ "seed": big_seed }),
    );

    let registry = Arc::clone(engine.registry());
    assert!(
        wait_for(Duration::from_secs(10), || {
            registry
                .get(46)
                .ok()
                .flatten()
                .is_some_and(|r| r.status == RequestStatus::Failed)
        })
        .await
    );
    let record = registry.get(46).unwrap().unwrap();
    assert_eq!(record.last_error.as_deref(), Some("payload_too_large"));

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_event_delivery_is_deduplicated() {
    let mut upstream = mockito::Server::new_async().await;
    let _m = upstream
        .mock("GET", "/api")
        .with_status(200)
        .with_body(r#"{"v":"1"}"#)
        .create_async()
        .await;

    let chain = MockChain::new();
    let (engine, _store) = start_engine(
        Arc::clone(&chain),
        vec![upstream.host_with_port()],
    )
    .await;

    let payload = serde_json::json!({
        "url": format!("{}/api", upstream.url()),
        "json_path": "$.v",
    });
    chain.push_service_requested(50, ServiceKind::Oracle, payload.clone());

    let registry = Arc::clone(engine.registry());
    assert!(
        wait_for(Duration::from_secs(10), || {
            registry
                .get(50)
                .ok()
                .flatten()
                .is_some_and(|r| r.status == RequestStatus::Fulfilled)
        })
        .await
    );

    // The same request appears again (reorg replay shape): it must not
    // be re-fulfilled.
    chain.push_service_requested(50, ServiceKind::Oracle, payload);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let record = registry.get(50).unwrap().unwrap();
    assert_eq!(record.status, RequestStatus::Fulfilled);
    assert_eq!(record.attempt_count, 1);
    let fulfillments = chain
        .sent()
        .into_iter()
        .filter(|tx| tx.calls("fulfillRequest"))
        .count();
    assert_eq!(fulfillments, 1);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn trigger_registration_creates_active_trigger() {
    let chain = MockChain::new();
    let (engine, store) = start_engine(Arc::clone(&chain), vec![]).await;

    chain.push_service_requested(
        60,
        ServiceKind::Automation,
        serde_json::json!({
            "action": "register",
            "condition": {"kind": "time", "interval_ms": 60_000},
            "callback_contract": gateway_hash().to_string(),
            "callback_method": "onTick",
            "max_executions": 1,
        }),
    );

    let registry = Arc::clone(engine.registry());
    assert!(
        wait_for(Duration::from_secs(10), || {
            registry
                .get(60)
                .ok()
                .flatten()
                .is_some_and(|r| r.status == RequestStatus::Fulfilled)
        })
        .await
    );

    // The trigger row exists under the request id.
    let raw = nsl_store::Store::get(
        store.as_ref(),
        nsl_store::Column::Triggers,
        &60u64.to_be_bytes(),
    )
    .unwrap();
    assert!(raw.is_some(), "trigger row persisted");

    engine.stop().await;
}
