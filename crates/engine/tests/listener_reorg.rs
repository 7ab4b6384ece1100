//! Listener ordering, resume, and reorg-rewind behavior.

mod common;

use common::{gateway_hash, MockChain};
use nsl_chain::ChainTip;
use nsl_core::{ChainEvent, DecodedEvent, ServiceKind, ServiceRequestedEvent, UInt160};
use nsl_engine::{EventListener, ListenerConfig, Metrics};
use nsl_store::{MemoryStore, SharedStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};

fn requested_event(request_id: u64) -> ChainEvent {
    ChainEvent::ServiceRequested(ServiceRequestedEvent {
        request_id,
        app_id: "app".into(),
        kind: ServiceKind::Randomness,
        requester: UInt160::zero(),
        callback_contract: UInt160::zero(),
        callback_method: "cb".into(),
        payload: br#"{"seed":"00"}"#.to_vec(),
    })
}

struct Fixture {
    chain: Arc<MockChain>,
    events: mpsc::Receiver<DecodedEvent>,
    tips: watch::Sender<ChainTip>,
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl Fixture {
    async fn start(chain: Arc<MockChain>, store: SharedStore) -> Self {
        let listener = EventListener::new(
            Arc::clone(&chain) as nsl_chain::SharedChainClient,
            Arc::clone(&store),
            ListenerConfig {
                listener_id: "main".into(),
                contracts: vec![gateway_hash()],
                reorg_depth: 4,
                backoff_base: Duration::from_millis(20),
                backoff_cap: Duration::from_millis(100),
                idle_delay: Duration::from_millis(20),
            },
            Arc::new(Metrics::new().unwrap()),
        );

        let (events_tx, events_rx) = mpsc::channel(64);
        let (tips_tx, tips_rx) = watch::channel(ChainTip::unknown());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(listener.run(events_tx, tips_rx, shutdown_rx));

        Self {
            chain,
            events: events_rx,
            tips: tips_tx,
            shutdown: shutdown_tx,
            task,
        }
    }

    fn publish_tip(&self) {
        let _ = self.tips.send(ChainTip {
            block_count: self.chain.height() + 1,
            observed_at: Instant::now(),
        });
    }

    async fn next_event(&mut self) -> Option<DecodedEvent> {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .ok()
            .flatten()
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

fn request_ids(event: &DecodedEvent) -> u64 {
    match &event.event {
        ChainEvent::ServiceRequested(e) => e.request_id,
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn events_arrive_in_height_order() {
    let chain = MockChain::new();
    let store: SharedStore = Arc::new(MemoryStore::new());

    let mut fixture = Fixture::start(Arc::clone(&chain), Arc::clone(&store)).await;
    fixture.publish_tip();

    for id in 1..=3u64 {
        chain.push_block(vec![MockChain::notification(
            gateway_hash(),
            &requested_event(id),
        )]);
    }
    fixture.publish_tip();

    let mut heights = Vec::new();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let event = fixture.next_event().await.expect("event");
        heights.push(event.height);
        ids.push(request_ids(&event));
    }
    assert_eq!(ids, vec![1, 2, 3]);
    let mut sorted = heights.clone();
    sorted.sort_unstable();
    assert_eq!(heights, sorted, "heights are non-decreasing");

    fixture.stop().await;
}

#[tokio::test]
async fn restart_resumes_from_persisted_height() {
    let chain = MockChain::new();
    let store: SharedStore = Arc::new(MemoryStore::new());

    let mut fixture = Fixture::start(Arc::clone(&chain), Arc::clone(&store)).await;
    fixture.publish_tip();
    chain.push_block(vec![MockChain::notification(
        gateway_hash(),
        &requested_event(1),
    )]);
    fixture.publish_tip();
    assert_eq!(request_ids(&fixture.next_event().await.unwrap()), 1);
    // Let the cursor persist before stopping.
    tokio::time::sleep(Duration::from_millis(100)).await;
    fixture.stop().await;

    // New blocks land while the listener is down.
    chain.push_block(vec![MockChain::notification(
        gateway_hash(),
        &requested_event(2),
    )]);

    let mut fixture = Fixture::start(Arc::clone(&chain), Arc::clone(&store)).await;
    fixture.publish_tip();
    let event = fixture.next_event().await.expect("resumed event");
    assert_eq!(request_ids(&event), 2);
    fixture.stop().await;
}

#[tokio::test]
async fn reorg_rewinds_and_replays() {
    let chain = MockChain::new();
    let store: SharedStore = Arc::new(MemoryStore::new());

    let mut fixture = Fixture::start(Arc::clone(&chain), Arc::clone(&store)).await;
    fixture.publish_tip();

    for id in 1..=3u64 {
        chain.push_block(vec![MockChain::notification(
            gateway_hash(),
            &requested_event(id),
        )]);
    }
    fixture.publish_tip();
    for expected in 1..=3u64 {
        assert_eq!(request_ids(&fixture.next_event().await.unwrap()), expected);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    fixture.stop().await;

    // Reorg: block 2 onward replaced; request 2 is gone, 4 and 5 appear.
    chain.reorg_from(
        2,
        vec![
            vec![MockChain::notification(gateway_hash(), &requested_event(4))],
            vec![MockChain::notification(gateway_hash(), &requested_event(5))],
        ],
    );

    let mut fixture = Fixture::start(Arc::clone(&chain), Arc::clone(&store)).await;
    fixture.publish_tip();

    // The rewound scan re-emits surviving history plus the new branch;
    // duplicates are the consumer's (registry's) problem.
    let mut replayed = Vec::new();
    while let Some(event) = fixture.next_event().await {
        replayed.push(request_ids(&event));
        if replayed.ends_with(&[4, 5]) {
            break;
        }
    }
    assert!(replayed.contains(&4), "new branch block 2 replayed: {replayed:?}");
    assert!(replayed.contains(&5), "new branch block 3 replayed: {replayed:?}");
    assert!(!replayed.contains(&2), "orphaned event must not reappear");

    fixture.stop().await;
}
