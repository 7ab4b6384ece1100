//! Shared fixtures: an in-memory chain and engine configuration.

use async_trait::async_trait;
use nsl_chain::{
    BlockSummary, ChainClient, ChainError, RpcApplicationLog, RpcExecution, RpcInvokeResult,
    RpcNotification, StackValue, VmState,
};
use nsl_config::{
    EngineConfig, NetworkConfig, ServiceLayerConfig, SubmitterConfig,
};
use nsl_core::{sha256_hash, ChainEvent, ServiceKind, UInt160, UInt256};
use nsl_engine::encode_event;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub fn gateway_hash() -> UInt160 {
    UInt160::parse("0xd2a4cff31913016155e38e474a2c06d08be276cf").unwrap()
}

/// One transaction broadcast through the mock chain.
#[derive(Debug, Clone)]
pub struct SentTx {
    pub tx_hash: UInt256,
    pub script: Vec<u8>,
}

impl SentTx {
    pub fn calls(&self, method: &str) -> bool {
        self.script
            .windows(method.len())
            .any(|w| w == method.as_bytes())
    }
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<BlockSummary>,
    logs: HashMap<UInt256, RpcApplicationLog>,
    sent: Vec<SentTx>,
    /// Exceptions consumed one per broadcast; that transaction FAULTs.
    fault_queue: std::collections::VecDeque<String>,
}

/// In-memory Neo chain: pushes blocks with notifications, accepts and
/// instantly executes transactions with HALT.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        let chain = Arc::new(Self::default());
        chain.push_block(vec![]); // genesis
        chain
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().sent.clone()
    }

    /// Makes the next broadcast execute with a FAULT carrying
    /// `exception`.
    pub fn fault_next_send(&self, exception: &str) {
        self.state
            .lock()
            .fault_queue
            .push_back(exception.to_string());
    }

    pub fn height(&self) -> u32 {
        self.state.lock().blocks.len() as u32 - 1
    }

    fn block_hash_for(height: u32, salt: u8) -> UInt256 {
        let mut material = vec![salt];
        material.extend_from_slice(&height.to_be_bytes());
        sha256_hash(&material)
    }

    /// Appends a block carrying one transaction whose application log
    /// holds the given notifications.
    pub fn push_block(&self, notifications: Vec<RpcNotification>) -> u32 {
        self.push_block_salted(notifications, 0)
    }

    pub fn push_block_salted(&self, notifications: Vec<RpcNotification>, salt: u8) -> u32 {
        let mut state = self.state.lock();
        let height = state.blocks.len() as u32;
        let block_hash = Self::block_hash_for(height, salt);

        let mut tx_hashes = Vec::new();
        if !notifications.is_empty() {
            let mut material = b"tx".to_vec();
            material.extend_from_slice(block_hash.as_bytes());
            let tx_hash = sha256_hash(&material);
            tx_hashes.push(tx_hash);
            state.logs.insert(
                tx_hash,
                RpcApplicationLog {
                    tx_hash,
                    executions: vec![RpcExecution {
                        trigger: "Application".into(),
                        vm_state: VmState::Halt,
                        exception: None,
                        gas_consumed: 100,
                        notifications,
                    }],
                },
            );
        }

        state.blocks.push(BlockSummary {
            hash: block_hash,
            index: height,
            time_ms: 1_700_000_000_000 + height as u64 * 15_000,
            tx_hashes,
        });
        height
    }

    /// Replaces blocks from `from_height` (a reorg) and re-appends with a
    /// different salt.
    pub fn reorg_from(&self, from_height: u32, notifications_per_block: Vec<Vec<RpcNotification>>) {
        {
            let mut state = self.state.lock();
            state.blocks.truncate(from_height as usize);
        }
        for notifications in notifications_per_block {
            self.push_block_salted(notifications, 7);
        }
    }

    /// Gateway notification for a typed event.
    pub fn notification(contract: UInt160, event: &ChainEvent) -> RpcNotification {
        RpcNotification {
            contract,
            event_name: event.name().to_string(),
            state: encode_event(event),
        }
    }

    pub fn push_service_requested(
        &self,
        request_id: u64,
        kind: ServiceKind,
        payload: serde_json::Value,
    ) -> u32 {
        let event = ChainEvent::ServiceRequested(nsl_core::ServiceRequestedEvent {
            request_id,
            app_id: "test-app".into(),
            kind,
            requester: UInt160::zero(),
            callback_contract: UInt160::zero(),
            callback_method: "onResult".into(),
            payload: payload.to_string().into_bytes(),
        });
        self.push_block(vec![Self::notification(gateway_hash(), &event)])
    }
}

fn read_var_int(raw: &[u8], cursor: &mut usize) -> u64 {
    let first = raw[*cursor];
    *cursor += 1;
    match first {
        0xFD => {
            let v = u16::from_le_bytes(raw[*cursor..*cursor + 2].try_into().unwrap());
            *cursor += 2;
            v as u64
        }
        0xFE => {
            let v = u32::from_le_bytes(raw[*cursor..*cursor + 4].try_into().unwrap());
            *cursor += 4;
            v as u64
        }
        0xFF => {
            let v = u64::from_le_bytes(raw[*cursor..*cursor + 8].try_into().unwrap());
            *cursor += 8;
            v
        }
        small => small as u64,
    }
}

/// Splits a serialized transaction into its unsigned prefix and script.
fn parse_raw_tx(raw: &[u8]) -> (usize, Vec<u8>) {
    let mut cursor = 1 + 4 + 8 + 8 + 4; // version, nonce, fees, vub
    let signers = read_var_int(raw, &mut cursor);
    cursor += signers as usize * 21;
    let attributes = read_var_int(raw, &mut cursor);
    cursor += attributes as usize;
    let script_len = read_var_int(raw, &mut cursor) as usize;
    let script = raw[cursor..cursor + script_len].to_vec();
    cursor += script_len;
    (cursor, script)
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_count(&self) -> Result<u32, ChainError> {
        Ok(self.state.lock().blocks.len() as u32)
    }

    async fn block_hash(&self, index: u32) -> Result<UInt256, ChainError> {
        self.state
            .lock()
            .blocks
            .get(index as usize)
            .map(|b| b.hash)
            .ok_or_else(|| ChainError::NotFound(format!("block {index}")))
    }

    async fn block_summary(&self, index: u32) -> Result<BlockSummary, ChainError> {
        self.state
            .lock()
            .blocks
            .get(index as usize)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("block {index}")))
    }

    async fn application_log(
        &self,
        tx_hash: &UInt256,
    ) -> Result<Option<RpcApplicationLog>, ChainError> {
        Ok(self.state.lock().logs.get(tx_hash).cloned())
    }

    async fn invoke_script(
        &self,
        _script: &[u8],
        _signer: Option<UInt160>,
    ) -> Result<RpcInvokeResult, ChainError> {
        Ok(RpcInvokeResult {
            state: VmState::Halt,
            gas_consumed: 100_000,
            exception: None,
            stack: vec![StackValue::Integer(1)],
        })
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<UInt256, ChainError> {
        let (unsigned_end, script) = parse_raw_tx(raw);
        let tx_hash = sha256_hash(&raw[..unsigned_end]);

        let mut state = self.state.lock();
        state.sent.push(SentTx { tx_hash, script });
        // The transaction executes in the next block: HALT unless a
        // fault is queued.
        let fault = state.fault_queue.pop_front();
        let height = state.blocks.len() as u32;
        state.logs.insert(
            tx_hash,
            RpcApplicationLog {
                tx_hash,
                executions: vec![RpcExecution {
                    trigger: "Application".into(),
                    vm_state: if fault.is_some() {
                        VmState::Fault
                    } else {
                        VmState::Halt
                    },
                    exception: fault,
                    gas_consumed: 100_000,
                    notifications: vec![],
                }],
            },
        );
        state.blocks.push(BlockSummary {
            hash: MockChain::block_hash_for(height, 0),
            index: height,
            time_ms: 1_700_000_000_000 + height as u64 * 15_000,
            tx_hashes: vec![tx_hash],
        });
        Ok(tx_hash)
    }
}

/// Fast-timer configuration for tests.
pub fn test_config(allowlist: Vec<String>) -> ServiceLayerConfig {
    ServiceLayerConfig {
        network: NetworkConfig {
            rpc_endpoints: vec!["http://unused.localhost:10332".into()],
            network_magic: 0x4E454F54,
            gateway_contract: gateway_hash(),
            service_contracts: HashMap::new(),
        },
        engine: EngineConfig {
            worker_pool_width: 4,
            // Wide enough for tests to adjust upstream mocks between
            // attempts.
            retry_base_ms: 1_500,
            retry_cap_ms: 3_000,
            lease_duration_ms: 30_000,
            max_attempts: 6,
            reorg_depth: 4,
            ..EngineConfig::default()
        },
        handlers: {
            let mut handlers = nsl_config::HandlerConfig::default();
            handlers.url_allowlist = allowlist;
            handlers.oracle_http_timeout_secs = 5;
            handlers
        },
        submitter: SubmitterConfig {
            submit_timeout_secs: 5,
            max_submit_attempts: 3,
            submit_parallelism: 8,
        },
        datafeed: Default::default(),
        automation: Default::default(),
        storage: Default::default(),
        ops: Default::default(),
        supervisor: {
            let mut supervisor = nsl_config::SupervisorConfig::default();
            supervisor.shutdown_grace_secs = 5;
            supervisor.lease_sweep_secs = 1;
            supervisor
        },
    }
}

/// Polls until `predicate` holds or the timeout passes.
pub async fn wait_for<F>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
