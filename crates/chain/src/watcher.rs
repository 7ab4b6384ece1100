// Copyright (C) 2015-2025 The Neo Project.
//
// watcher.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! Block-tip watcher.

use crate::{ChainClient, SharedChainClient};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// Latest observed chain tip.
#[derive(Debug, Clone, Copy)]
pub struct ChainTip {
    /// Block count (tip height + 1); zero until the first poll lands.
    pub block_count: u32,
    pub observed_at: Instant,
}

impl ChainTip {
    pub fn unknown() -> Self {
        Self {
            block_count: 0,
            observed_at: Instant::now(),
        }
    }

    /// Tip height (`block_count - 1`), once known.
    pub fn height(&self) -> Option<u32> {
        self.block_count.checked_sub(1)
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.block_count == 0 || self.observed_at.elapsed() > threshold
    }
}

/// Polls `getblockcount` and publishes the tip on a watch channel.
pub struct TipWatcher {
    chain: SharedChainClient,
    poll_interval: Duration,
    sender: watch::Sender<ChainTip>,
}

impl TipWatcher {
    pub fn new(chain: SharedChainClient, poll_interval: Duration) -> Self {
        let (sender, _) = watch::channel(ChainTip::unknown());
        Self {
            chain,
            poll_interval,
            sender,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChainTip> {
        self.sender.subscribe()
    }

    /// Runs until the shutdown signal fires. Poll failures keep the last
    /// published tip; staleness is the readiness signal.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.chain.block_count().await {
                        Ok(block_count) => {
                            debug!(block_count, "observed chain tip");
                            let _ = self.sender.send(ChainTip {
                                block_count,
                                observed_at: Instant::now(),
                            });
                        }
                        Err(err) => {
                            warn!(error = %err, "tip poll failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    debug!("tip watcher stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainError;
    use crate::models::{BlockSummary, RpcApplicationLog, RpcInvokeResult};
    use crate::ChainClient;
    use async_trait::async_trait;
    use nsl_core::{UInt160, UInt256};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingChain {
        height: AtomicU32,
    }

    #[async_trait]
    impl ChainClient for CountingChain {
        async fn block_count(&self) -> Result<u32, ChainError> {
            Ok(self.height.fetch_add(1, Ordering::SeqCst) + 1)
        }
        async fn block_hash(&self, _index: u32) -> Result<UInt256, ChainError> {
            Ok(UInt256::zero())
        }
        async fn block_summary(&self, index: u32) -> Result<BlockSummary, ChainError> {
            Ok(BlockSummary {
                hash: UInt256::zero(),
                index,
                time_ms: 0,
                tx_hashes: vec![],
            })
        }
        async fn application_log(
            &self,
            _tx_hash: &UInt256,
        ) -> Result<Option<RpcApplicationLog>, ChainError> {
            Ok(None)
        }
        async fn invoke_script(
            &self,
            _script: &[u8],
            _signer: Option<UInt160>,
        ) -> Result<RpcInvokeResult, ChainError> {
            unimplemented!("not used")
        }
        async fn send_raw_transaction(&self, _raw: &[u8]) -> Result<UInt256, ChainError> {
            unimplemented!("not used")
        }
    }

    #[tokio::test]
    async fn publishes_monotonic_tips_until_shutdown() {
        let chain = Arc::new(CountingChain {
            height: AtomicU32::new(10),
        });
        let watcher = TipWatcher::new(chain, Duration::from_millis(10));
        let mut tips = watcher.subscribe();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(watcher.run(shutdown_rx));

        tips.changed().await.unwrap();
        let first = *tips.borrow();
        tips.changed().await.unwrap();
        let second = *tips.borrow();
        assert!(second.block_count > first.block_count);
        assert!(!second.is_stale(Duration::from_secs(5)));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn unknown_tip_is_stale() {
        assert!(ChainTip::unknown().is_stale(Duration::from_secs(60)));
    }
}
