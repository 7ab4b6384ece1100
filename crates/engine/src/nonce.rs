//! Per-key-version monotonic nonce allocation.
//!
//! The counter is persisted before any signature covering the nonce is
//! requested, so a crash can only burn nonces, never reuse one. The
//! on-chain contract rejects replays; this store is the local side of
//! that barrier. Allocation serializes through one critical section;
//! contention is bounded by submit parallelism.

use crate::error::EngineError;
use nsl_store::{Column, SharedStore, Store};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpentRecord {
    first_seen_at_ms: u64,
    spent_at_ms: Option<u64>,
}

pub struct NonceStore {
    store: SharedStore,
    allocation: Mutex<()>,
}

fn counter_key(key_version: u32) -> [u8; 5] {
    let mut key = [0xC0u8; 5];
    key[1..5].copy_from_slice(&key_version.to_be_bytes());
    key
}

fn value_key(key_version: u32, value: u64) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(&key_version.to_be_bytes());
    key[4..].copy_from_slice(&value.to_be_bytes());
    key
}

impl NonceStore {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            allocation: Mutex::new(()),
        }
    }

    /// Allocates the next nonce for a key version and persists both the
    /// counter and the nonce row before returning.
    pub async fn allocate(&self, key_version: u32, now_ms: u64) -> Result<u64, EngineError> {
        let _guard = self.allocation.lock().await;
        let key = counter_key(key_version);
        let current = match self.store.get(Column::Nonces, &key)? {
            Some(bytes) => u64::from_be_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| EngineError::Codec("nonce counter width".into()))?,
            ),
            None => 0,
        };
        let next = current + 1;
        self.store
            .put(Column::Nonces, &key, &next.to_be_bytes())?;
        let record = SpentRecord {
            first_seen_at_ms: now_ms,
            spent_at_ms: None,
        };
        self.store.put(
            Column::Nonces,
            &value_key(key_version, next),
            &bincode::serialize(&record)?,
        )?;
        Ok(next)
    }

    /// Marks a nonce spent once its submission confirmed.
    pub fn mark_spent(&self, key_version: u32, value: u64, now_ms: u64) -> Result<(), EngineError> {
        let key = value_key(key_version, value);
        let mut record = match self.store.get(Column::Nonces, &key)? {
            Some(bytes) => bincode::deserialize::<SpentRecord>(&bytes)?,
            None => SpentRecord {
                first_seen_at_ms: now_ms,
                spent_at_ms: None,
            },
        };
        record.spent_at_ms = Some(now_ms);
        self.store
            .put(Column::Nonces, &key, &bincode::serialize(&record)?)?;
        Ok(())
    }

    pub fn is_spent(&self, key_version: u32, value: u64) -> Result<bool, EngineError> {
        Ok(self
            .store
            .get(Column::Nonces, &value_key(key_version, value))?
            .map(|bytes| bincode::deserialize::<SpentRecord>(&bytes))
            .transpose()?
            .is_some_and(|r| r.spent_at_ms.is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsl_store::MemoryStore;
    use std::sync::Arc;

    fn nonce_store() -> NonceStore {
        NonceStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn allocation_is_strictly_monotonic() {
        let nonces = nonce_store();
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(nonces.allocate(1, 0).await.unwrap());
        }
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(seen, sorted, "nonces must never repeat or regress");
        assert_eq!(seen.first(), Some(&1));
    }

    #[tokio::test]
    async fn key_versions_have_independent_counters() {
        let nonces = nonce_store();
        assert_eq!(nonces.allocate(1, 0).await.unwrap(), 1);
        assert_eq!(nonces.allocate(2, 0).await.unwrap(), 1);
        assert_eq!(nonces.allocate(1, 0).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_allocations_never_collide() {
        let nonces = Arc::new(nonce_store());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let nonces = Arc::clone(&nonces);
            handles.push(tokio::spawn(async move {
                nonces.allocate(7, 0).await.unwrap()
            }));
        }
        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 32);
    }

    #[tokio::test]
    async fn spent_tracking() {
        let nonces = nonce_store();
        let n = nonces.allocate(1, 10).await.unwrap();
        assert!(!nonces.is_spent(1, n).unwrap());
        nonces.mark_spent(1, n, 20).unwrap();
        assert!(nonces.is_spent(1, n).unwrap());
    }
}
