//! Attestation evidence and its TTL cache.

use crate::error::SignerError;
use chrono::{DateTime, Utc};
use nsl_core::{sha256_hash, UInt256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Evidence binding the signing key to an enclave measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub key_version: u32,
    /// SEC1 compressed public key.
    #[serde(with = "nsl_core::payload::hex_bytes")]
    pub public_key: Vec<u8>,
    pub public_key_hash: UInt256,
    pub mr_enclave: [u8; 32],
    pub mr_signer: [u8; 32],
    #[serde(with = "nsl_core::payload::hex_bytes")]
    pub quote: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    /// True when no real enclave produced this evidence.
    pub simulated: bool,
}

impl Attestation {
    /// Hash committed into on-chain artifacts (`attestation_hash`).
    pub fn quote_hash(&self) -> UInt256 {
        sha256_hash(&self.quote)
    }

    /// Builds simulated evidence for a public key. Measurements are
    /// derived, stable per build tag, and clearly marked simulated.
    pub fn simulated(key_version: u32, public_key: &[u8]) -> Self {
        let mut mr_enclave = [0u8; 32];
        mr_enclave.copy_from_slice(&nsl_core::sha256(b"nsl-enclave-sim-v1"));
        let mut mr_signer = [0u8; 32];
        mr_signer.copy_from_slice(&nsl_core::sha256(b"nsl-signer-sim-v1"));

        let mut quote = Vec::with_capacity(96);
        quote.extend_from_slice(&mr_enclave);
        quote.extend_from_slice(&mr_signer);
        quote.extend_from_slice(&nsl_core::sha256(public_key));

        Self {
            key_version,
            public_key: public_key.to_vec(),
            public_key_hash: sha256_hash(public_key),
            mr_enclave,
            mr_signer,
            quote,
            timestamp: Utc::now(),
            simulated: true,
        }
    }
}

/// TTL cache with copy-on-refresh semantics: readers always hold a
/// consistent `Arc<Attestation>`; refresh swaps the slot wholesale.
pub struct AttestationCache {
    ttl: Duration,
    slot: RwLock<Option<(Arc<Attestation>, Instant)>>,
}

impl AttestationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Returns the cached evidence, or runs `fetch` and caches its result.
    /// Concurrent misses may fetch more than once; last write wins, which
    /// is harmless for idempotent evidence.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<Arc<Attestation>, SignerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Attestation, SignerError>>,
    {
        if let Some((cached, at)) = self.slot.read().clone() {
            if at.elapsed() < self.ttl {
                return Ok(cached);
            }
        }

        let fresh = Arc::new(fetch().await?);
        debug!(key_version = fresh.key_version, simulated = fresh.simulated, "attestation refreshed");
        *self.slot.write() = Some((Arc::clone(&fresh), Instant::now()));
        Ok(fresh)
    }

    /// Drops the cached entry so the next read refreshes.
    pub fn invalidate(&self) {
        *self.slot.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn cache_serves_until_ttl() {
        let cache = AttestationCache::new(Duration::from_secs(60));
        let fetches = AtomicUsize::new(0);

        for _ in 0..3 {
            let got = cache
                .get_or_refresh(|| async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(Attestation::simulated(1, &[2u8; 33]))
                })
                .await
                .unwrap();
            assert_eq!(got.key_version, 1);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let cache = AttestationCache::new(Duration::from_secs(60));
        let fetches = AtomicUsize::new(0);

        let fetch = || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Attestation::simulated(1, &[2u8; 33]))
        };
        cache.get_or_refresh(fetch).await.unwrap();
        cache.invalidate();
        cache
            .get_or_refresh(|| async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(Attestation::simulated(2, &[2u8; 33]))
            })
            .await
            .unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn simulated_evidence_is_marked() {
        let att = Attestation::simulated(3, &[2u8; 33]);
        assert!(att.simulated);
        assert_eq!(att.public_key_hash, sha256_hash(&[2u8; 33]));
        assert!(!att.quote_hash().is_zero());
    }
}
