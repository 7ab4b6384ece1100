//! Attested signing for the service layer.
//!
//! Every artifact the fleet produces is signed over a domain-prefixed
//! message (`domain ∥ 0x00 ∥ payload`) with the TEE-held P-256 key. The
//! [`ServiceSigner`] trait abstracts where that key lives: in-process for
//! development and simulation, or behind the remote attested signer RPC in
//! production. Attestation evidence is cached with a TTL and refreshed by
//! replacement, never mutated in place.

pub mod attestation;
pub mod error;
pub mod local;
pub mod remote;

pub use attestation::{Attestation, AttestationCache};
pub use error::SignerError;
pub use local::LocalSigner;
pub use remote::{RemoteSigner, RemoteSignerConfig};

use async_trait::async_trait;
use nsl_core::domain_message;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use std::sync::Arc;

/// A produced signature with the key material needed to verify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBundle {
    /// Raw 64-byte `r ∥ s` signature.
    pub signature: Vec<u8>,
    /// SEC1 compressed public key (33 bytes).
    pub public_key: Vec<u8>,
    pub key_version: u32,
}

/// Source of domain-prefixed ECDSA/P-256 signatures and attestation
/// evidence. Implementations are thread-safe and may be called
/// concurrently.
#[async_trait]
pub trait ServiceSigner: Send + Sync {
    /// Signs `domain ∥ 0x00 ∥ data`.
    async fn sign(&self, domain: &str, data: &[u8]) -> Result<SignatureBundle, SignerError>;

    /// Current attestation evidence, served from the TTL cache.
    async fn attestation(&self) -> Result<Arc<Attestation>, SignerError>;

    /// Decrypts bytes sealed to the signer-held key
    /// (confidential-compute inputs).
    async fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, SignerError>;
}

pub type SharedSigner = Arc<dyn ServiceSigner>;

/// Verifies a domain-prefixed signature against a SEC1 public key.
/// Pure; usable by external verifiers given only public values.
pub fn verify_signature(
    public_key: &[u8],
    domain: &str,
    data: &[u8],
    signature: &[u8],
) -> Result<bool, SignerError> {
    let key = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    let message = domain_message(domain, data);
    Ok(key.verify(&message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsl_core::DOMAIN_FULFILL;

    #[tokio::test]
    async fn sign_then_verify_round_trips() {
        let signer = LocalSigner::generate();
        let bundle = signer.sign(DOMAIN_FULFILL, b"payload").await.unwrap();
        assert_eq!(bundle.signature.len(), 64);
        assert_eq!(bundle.public_key.len(), 33);
        assert!(
            verify_signature(&bundle.public_key, DOMAIN_FULFILL, b"payload", &bundle.signature)
                .unwrap()
        );
    }

    #[tokio::test]
    async fn verify_rejects_cross_domain_replay() {
        let signer = LocalSigner::generate();
        let bundle = signer.sign("vrf:v1", b"payload").await.unwrap();
        assert!(
            !verify_signature(&bundle.public_key, DOMAIN_FULFILL, b"payload", &bundle.signature)
                .unwrap()
        );
    }

    #[tokio::test]
    async fn verify_rejects_tampered_payload() {
        let signer = LocalSigner::generate();
        let bundle = signer.sign(DOMAIN_FULFILL, b"payload").await.unwrap();
        assert!(
            !verify_signature(&bundle.public_key, DOMAIN_FULFILL, b"payloae", &bundle.signature)
                .unwrap()
        );
    }
}
