//! In-process signer for development and simulation runs.

use crate::attestation::{Attestation, AttestationCache};
use crate::error::SignerError;
use crate::{ServiceSigner, SignatureBundle};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use nsl_core::domain_message;
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

/// AES-GCM nonce length for sealed blobs (`nonce ∥ ciphertext`).
const SEAL_NONCE_LEN: usize = 12;

/// Signer holding the P-256 key in process memory. Attestation evidence is
/// simulated; production deployments use [`crate::RemoteSigner`].
pub struct LocalSigner {
    key: SigningKey,
    sealing_key: Zeroizing<[u8; 32]>,
    key_version: u32,
    cache: AttestationCache,
}

impl LocalSigner {
    pub fn new(key: SigningKey, key_version: u32, attestation_ttl: Duration) -> Self {
        let sealing_key = Self::derive_sealing_key(&key);
        Self {
            key,
            sealing_key,
            key_version,
            cache: AttestationCache::new(attestation_ttl),
        }
    }

    /// Generates a fresh random key, version 1.
    pub fn generate() -> Self {
        Self::new(SigningKey::random(&mut OsRng), 1, Duration::from_secs(3600))
    }

    /// Loads a hex-encoded P-256 scalar.
    pub fn from_hex(key_hex: &str, key_version: u32, attestation_ttl: Duration) -> Result<Self, SignerError> {
        let bytes = Zeroizing::new(
            hex::decode(key_hex.trim().strip_prefix("0x").unwrap_or(key_hex.trim()))
                .map_err(|e| SignerError::InvalidKey(e.to_string()))?,
        );
        let key =
            SigningKey::from_slice(&bytes).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key, key_version, attestation_ttl))
    }

    /// SEC1 compressed public key bytes.
    pub fn public_key(&self) -> Vec<u8> {
        self.key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    /// Seals plaintext to this signer's key. Counterpart of `unseal`,
    /// used by tests and the dev tooling that prepares confidential
    /// inputs.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SignerError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.sealing_key.as_ref()));
        let mut nonce = [0u8; SEAL_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| SignerError::Unseal(e.to_string()))?;
        let mut out = Vec::with_capacity(SEAL_NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn derive_sealing_key(key: &SigningKey) -> Zeroizing<[u8; 32]> {
        let scalar = Zeroizing::new(key.to_bytes());
        let mut material = Zeroizing::new(Vec::with_capacity(40));
        material.extend_from_slice(b"nsl:seal");
        material.extend_from_slice(scalar.as_slice());
        Zeroizing::new(nsl_core::sha256(&material))
    }
}

#[async_trait]
impl ServiceSigner for LocalSigner {
    async fn sign(&self, domain: &str, data: &[u8]) -> Result<SignatureBundle, SignerError> {
        let message = domain_message(domain, data);
        let signature: Signature = self.key.sign(&message);
        Ok(SignatureBundle {
            signature: signature.to_bytes().to_vec(),
            public_key: self.public_key(),
            key_version: self.key_version,
        })
    }

    async fn attestation(&self) -> Result<Arc<Attestation>, SignerError> {
        let key_version = self.key_version;
        let public_key = self.public_key();
        self.cache
            .get_or_refresh(|| async move { Ok(Attestation::simulated(key_version, &public_key)) })
            .await
    }

    async fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, SignerError> {
        if sealed.len() <= SEAL_NONCE_LEN {
            return Err(SignerError::Unseal("sealed blob too short".into()));
        }
        let (nonce, ciphertext) = sealed.split_at(SEAL_NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.sealing_key.as_ref()));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SignerError::Unseal("authentication failed".into()))
    }
}
