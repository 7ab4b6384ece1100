//! Remote attested signer client.
//!
//! Speaks the Signer RPC: `POST /sign` with a domain and hex payload,
//! `GET /attestation` for evidence, `POST /unseal` for confidential
//! inputs. Transient failures retry a bounded number of times; the caller
//! decides what a final failure means for the request.

use crate::attestation::{Attestation, AttestationCache};
use crate::error::SignerError;
use crate::{ServiceSigner, SignatureBundle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nsl_core::{sha256_hash, UInt256};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RemoteSignerConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub attestation_ttl: Duration,
}

pub struct RemoteSigner {
    http: reqwest::Client,
    config: RemoteSignerConfig,
    cache: AttestationCache,
}

#[derive(Deserialize)]
struct SignResponse {
    signature_hex: String,
    pubkey_hex: String,
    key_version: u32,
}

#[derive(Deserialize)]
struct UnsealResponse {
    plaintext_hex: String,
}

#[derive(Deserialize)]
struct AttestationResponse {
    key_version: u32,
    pubkey_hex: String,
    #[serde(default)]
    pubkey_hash: Option<String>,
    quote: String,
    mrenclave: String,
    mrsigner: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    simulated: bool,
}

impl RemoteSigner {
    pub fn new(config: RemoteSignerConfig) -> Result<Self, SignerError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SignerError::Rpc(e.to_string()))?;
        let cache = AttestationCache::new(config.attestation_ttl);
        Ok(Self {
            http,
            config,
            cache,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    /// POSTs JSON with bounded retries on transient failures.
    async fn post_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, SignerError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            match self.post_once(path, body).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(path, attempt, error = %err, "signer rpc retrying");
                    last = err.to_string();
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(SignerError::Unavailable {
                        attempts,
                        last: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        Err(SignerError::Unavailable { attempts, last })
    }

    async fn post_once<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, SignerError> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| SignerError::Rpc(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SignerError::Rpc(format!("malformed response: {e}")))
    }

    async fn fetch_attestation(&self) -> Result<Attestation, SignerError> {
        let response = self
            .http
            .get(self.url("attestation"))
            .send()
            .await
            .map_err(|e| SignerError::Attestation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignerError::Attestation(format!("status {status}")));
        }
        let wire: AttestationResponse = response
            .json()
            .await
            .map_err(|e| SignerError::Attestation(format!("malformed evidence: {e}")))?;

        let public_key = decode_hex(&wire.pubkey_hex, "pubkey")?;
        let public_key_hash = match wire.pubkey_hash.as_deref() {
            Some(h) => UInt256::parse(h).map_err(|e| SignerError::Attestation(e.to_string()))?,
            None => sha256_hash(&public_key),
        };

        debug!(key_version = wire.key_version, simulated = wire.simulated, "fetched attestation");
        Ok(Attestation {
            key_version: wire.key_version,
            public_key,
            public_key_hash,
            mr_enclave: decode_measurement(&wire.mrenclave, "mrenclave")?,
            mr_signer: decode_measurement(&wire.mrsigner, "mrsigner")?,
            quote: decode_hex(&wire.quote, "quote")?,
            timestamp: wire.timestamp,
            simulated: wire.simulated,
        })
    }
}

fn decode_hex(value: &str, field: &str) -> Result<Vec<u8>, SignerError> {
    hex::decode(value.strip_prefix("0x").unwrap_or(value))
        .map_err(|e| SignerError::Attestation(format!("{field}: {e}")))
}

fn decode_measurement(value: &str, field: &str) -> Result<[u8; 32], SignerError> {
    let bytes = decode_hex(value, field)?;
    bytes
        .try_into()
        .map_err(|_| SignerError::Attestation(format!("{field}: not 32 bytes")))
}

#[async_trait]
impl ServiceSigner for RemoteSigner {
    async fn sign(&self, domain: &str, data: &[u8]) -> Result<SignatureBundle, SignerError> {
        let body = serde_json::json!({
            "domain": domain,
            "data_hex": hex::encode(data),
        });
        let wire: SignResponse = self.post_with_retry("sign", &body).await?;
        Ok(SignatureBundle {
            signature: decode_hex(&wire.signature_hex, "signature")
                .map_err(|e| SignerError::InvalidSignature(e.to_string()))?,
            public_key: decode_hex(&wire.pubkey_hex, "pubkey")
                .map_err(|e| SignerError::InvalidKey(e.to_string()))?,
            key_version: wire.key_version,
        })
    }

    async fn attestation(&self) -> Result<Arc<Attestation>, SignerError> {
        self.cache
            .get_or_refresh(|| self.fetch_attestation())
            .await
    }

    async fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, SignerError> {
        let body = serde_json::json!({ "data_hex": hex::encode(sealed) });
        let wire: UnsealResponse = self.post_with_retry("unseal", &body).await?;
        hex::decode(&wire.plaintext_hex).map_err(|e| SignerError::Unseal(e.to_string()))
    }
}
