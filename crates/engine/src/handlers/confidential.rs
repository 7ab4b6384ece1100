//! Confidential compute handler.
//!
//! Inputs arrive sealed to the TEE key. The handler unseals, runs one of
//! the fixed operations, commits to the plaintext output with SHA-256,
//! and either returns the output in the clear or encrypts it to the
//! requester's P-256 key (ephemeral ECDH, AES-256-GCM).

use crate::handlers::ServiceHandler;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use nsl_core::{
    sha256, ConfidentialOp, FailReason, Failure, HandlerOutcome, RequestPayload, ServiceRequest,
};
use nsl_signer::{ServiceSigner, SharedSigner};
use p256::ecdh::EphemeralSecret;
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub struct ConfidentialHandler {
    signer: SharedSigner,
}

#[derive(Deserialize)]
struct AggregateInput {
    #[serde(default = "default_aggregate_op")]
    op: String,
    values: Vec<f64>,
}

fn default_aggregate_op() -> String {
    "sum".into()
}

#[derive(Deserialize)]
struct CompareInput {
    a: f64,
    b: f64,
}

#[derive(Deserialize)]
struct Bid {
    bidder: String,
    amount: u64,
}

#[derive(Deserialize)]
struct AuctionInput {
    bids: Vec<Bid>,
}

#[derive(Deserialize)]
struct VoteInput {
    votes: Vec<String>,
}

fn bad_input(detail: impl Into<String>) -> HandlerOutcome {
    HandlerOutcome::Permanent(Failure::with_detail(FailReason::BadRequest, detail))
}

/// Runs the fixed operation over the unsealed plaintext.
fn execute(op: ConfidentialOp, plain: &[u8]) -> Result<serde_json::Value, String> {
    match op {
        ConfidentialOp::Aggregate => {
            let input: AggregateInput =
                serde_json::from_slice(plain).map_err(|e| e.to_string())?;
            if input.values.is_empty() {
                return Err("empty values".into());
            }
            let result = match input.op.as_str() {
                "sum" => input.values.iter().sum::<f64>(),
                "avg" => input.values.iter().sum::<f64>() / input.values.len() as f64,
                "min" => input.values.iter().copied().fold(f64::INFINITY, f64::min),
                "max" => input
                    .values
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max),
                other => return Err(format!("unknown aggregate op {other}")),
            };
            Ok(json!({ "op": input.op, "result": result }))
        }
        ConfidentialOp::Compare => {
            let input: CompareInput = serde_json::from_slice(plain).map_err(|e| e.to_string())?;
            let ordering = if input.a < input.b {
                -1
            } else if input.a > input.b {
                1
            } else {
                0
            };
            Ok(json!({ "ordering": ordering }))
        }
        ConfidentialOp::Auction => {
            let input: AuctionInput = serde_json::from_slice(plain).map_err(|e| e.to_string())?;
            let winner = input
                .bids
                .iter()
                .max_by_key(|bid| bid.amount)
                .ok_or_else(|| "no bids".to_string())?;
            // max_by_key returns the last maximum; keep the first.
            let first_winner = input
                .bids
                .iter()
                .find(|bid| bid.amount == winner.amount)
                .unwrap_or(winner);
            Ok(json!({ "winner": first_winner.bidder, "amount": first_winner.amount }))
        }
        ConfidentialOp::Vote => {
            let input: VoteInput = serde_json::from_slice(plain).map_err(|e| e.to_string())?;
            if input.votes.is_empty() {
                return Err("no votes".into());
            }
            let mut tally = std::collections::BTreeMap::<String, u64>::new();
            for vote in &input.votes {
                *tally.entry(vote.clone()).or_default() += 1;
            }
            // BTreeMap order makes ties resolve to the first option
            // lexicographically.
            let winner = tally
                .iter()
                .max_by_key(|(_, count)| **count)
                .map(|(option, _)| option.clone())
                .unwrap_or_default();
            Ok(json!({ "tally": tally, "winner": winner }))
        }
    }
}

/// Encrypts output under the user's key: `ephemeral_pubkey(33) ∥
/// nonce(12) ∥ ciphertext`, base64 on the wire.
fn encrypt_output(user_public_key: &[u8], plain: &[u8]) -> Result<Vec<u8>, String> {
    let recipient = PublicKey::from_sec1_bytes(user_public_key).map_err(|e| e.to_string())?;
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_public = p256::EncodedPoint::from(ephemeral.public_key()).compress();

    let shared = ephemeral.diffie_hellman(&recipient);
    let key = sha256(shared.raw_secret_bytes());
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plain)
        .map_err(|e| e.to_string())?;

    let mut out = Vec::with_capacity(33 + 12 + ciphertext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

impl ConfidentialHandler {
    pub fn new(signer: SharedSigner) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl ServiceHandler for ConfidentialHandler {
    async fn handle(&self, request: &ServiceRequest, payload: &RequestPayload) -> HandlerOutcome {
        let RequestPayload::Confidential(confidential) = payload else {
            return bad_input("payload kind mismatch");
        };

        let plain = match self.signer.unseal(&confidential.input).await {
            Ok(plain) => plain,
            Err(e) if e.is_transient() => {
                return HandlerOutcome::Transient(Failure::with_detail(
                    FailReason::SignerUnavailable,
                    e.to_string(),
                ))
            }
            Err(e) => {
                return HandlerOutcome::Permanent(Failure::with_detail(
                    FailReason::DecryptFailed,
                    e.to_string(),
                ))
            }
        };

        let output = match execute(confidential.operation, &plain) {
            Ok(output) => output,
            Err(detail) => return bad_input(detail),
        };
        let plain_output = output.to_string().into_bytes();
        let commitment = sha256(&plain_output);

        let result = if confidential.output_public {
            json!({
                "output": output,
                "output_commitment": hex::encode(commitment),
            })
        } else {
            let encrypted = match encrypt_output(&confidential.user_public_key, &plain_output) {
                Ok(encrypted) => encrypted,
                Err(detail) => return bad_input(format!("output encryption: {detail}")),
            };
            json!({
                "encrypted_output": hex::encode(&encrypted),
                "output_commitment": hex::encode(commitment),
            })
        };

        debug!(
            request_id = request.request_id,
            operation = confidential.operation.as_str(),
            public = confidential.output_public,
            "confidential operation complete"
        );
        HandlerOutcome::Success(result.to_string().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsl_core::ServiceKind;
    use nsl_signer::LocalSigner;
    use std::sync::Arc;

    fn handler_and_signer() -> (ConfidentialHandler, Arc<LocalSigner>) {
        let signer = Arc::new(LocalSigner::generate());
        let shared: SharedSigner = Arc::clone(&signer) as SharedSigner;
        (ConfidentialHandler::new(shared), signer)
    }

    fn request_for(
        signer: &LocalSigner,
        op: &str,
        input: serde_json::Value,
        output_public: bool,
        user_public_key: &[u8],
    ) -> (ServiceRequest, RequestPayload) {
        let sealed = signer.seal(input.to_string().as_bytes()).unwrap();
        let raw = serde_json::to_vec(&json!({
            "operation": op,
            "input": hex::encode(sealed),
            "output_public": output_public,
            "user_public_key": hex::encode(user_public_key),
        }))
        .unwrap();
        let payload = RequestPayload::decode(ServiceKind::Confidential, &raw).unwrap();
        let request = ServiceRequest {
            request_id: 77,
            kind: ServiceKind::Confidential,
            app_id: "sealed".into(),
            requester: Default::default(),
            callback_contract: Default::default(),
            callback_method: "onResult".into(),
            payload: raw,
            created_at_block: 1,
            deadline_block: None,
        };
        (request, payload)
    }

    #[tokio::test]
    async fn aggregate_public_output_carries_commitment() {
        let (handler, signer) = handler_and_signer();
        let (req, payload) = request_for(
            &signer,
            "aggregate",
            json!({"op": "sum", "values": [1.0, 2.0, 3.5]}),
            true,
            &[],
        );

        let HandlerOutcome::Success(result) = handler.handle(&req, &payload).await else {
            panic!("expected success");
        };
        let parsed: serde_json::Value = serde_json::from_slice(&result).unwrap();
        assert_eq!(parsed["output"]["result"], 6.5);

        let plain = parsed["output"].to_string().into_bytes();
        assert_eq!(
            parsed["output_commitment"].as_str().unwrap(),
            hex::encode(sha256(&plain))
        );
    }

    #[tokio::test]
    async fn auction_picks_first_highest_bid() {
        let (handler, signer) = handler_and_signer();
        let (req, payload) = request_for(
            &signer,
            "auction",
            json!({"bids": [
                {"bidder": "alice", "amount": 70},
                {"bidder": "bob", "amount": 90},
                {"bidder": "carol", "amount": 90}
            ]}),
            true,
            &[],
        );
        let HandlerOutcome::Success(result) = handler.handle(&req, &payload).await else {
            panic!()
        };
        let parsed: serde_json::Value = serde_json::from_slice(&result).unwrap();
        assert_eq!(parsed["output"]["winner"], "bob");
    }

    #[tokio::test]
    async fn vote_tallies_and_resolves_ties_deterministically() {
        let (handler, signer) = handler_and_signer();
        let (req, payload) = request_for(
            &signer,
            "vote",
            json!({"votes": ["b", "a", "a", "b"]}),
            true,
            &[],
        );
        let HandlerOutcome::Success(result) = handler.handle(&req, &payload).await else {
            panic!()
        };
        let parsed: serde_json::Value = serde_json::from_slice(&result).unwrap();
        assert_eq!(parsed["output"]["winner"], "a");
        assert_eq!(parsed["output"]["tally"]["a"], 2);
    }

    #[tokio::test]
    async fn tampered_input_is_decrypt_failed() {
        let (handler, signer) = handler_and_signer();
        let mut sealed = signer.seal(b"{\"a\":1,\"b\":2}").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 1;
        let raw = serde_json::to_vec(&json!({
            "operation": "compare",
            "input": hex::encode(sealed),
            "output_public": true,
        }))
        .unwrap();
        let payload = RequestPayload::decode(ServiceKind::Confidential, &raw).unwrap();
        let (req, _) = request_for(&signer, "compare", json!({"a":1,"b":2}), true, &[]);
        assert!(matches!(
            handler.handle(&req, &payload).await,
            HandlerOutcome::Permanent(f) if f.reason == FailReason::DecryptFailed
        ));
    }

    #[tokio::test]
    async fn private_output_is_encrypted_to_user_key() {
        let (handler, signer) = handler_and_signer();
        let user_secret = p256::SecretKey::random(&mut OsRng);
        let user_public = p256::EncodedPoint::from(user_secret.public_key()).compress();

        let (req, payload) = request_for(
            &signer,
            "compare",
            json!({"a": 5.0, "b": 3.0}),
            false,
            user_public.as_bytes(),
        );
        let HandlerOutcome::Success(result) = handler.handle(&req, &payload).await else {
            panic!()
        };
        let parsed: serde_json::Value = serde_json::from_slice(&result).unwrap();
        let blob = hex::decode(parsed["encrypted_output"].as_str().unwrap()).unwrap();
        assert!(blob.len() > 45);

        // The user can decrypt with their secret key.
        let ephemeral = PublicKey::from_sec1_bytes(&blob[..33]).unwrap();
        let shared = p256::ecdh::diffie_hellman(
            user_secret.to_nonzero_scalar(),
            ephemeral.as_affine(),
        );
        let key = sha256(shared.raw_secret_bytes());
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let plain = cipher
            .decrypt(Nonce::from_slice(&blob[33..45]), &blob[45..])
            .unwrap();
        let output: serde_json::Value = serde_json::from_slice(&plain).unwrap();
        assert_eq!(output["ordering"], 1);
    }
}
