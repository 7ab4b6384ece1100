//! Verifiable randomness handler.
//!
//! The proof construction: sign `vrf:v1 ∥ 0x00 ∥ app_id ∥ 0x00 ∥
//! request_id ∥ 0x00 ∥ seed` with the attested key, then derive
//! `randomness = SHA-256(signature)`. Any verifier holding the public
//! values recomputes the same randomness; no secret beyond the signing
//! key is involved.

use crate::handlers::ServiceHandler;
use async_trait::async_trait;
use nsl_core::{
    sha256, vrf_seed_message, FailReason, Failure, HandlerOutcome, RequestPayload, ServiceRequest,
    DOMAIN_VRF,
};
use nsl_signer::{verify_signature, ServiceSigner, SharedSigner};
use tracing::debug;

pub struct RandomnessHandler {
    signer: SharedSigner,
}

/// Expands a signature into `num_words` 32-byte words.
/// One word is `SHA-256(signature)`; more hash `signature ∥ counter`.
pub fn derive_randomness(signature: &[u8], num_words: u32) -> Vec<u8> {
    if num_words <= 1 {
        return sha256(signature).to_vec();
    }
    let mut out = Vec::with_capacity(num_words as usize * 32);
    for counter in 0..num_words {
        let mut material = Vec::with_capacity(signature.len() + 4);
        material.extend_from_slice(signature);
        material.extend_from_slice(&counter.to_be_bytes());
        out.extend_from_slice(&sha256(&material));
    }
    out
}

/// Recomputes and checks a proof tuple. Used by the public verify
/// endpoint; needs no signer access.
pub fn verify_proof(
    public_key: &[u8],
    app_id: &str,
    request_id: u64,
    seed: &[u8],
    signature: &[u8],
    expected_randomness: &[u8],
) -> bool {
    let message = vrf_seed_message(app_id, request_id, seed);
    match verify_signature(public_key, DOMAIN_VRF, &message, signature) {
        Ok(true) => {}
        _ => return false,
    }
    let words = expected_randomness.len() / 32;
    let derived = derive_randomness(signature, words.max(1) as u32);
    derived == expected_randomness
}

impl RandomnessHandler {
    pub fn new(signer: SharedSigner) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl ServiceHandler for RandomnessHandler {
    async fn handle(&self, request: &ServiceRequest, payload: &RequestPayload) -> HandlerOutcome {
        let RequestPayload::Randomness(randomness) = payload else {
            return HandlerOutcome::Permanent(Failure::with_detail(
                FailReason::BadRequest,
                "payload kind mismatch",
            ));
        };

        let message = vrf_seed_message(&request.app_id, request.request_id, &randomness.seed);
        let bundle = match self.signer.sign(DOMAIN_VRF, &message).await {
            Ok(bundle) => bundle,
            Err(e) if e.is_transient() => {
                return HandlerOutcome::Transient(Failure::with_detail(
                    FailReason::SignerUnavailable,
                    e.to_string(),
                ))
            }
            Err(e) => {
                return HandlerOutcome::Permanent(Failure::with_detail(
                    FailReason::SignerUnavailable,
                    e.to_string(),
                ))
            }
        };

        let attestation = match self.signer.attestation().await {
            Ok(att) => att,
            Err(e) if e.is_transient() => {
                return HandlerOutcome::Transient(Failure::with_detail(
                    FailReason::SignerUnavailable,
                    e.to_string(),
                ))
            }
            Err(e) => {
                return HandlerOutcome::Permanent(Failure::with_detail(
                    FailReason::SignerUnavailable,
                    e.to_string(),
                ))
            }
        };

        let words = derive_randomness(&bundle.signature, randomness.num_words);

        // randomness ∥ signature ∥ public_key ∥ attestation_hash ∥
        // key_version — everything a verifier needs.
        let mut result = Vec::with_capacity(words.len() + 64 + 33 + 32 + 4);
        result.extend_from_slice(&words);
        result.extend_from_slice(&bundle.signature);
        result.extend_from_slice(&bundle.public_key);
        result.extend_from_slice(attestation.quote_hash().as_bytes());
        result.extend_from_slice(&bundle.key_version.to_be_bytes());

        debug!(
            request_id = request.request_id,
            num_words = randomness.num_words,
            "randomness derived"
        );
        HandlerOutcome::Success(result)
    }
}
