// Copyright (C) 2015-2025 The Neo Project.
//
// encoding.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! Canonical byte encodings covered by attested signatures.
//!
//! Every artifact the fleet signs is `domain ∥ 0x00 ∥ payload` with a
//! deterministic payload encoding, so any verifier can rebuild the exact
//! message from public values.

use crate::hash::{UInt160, UInt256};
use sha2::{Digest, Sha256};

/// Domain for gateway fulfillment and failure submissions.
pub const DOMAIN_FULFILL: &str = "service:fulfill";
/// Domain for verifiable randomness proofs.
pub const DOMAIN_VRF: &str = "vrf:v1";
/// Domain for transaction witness signatures.
pub const DOMAIN_TX_WITNESS: &str = "tx:witness";
/// Domain for data-feed price updates.
pub const DOMAIN_FEED_UPDATE: &str = "feed:update";
/// Domain for mixer claim instructions.
pub const DOMAIN_MIXER_CLAIM: &str = "mixer:claim";

/// SHA-256 convenience wrapper.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 returning the chain hash type.
pub fn sha256_hash(data: &[u8]) -> UInt256 {
    UInt256::from_array(sha256(data))
}

/// `domain ∥ 0x00 ∥ payload` — the exact bytes handed to the signer.
pub fn domain_message(domain: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(domain.len() + 1 + payload.len());
    out.extend_from_slice(domain.as_bytes());
    out.push(0x00);
    out.extend_from_slice(payload);
    out
}

/// Canonical fulfillment payload:
/// `request_id:u64be ∥ status ∥ body_len:u32be ∥ body ∥ nonce:u64be`,
/// status 0x01 for fulfill and 0x00 for fail.
pub fn canonical_fulfillment(request_id: u64, success: bool, body: &[u8], nonce: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 1 + 4 + body.len() + 8);
    out.extend_from_slice(&request_id.to_be_bytes());
    out.push(u8::from(success));
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(&nonce.to_be_bytes());
    out
}

/// VRF input: `app_id ∥ 0x00 ∥ request_id:u64be ∥ 0x00 ∥ seed`.
/// Signed under [`DOMAIN_VRF`], yielding the full
/// `vrf:v1 ∥ 0x00 ∥ app_id ∥ 0x00 ∥ request_id ∥ 0x00 ∥ seed` message.
pub fn vrf_seed_message(app_id: &str, request_id: u64, seed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(app_id.len() + 1 + 8 + 1 + seed.len());
    out.extend_from_slice(app_id.as_bytes());
    out.push(0x00);
    out.extend_from_slice(&request_id.to_be_bytes());
    out.push(0x00);
    out.extend_from_slice(seed);
    out
}

/// Mixer claim instruction: `request_id:u64be ∥ count:u32be ∥
/// (recipient ∥ amount:u64be)*`. Signed under [`DOMAIN_MIXER_CLAIM`].
pub fn mixer_claim_message(request_id: u64, recipients: &[UInt160], amounts: &[u64]) -> Vec<u8> {
    debug_assert_eq!(recipients.len(), amounts.len());
    let mut out = Vec::with_capacity(8 + 4 + recipients.len() * 28);
    out.extend_from_slice(&request_id.to_be_bytes());
    out.extend_from_slice(&(recipients.len() as u32).to_be_bytes());
    for (recipient, amount) in recipients.iter().zip(amounts) {
        out.extend_from_slice(recipient.as_bytes());
        out.extend_from_slice(&amount.to_be_bytes());
    }
    out
}

/// Data-feed update payload: `feed_id ∥ 0x00 ∥ round_id:u64be ∥
/// price:u64be ∥ timestamp:u64be`. Signed under [`DOMAIN_FEED_UPDATE`].
pub fn feed_update_message(feed_id: &str, round_id: u64, price: u64, timestamp: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(feed_id.len() + 1 + 24);
    out.extend_from_slice(feed_id.as_bytes());
    out.push(0x00);
    out.extend_from_slice(&round_id.to_be_bytes());
    out.extend_from_slice(&price.to_be_bytes());
    out.extend_from_slice(&timestamp.to_be_bytes());
    out
}
