// Copyright (C) 2015-2025 The Neo Project.
//
// tx.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! Neo N3 transaction assembly and serialization.

use nsl_core::{sha256, UInt160, UInt256};
use ripemd::Ripemd160;
use sha2::Digest;

/// Witness scope restricting the signature to the entry contract.
pub const SCOPE_CALLED_BY_ENTRY: u8 = 0x01;

const TX_VERSION: u8 = 0;

/// One transaction signer entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSigner {
    pub account: UInt160,
    pub scopes: u8,
}

impl TxSigner {
    pub fn called_by_entry(account: UInt160) -> Self {
        Self {
            account,
            scopes: SCOPE_CALLED_BY_ENTRY,
        }
    }
}

/// Invocation/verification script pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    pub invocation: Vec<u8>,
    pub verification: Vec<u8>,
}

impl Witness {
    /// Standard single-signature witness: the invocation pushes the raw
    /// 64-byte signature, the verification script checks it against the
    /// public key.
    pub fn single_sig(signature: &[u8], public_key: &[u8]) -> Self {
        let mut invocation = Vec::with_capacity(2 + signature.len());
        invocation.push(0x0C); // PUSHDATA1
        invocation.push(signature.len() as u8);
        invocation.extend_from_slice(signature);

        Self {
            invocation,
            verification: verification_script(public_key),
        }
    }
}

/// Single-signature verification script for a SEC1 compressed key.
pub fn verification_script(public_key: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(2 + public_key.len() + 5);
    script.push(0x0C); // PUSHDATA1
    script.push(public_key.len() as u8);
    script.extend_from_slice(public_key);
    script.push(0x41); // SYSCALL
    script.extend_from_slice(&sha256(b"System.Crypto.CheckSig")[..4]);
    script
}

/// `ripemd160(sha256(script))`, the script's on-chain account hash.
pub fn script_hash(script: &[u8]) -> UInt160 {
    let sha = sha256(script);
    let mut ripemd = Ripemd160::new();
    ripemd.update(sha);
    let digest: [u8; 20] = ripemd.finalize().into();
    UInt160::from_array(digest)
}

/// Account hash of the standard single-sig contract for a public key.
pub fn single_sig_account(public_key: &[u8]) -> UInt160 {
    script_hash(&verification_script(public_key))
}

/// A Neo N3 transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u8,
    pub nonce: u32,
    pub system_fee: i64,
    pub network_fee: i64,
    pub valid_until_block: u32,
    pub signers: Vec<TxSigner>,
    pub script: Vec<u8>,
    pub witnesses: Vec<Witness>,
}

impl Transaction {
    pub fn new(script: Vec<u8>) -> Self {
        Self {
            version: TX_VERSION,
            nonce: rand::random(),
            system_fee: 0,
            network_fee: 0,
            valid_until_block: 0,
            signers: Vec::new(),
            script,
            witnesses: Vec::new(),
        }
    }

    /// Serialization without witnesses; this is what gets hashed and
    /// signed.
    pub fn serialize_unsigned(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.script.len());
        out.push(self.version);
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&self.system_fee.to_le_bytes());
        out.extend_from_slice(&self.network_fee.to_le_bytes());
        out.extend_from_slice(&self.valid_until_block.to_le_bytes());
        write_var_int(&mut out, self.signers.len() as u64);
        for signer in &self.signers {
            out.extend_from_slice(signer.account.as_bytes());
            out.push(signer.scopes);
        }
        write_var_int(&mut out, 0); // attributes
        write_var_bytes(&mut out, &self.script);
        out
    }

    /// Full wire serialization including witnesses.
    pub fn to_array(&self) -> Vec<u8> {
        let mut out = self.serialize_unsigned();
        write_var_int(&mut out, self.witnesses.len() as u64);
        for witness in &self.witnesses {
            write_var_bytes(&mut out, &witness.invocation);
            write_var_bytes(&mut out, &witness.verification);
        }
        out
    }

    /// Transaction hash: SHA-256 over the unsigned serialization.
    pub fn hash(&self) -> UInt256 {
        UInt256::from_array(sha256(&self.serialize_unsigned()))
    }

    /// The bytes a witness signature covers:
    /// `network_magic:u32le ∥ tx_hash`.
    pub fn sign_data(&self, network_magic: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        out.extend_from_slice(&network_magic.to_le_bytes());
        out.extend_from_slice(self.hash().as_bytes());
        out
    }

    /// Wire size of the witnessed transaction.
    pub fn size(&self) -> usize {
        self.to_array().len()
    }
}

fn write_var_int(out: &mut Vec<u8>, value: u64) {
    if value < 0xFD {
        out.push(value as u8);
    } else if value <= 0xFFFF {
        out.push(0xFD);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xFFFF_FFFF {
        out.push(0xFE);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xFF);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_var_int(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        let mut tx = Transaction::new(vec![0x21]); // NOP
        tx.nonce = 0x01020304;
        tx.system_fee = 997_750;
        tx.network_fee = 1_234_560;
        tx.valid_until_block = 5_000;
        tx.signers = vec![TxSigner::called_by_entry(
            UInt160::parse("0xd2a4cff31913016155e38e474a2c06d08be276cf").unwrap(),
        )];
        tx
    }

    #[test]
    fn unsigned_layout_is_stable() {
        let tx = sample_tx();
        let raw = tx.serialize_unsigned();
        assert_eq!(raw[0], 0); // version
        assert_eq!(&raw[1..5], &0x01020304u32.to_le_bytes());
        assert_eq!(&raw[5..13], &997_750i64.to_le_bytes());
        assert_eq!(&raw[13..21], &1_234_560i64.to_le_bytes());
        assert_eq!(&raw[21..25], &5_000u32.to_le_bytes());
        assert_eq!(raw[25], 1); // one signer
        assert_eq!(raw[25 + 1 + 20], SCOPE_CALLED_BY_ENTRY);
        // attributes count, then script var bytes
        let script_offset = 25 + 1 + 21;
        assert_eq!(raw[script_offset], 0);
        assert_eq!(raw[script_offset + 1], 1); // script length
        assert_eq!(raw[script_offset + 2], 0x21);
        assert_eq!(raw.len(), script_offset + 3);
    }

    #[test]
    fn hash_changes_with_nonce() {
        let tx = sample_tx();
        let mut other = tx.clone();
        other.nonce += 1;
        assert_ne!(tx.hash(), other.hash());
    }

    #[test]
    fn hash_ignores_witnesses() {
        let mut tx = sample_tx();
        let before = tx.hash();
        tx.witnesses.push(Witness::single_sig(&[1u8; 64], &[2u8; 33]));
        assert_eq!(tx.hash(), before);
        assert!(tx.to_array().len() > tx.serialize_unsigned().len());
    }

    #[test]
    fn sign_data_prefixes_magic() {
        let tx = sample_tx();
        let data = tx.sign_data(0x334F454E);
        assert_eq!(&data[..4], &0x334F454Eu32.to_le_bytes());
        assert_eq!(&data[4..], tx.hash().as_bytes());
    }

    #[test]
    fn single_sig_account_is_deterministic() {
        let key = [0x02u8; 33];
        assert_eq!(single_sig_account(&key), single_sig_account(&key));
        assert_ne!(single_sig_account(&key), single_sig_account(&[0x03u8; 33]));
    }

    #[test]
    fn witness_embeds_signature_and_key() {
        let witness = Witness::single_sig(&[7u8; 64], &[2u8; 33]);
        assert_eq!(witness.invocation[0], 0x0C);
        assert_eq!(witness.invocation[1], 64);
        assert_eq!(&witness.invocation[2..], &[7u8; 64]);
        assert_eq!(witness.verification[1], 33);
    }

    #[test]
    fn var_int_thresholds() {
        let mut buf = Vec::new();
        write_var_int(&mut buf, 0xFC);
        assert_eq!(buf, vec![0xFC]);

        let mut buf = Vec::new();
        write_var_int(&mut buf, 0xFD);
        assert_eq!(buf, vec![0xFD, 0xFD, 0x00]);

        let mut buf = Vec::new();
        write_var_int(&mut buf, 0x1_0000);
        assert_eq!(buf, vec![0xFE, 0x00, 0x00, 0x01, 0x00]);
    }
}
