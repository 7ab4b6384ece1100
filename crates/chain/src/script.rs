// Copyright (C) 2015-2025 The Neo Project.
//
// script.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! Neo VM script construction for contract invocations.

use nsl_core::{sha256, UInt160};

// Opcodes used by invocation scripts.
const OP_PUSHINT8: u8 = 0x00;
const OP_PUSHINT16: u8 = 0x01;
const OP_PUSHINT32: u8 = 0x02;
const OP_PUSHINT64: u8 = 0x03;
const OP_PUSHT: u8 = 0x08;
const OP_PUSHF: u8 = 0x09;
const OP_PUSHNULL: u8 = 0x0B;
const OP_PUSHDATA1: u8 = 0x0C;
const OP_PUSHDATA2: u8 = 0x0D;
const OP_PUSHDATA4: u8 = 0x0E;
const OP_PUSHM1: u8 = 0x0F;
const OP_PUSH0: u8 = 0x10;
const OP_SYSCALL: u8 = 0x41;
const OP_NEWARRAY0: u8 = 0xC2;
const OP_PACK: u8 = 0xCC;

/// `CallFlags.All` for `System.Contract.Call`.
const CALL_FLAGS_ALL: i64 = 15;

/// A typed argument for a contract invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractParameter {
    Int(i64),
    Bool(bool),
    Bytes(Vec<u8>),
    String(String),
    Hash160(UInt160),
    Array(Vec<ContractParameter>),
}

/// Helps construct VM scripts programmatically.
#[derive(Default)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, op: u8) -> &mut Self {
        self.script.push(op);
        self
    }

    /// Pushes arbitrary bytes with the smallest PUSHDATA form.
    pub fn emit_push(&mut self, data: &[u8]) -> &mut Self {
        let len = data.len();
        if len <= 0xFF {
            self.emit(OP_PUSHDATA1);
            self.emit(len as u8);
        } else if len <= 0xFFFF {
            self.emit(OP_PUSHDATA2);
            self.script.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            self.emit(OP_PUSHDATA4);
            self.script.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.script.extend_from_slice(data);
        self
    }

    /// Pushes an integer with the smallest encoding.
    pub fn emit_push_int(&mut self, value: i64) -> &mut Self {
        if value == -1 {
            return self.emit(OP_PUSHM1);
        }
        if (0..=16).contains(&value) {
            return self.emit(OP_PUSH0 + value as u8);
        }
        if let Ok(v) = i8::try_from(value) {
            self.emit(OP_PUSHINT8);
            self.script.push(v as u8);
        } else if let Ok(v) = i16::try_from(value) {
            self.emit(OP_PUSHINT16);
            self.script.extend_from_slice(&v.to_le_bytes());
        } else if let Ok(v) = i32::try_from(value) {
            self.emit(OP_PUSHINT32);
            self.script.extend_from_slice(&v.to_le_bytes());
        } else {
            self.emit(OP_PUSHINT64);
            self.script.extend_from_slice(&value.to_le_bytes());
        }
        self
    }

    pub fn emit_push_bool(&mut self, value: bool) -> &mut Self {
        self.emit(if value { OP_PUSHT } else { OP_PUSHF })
    }

    pub fn emit_push_null(&mut self) -> &mut Self {
        self.emit(OP_PUSHNULL)
    }

    pub fn emit_parameter(&mut self, parameter: &ContractParameter) -> &mut Self {
        match parameter {
            ContractParameter::Int(v) => self.emit_push_int(*v),
            ContractParameter::Bool(v) => self.emit_push_bool(*v),
            ContractParameter::Bytes(v) => self.emit_push(v),
            ContractParameter::String(v) => self.emit_push(v.as_bytes()),
            ContractParameter::Hash160(v) => self.emit_push(v.as_bytes()),
            ContractParameter::Array(items) => self.emit_array(items),
        }
    }

    /// Packs `items` into a VM array (reverse push order, then PACK).
    pub fn emit_array(&mut self, items: &[ContractParameter]) -> &mut Self {
        if items.is_empty() {
            return self.emit(OP_NEWARRAY0);
        }
        for item in items.iter().rev() {
            self.emit_parameter(item);
        }
        self.emit_push_int(items.len() as i64);
        self.emit(OP_PACK)
    }

    /// Emits `SYSCALL` with the 4-byte interop hash of `api`.
    pub fn emit_syscall(&mut self, api: &str) -> &mut Self {
        let digest = sha256(api.as_bytes());
        self.emit(OP_SYSCALL);
        self.script.extend_from_slice(&digest[..4]);
        self
    }

    pub fn to_array(&self) -> Vec<u8> {
        self.script.clone()
    }
}

/// Builds the standard `System.Contract.Call` invocation script:
/// args array, call flags, method name, contract hash, syscall.
pub fn build_contract_call(
    contract: &UInt160,
    method: &str,
    parameters: &[ContractParameter],
) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_array(parameters)
        .emit_push_int(CALL_FLAGS_ALL)
        .emit_push(method.as_bytes())
        .emit_push(contract.as_bytes())
        .emit_syscall("System.Contract.Call");
    builder.to_array()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_int_uses_compact_forms() {
        let mut b = ScriptBuilder::new();
        b.emit_push_int(0);
        assert_eq!(b.to_array(), vec![OP_PUSH0]);

        let mut b = ScriptBuilder::new();
        b.emit_push_int(16);
        assert_eq!(b.to_array(), vec![0x20]);

        let mut b = ScriptBuilder::new();
        b.emit_push_int(-1);
        assert_eq!(b.to_array(), vec![OP_PUSHM1]);

        let mut b = ScriptBuilder::new();
        b.emit_push_int(100);
        assert_eq!(b.to_array(), vec![OP_PUSHINT8, 100]);

        let mut b = ScriptBuilder::new();
        b.emit_push_int(0x1234);
        assert_eq!(b.to_array(), vec![OP_PUSHINT16, 0x34, 0x12]);

        let mut b = ScriptBuilder::new();
        b.emit_push_int(i64::MAX);
        let script = b.to_array();
        assert_eq!(script[0], OP_PUSHINT64);
        assert_eq!(script.len(), 9);
    }

    #[test]
    fn push_data_thresholds() {
        let mut b = ScriptBuilder::new();
        b.emit_push(&[0xAA; 20]);
        let script = b.to_array();
        assert_eq!(script[0], OP_PUSHDATA1);
        assert_eq!(script[1], 20);
        assert_eq!(script.len(), 22);

        let mut b = ScriptBuilder::new();
        b.emit_push(&vec![0u8; 300]);
        let script = b.to_array();
        assert_eq!(script[0], OP_PUSHDATA2);
        assert_eq!(&script[1..3], &300u16.to_le_bytes());
    }

    #[test]
    fn syscall_uses_interop_hash() {
        let mut b = ScriptBuilder::new();
        b.emit_syscall("System.Contract.Call");
        let script = b.to_array();
        assert_eq!(script[0], OP_SYSCALL);
        assert_eq!(script.len(), 5);
        assert_eq!(&script[1..5], &sha256(b"System.Contract.Call")[..4]);
    }

    #[test]
    fn empty_array_is_newarray0() {
        let mut b = ScriptBuilder::new();
        b.emit_array(&[]);
        assert_eq!(b.to_array(), vec![OP_NEWARRAY0]);
    }

    #[test]
    fn contract_call_layout() {
        let contract = UInt160::parse("0xd2a4cff31913016155e38e474a2c06d08be276cf").unwrap();
        let script = build_contract_call(
            &contract,
            "fulfillRequest",
            &[ContractParameter::Int(42), ContractParameter::Bytes(b"ok".to_vec())],
        );

        // Ends with SYSCALL + interop hash.
        let tail = &script[script.len() - 5..];
        assert_eq!(tail[0], OP_SYSCALL);
        assert_eq!(&tail[1..], &sha256(b"System.Contract.Call")[..4]);
        // Contains the method name and the PACK of two arguments.
        assert!(script
            .windows(b"fulfillRequest".len())
            .any(|w| w == b"fulfillRequest"));
        assert!(script.contains(&OP_PACK));
    }

    #[test]
    fn array_packs_in_reverse_order() {
        let mut b = ScriptBuilder::new();
        b.emit_array(&[
            ContractParameter::Int(1),
            ContractParameter::Int(2),
        ]);
        let script = b.to_array();
        // Reverse push: 2 first, then 1, then count 2, then PACK.
        assert_eq!(script, vec![0x12, 0x11, 0x12, OP_PACK]);
    }
}
