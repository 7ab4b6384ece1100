// Copyright (C) 2015-2025 The Neo Project.
//
// lib.rs file belongs to the neo project and is free
// software distributed under the MIT software license, see the
// accompanying file LICENSE in the main directory of the
// repository or http://www.opensource.org/licenses/mit-license.php
// for more details.
//
// Redistribution and use in source and binary forms with or without
// modifications are permitted.

//! Repository backends for the service layer.
//!
//! The engine persists request rows, nonce counters, ingestion heights,
//! triggers, and deposit sessions through the [`Store`] trait. Two backends
//! are provided: an in-memory map for tests and development, and RocksDB
//! with one column family per table for production. The contract every
//! backend must honor is the pair of atomic primitives `create_if_absent`
//! and `compare_and_swap`; the registry's lease protocol is built on them.

pub mod error;
pub mod memory;
pub mod rocks;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use rocks::RocksDbStore;

use std::sync::Arc;

/// Logical tables. Each maps to a RocksDB column family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// `request_id → RequestRecord`
    Requests,
    /// `(status, created_at_block, request_id) → ()` ordering index
    Index,
    /// `key_version → next nonce` and `(key_version, value) → spent_at`
    Nonces,
    /// `listener_id → (last_ingested_height, last_hash)`
    Heights,
    /// `trigger_id → TriggerRecord`
    Triggers,
    /// `request_id → DepositRecord`
    Deposits,
    /// Miscellaneous singletons (round ids, tx receipts, counters)
    Meta,
}

impl Column {
    pub const ALL: [Column; 7] = [
        Column::Requests,
        Column::Index,
        Column::Nonces,
        Column::Heights,
        Column::Triggers,
        Column::Deposits,
        Column::Meta,
    ];

    /// Column family name on disk.
    pub fn name(&self) -> &'static str {
        match self {
            Column::Requests => "requests",
            Column::Index => "index",
            Column::Nonces => "nonces",
            Column::Heights => "heights",
            Column::Triggers => "triggers",
            Column::Deposits => "deposits",
            Column::Meta => "meta",
        }
    }
}

/// A transactional key/value repository.
///
/// All methods are synchronous; callers on the async runtime keep
/// operations short (single-row reads and writes).
pub trait Store: Send + Sync {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError>;

    /// Writes `value` only when `key` is absent. Returns whether the write
    /// happened. Atomic with respect to every other mutation.
    fn create_if_absent(
        &self,
        column: Column,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool, StoreError>;

    /// Replaces the value only when the current bytes equal `expected`
    /// (`None` = absent). Returns whether the swap happened. Atomic with
    /// respect to every other mutation.
    fn compare_and_swap(
        &self,
        column: Column,
        key: &[u8],
        expected: Option<&[u8]>,
        value: &[u8],
    ) -> Result<bool, StoreError>;

    /// Key-ordered scan of all pairs whose key starts with `prefix`,
    /// capped at `limit` entries.
    fn scan_prefix(
        &self,
        column: Column,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

/// Shared handle used across the engine.
pub type SharedStore = Arc<dyn Store>;
