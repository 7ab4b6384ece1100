//! In-memory store for tests and development.

use crate::{Column, Store, StoreError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// A [`Store`] over per-column ordered maps. A single lock covers all
/// columns, which also makes the atomic primitives trivially correct.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<&'static str, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .tables
            .read()
            .get(column.name())
            .and_then(|table| table.get(key).cloned()))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.tables
            .write()
            .entry(column.name())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        if let Some(table) = self.tables.write().get_mut(column.name()) {
            table.remove(key);
        }
        Ok(())
    }

    fn create_if_absent(
        &self,
        column: Column,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        let table = tables.entry(column.name()).or_default();
        if table.contains_key(key) {
            return Ok(false);
        }
        table.insert(key.to_vec(), value.to_vec());
        Ok(true)
    }

    fn compare_and_swap(
        &self,
        column: Column,
        key: &[u8],
        expected: Option<&[u8]>,
        value: &[u8],
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        let table = tables.entry(column.name()).or_default();
        let current = table.get(key).map(|v| v.as_slice());
        if current != expected {
            return Ok(false);
        }
        table.insert(key.to_vec(), value.to_vec());
        Ok(true)
    }

    fn scan_prefix(
        &self,
        column: Column,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let tables = self.tables.read();
        let Some(table) = tables.get(column.name()) else {
            return Ok(Vec::new());
        };
        Ok(table
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
