//! RocksDB-backed store.
//!
//! One column family per logical table. RocksDB has no native
//! compare-and-swap, so the two atomic primitives serialize through a
//! single write lock; plain reads and writes go straight to the engine.

use crate::{Column, Store, StoreError};
use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};
use std::path::Path;
use tracing::info;

pub struct RocksDbStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksDbStore {
    /// Opens (or creates) the database with all service-layer column
    /// families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        options.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let descriptors: Vec<ColumnFamilyDescriptor> = Column::ALL
            .iter()
            .map(|column| ColumnFamilyDescriptor::new(column.name(), Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&options, path.as_ref(), descriptors)?;
        info!(path = %path.as_ref().display(), "opened rocksdb store");

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn handle(&self, column: Column) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(column.name())
            .ok_or(StoreError::MissingColumn(column.name()))
    }
}

impl Store for RocksDbStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get_cf(self.handle(column)?, key)?)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        Ok(self.db.put_cf(self.handle(column)?, key, value)?)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        Ok(self.db.delete_cf(self.handle(column)?, key)?)
    }

    fn create_if_absent(
        &self,
        column: Column,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let cf = self.handle(column)?;
        if self.db.get_cf(cf, key)?.is_some() {
            return Ok(false);
        }
        self.db.put_cf(cf, key, value)?;
        Ok(true)
    }

    fn compare_and_swap(
        &self,
        column: Column,
        key: &[u8],
        expected: Option<&[u8]>,
        value: &[u8],
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let cf = self.handle(column)?;
        let current = self.db.get_cf(cf, key)?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        self.db.put_cf(cf, key, value)?;
        Ok(true)
    }

    fn scan_prefix(
        &self,
        column: Column,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let cf = self.handle(column)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RocksDbStore::open(dir.path()).unwrap();
            store.put(Column::Heights, b"listener", b"100").unwrap();
        }
        let store = RocksDbStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get(Column::Heights, b"listener").unwrap().as_deref(),
            Some(&b"100"[..])
        );
    }
}
