//! Storage error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("rocksdb: {0}")]
    Backend(String),

    #[error("codec: {0}")]
    Codec(String),

    #[error("column family missing: {0}")]
    MissingColumn(&'static str),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}
