/// Low-level storage errors (RocksDB, serialization, missing collections).
/// This is the error type for the `DocumentStore` trait: store operations can
/// only fail with infrastructure errors, never queue-level ones.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("rocksdb error: {0}")]
    RocksDb(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::RocksDb(err.into_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Errors surfaced by the `Queue` façade.
///
/// A rejected duplicate is not an error (`write` returns `false`), and an
/// elapsed polling timeout is not one either.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type QueueResult<T> = std::result::Result<T, QueueError>;
