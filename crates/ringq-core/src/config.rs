use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::poll::PollPolicy;
use crate::storage::CollectionBounds;

/// Top-level configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RingqConfig {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub polling: PollConfig,
}

/// Where the RocksDB store keeps its files.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

/// One queue maps to one bounded collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Collection name.
    pub name: String,
    /// Maximum number of messages retained before the oldest are evicted.
    pub capacity: u64,
    /// Only used to size the collection's byte budget at creation.
    pub average_message_size: u64,
}

/// Defaults for blocking reads and backpressure waits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    /// Absent means wait indefinitely.
    pub timeout_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl QueueConfig {
    pub const DEFAULT_NAME: &'static str = "messages";
    pub const DEFAULT_CAPACITY: u64 = 4096;
    pub const DEFAULT_AVERAGE_MESSAGE_SIZE: u64 = 8192;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Bounds of the backing collection: `capacity` documents and
    /// `capacity * average_message_size` bytes.
    pub fn bounds(&self) -> CollectionBounds {
        CollectionBounds {
            max_bytes: self.capacity.saturating_mul(self.average_message_size),
            max_count: self.capacity,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
            capacity: Self::DEFAULT_CAPACITY,
            average_message_size: Self::DEFAULT_AVERAGE_MESSAGE_SIZE,
        }
    }
}

impl PollConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.interval_ms),
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            timeout_ms: None,
        }
    }
}
