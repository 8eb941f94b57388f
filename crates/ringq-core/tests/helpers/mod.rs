#![allow(dead_code)]

use std::sync::Arc;

use ringq_core::{DocumentStore, MemoryStore, Queue, QueueConfig, RocksDbStore};

/// A store under test. Owns the temporary directory of a RocksDB-backed store
/// so it outlives every queue opened on it.
pub struct TestStore {
    pub name: &'static str,
    pub store: Arc<dyn DocumentStore>,
    _data_dir: Option<tempfile::TempDir>,
}

impl TestStore {
    pub fn memory() -> Self {
        Self {
            name: "memory",
            store: Arc::new(MemoryStore::new()),
            _data_dir: None,
        }
    }

    pub fn rocksdb() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = RocksDbStore::open(dir.path()).expect("open rocksdb store");
        Self {
            name: "rocksdb",
            store: Arc::new(store),
            _data_dir: Some(dir),
        }
    }

    /// Every backend the queue must behave identically on.
    pub fn all() -> Vec<Self> {
        vec![Self::memory(), Self::rocksdb()]
    }

    pub fn queue(&self, name: &str) -> Queue {
        self.queue_with_capacity(name, 4096)
    }

    pub fn queue_with_capacity(&self, name: &str, capacity: u64) -> Queue {
        let mut config = QueueConfig::new(name);
        config.capacity = capacity;
        Queue::open(Arc::clone(&self.store), config).expect("open queue")
    }
}
