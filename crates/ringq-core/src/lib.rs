pub mod clock;
pub mod config;
pub mod document;
pub mod error;
pub mod message;
pub mod metrics;
pub mod poll;
pub mod queue;
pub mod storage;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PollConfig, QueueConfig, RingqConfig, StoreConfig};
pub use document::{Document, Meta};
pub use error::{QueueError, QueueResult, StorageError, StorageResult};
pub use message::Message;
pub use poll::{PollPolicy, WaitOutcome};
pub use queue::{Backpressure, Queue, ReadOptions, WriteOptions};
pub use storage::{
    CollectionBounds, Condition, DocumentStore, Filter, MemoryStore, RocksDbStore, Update,
};
