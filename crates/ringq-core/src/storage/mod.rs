mod filter;
pub(crate) mod keys;
mod memory;
mod rocksdb;
mod traits;

pub use self::rocksdb::RocksDbStore;
pub use filter::{Condition, Filter, Update};
pub use memory::MemoryStore;
pub use traits::{CollectionBounds, DocumentStore};
