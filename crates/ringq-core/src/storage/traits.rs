use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::Document;
use crate::error::StorageResult;
use crate::storage::filter::{Filter, Update};

/// Size limits of a bounded collection. Once either limit is exceeded the
/// oldest documents are evicted, acknowledged or not.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionBounds {
    pub max_bytes: u64,
    pub max_count: u64,
}

/// Persistence contract the queue runs on. Implementations must be thread-safe.
///
/// `find_one_and_update` and `insert_if_absent` must each execute as one
/// indivisible step with respect to every other caller of the same store;
/// claim exclusivity and deduplication depend on nothing else.
pub trait DocumentStore: Send + Sync {
    // --- Provisioning ---

    /// Create a bounded collection. Succeeds without changes if it already exists.
    fn ensure_bounded_collection(&self, name: &str, bounds: CollectionBounds)
        -> StorageResult<()>;

    /// Register an index on a dotted field path. Idempotent.
    fn ensure_index(&self, collection: &str, field_path: &str) -> StorageResult<()>;

    // --- Reads ---

    /// Documents matching `filter` in insertion order, at most `limit` of them.
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Document>>;

    fn count(&self, collection: &str, filter: &Filter) -> StorageResult<usize>;

    /// Whether at least one document matches.
    fn exists(&self, collection: &str, filter: &Filter) -> StorageResult<bool> {
        Ok(!self.find(collection, filter, Some(1))?.is_empty())
    }

    // --- Writes ---

    /// Append a document, evicting the oldest ones if the collection overflows.
    fn insert(&self, collection: &str, document: &Document) -> StorageResult<()>;

    /// Atomically find the first document matching `filter`, apply `update`
    /// to it and return the document as it was before the update.
    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StorageResult<Option<Document>>;

    /// Atomically insert `document` unless some document matches `filter`.
    /// Returns `true` iff this call inserted.
    fn insert_if_absent(
        &self,
        collection: &str,
        filter: &Filter,
        document: &Document,
    ) -> StorageResult<bool>;

    /// Apply `update` to every document whose identity is in `ids`. Unknown
    /// (or evicted) identities are skipped. Returns the number updated.
    fn update_many(&self, collection: &str, ids: &[Uuid], update: &Update)
        -> StorageResult<usize>;
}
