//! In-process document store.
//!
//! Every collection lives behind one mutex, which is what makes the atomic
//! operations atomic. Nothing survives the process; useful for tests and for
//! embedding a queue shared only between threads.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::document::Document;
use crate::error::{StorageError, StorageResult};
use crate::storage::filter::{Filter, Update};
use crate::storage::traits::{CollectionBounds, DocumentStore};

struct Entry {
    document: Document,
    size: u64,
}

impl Entry {
    fn new(document: Document) -> StorageResult<Self> {
        let size = encoded_size(&document)?;
        Ok(Self { document, size })
    }
}

struct Collection {
    bounds: CollectionBounds,
    indexes: BTreeSet<String>,
    entries: VecDeque<Entry>,
    total_bytes: u64,
}

impl Collection {
    fn new(bounds: CollectionBounds) -> Self {
        Self {
            bounds,
            indexes: BTreeSet::new(),
            entries: VecDeque::new(),
            total_bytes: 0,
        }
    }

    fn push(&mut self, entry: Entry) {
        self.total_bytes += entry.size;
        self.entries.push_back(entry);
        self.evict_overflow();
    }

    /// Drop the oldest entries until both bounds hold again. The newest entry
    /// is always kept, even if it alone exceeds the byte budget.
    fn evict_overflow(&mut self) {
        while self.entries.len() > 1
            && (self.entries.len() as u64 > self.bounds.max_count
                || self.total_bytes > self.bounds.max_bytes)
        {
            if let Some(evicted) = self.entries.pop_front() {
                self.total_bytes -= evicted.size;
                debug!(id = %evicted.document.id, "evicted oldest document");
            }
        }
    }

    fn replace(&mut self, index: usize, document: Document) -> StorageResult<()> {
        let entry = Entry::new(document)?;
        let slot = &mut self.entries[index];
        self.total_bytes = self.total_bytes - slot.size + entry.size;
        *slot = entry;
        Ok(())
    }
}

/// Non-persistent `DocumentStore`.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physically present documents, acknowledged ones included.
    pub fn len(&self, collection: &str) -> StorageResult<usize> {
        let mut guard = self.lock()?;
        Ok(collection_mut(&mut guard, collection)?.entries.len())
    }

    pub fn is_empty(&self, collection: &str) -> StorageResult<bool> {
        Ok(self.len(collection)? == 0)
    }

    /// Index paths registered on a collection.
    pub fn indexes(&self, collection: &str) -> StorageResult<Vec<String>> {
        let mut guard = self.lock()?;
        Ok(collection_mut(&mut guard, collection)?
            .indexes
            .iter()
            .cloned()
            .collect())
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))
    }
}

fn collection_mut<'a>(
    collections: &'a mut HashMap<String, Collection>,
    name: &str,
) -> StorageResult<&'a mut Collection> {
    collections
        .get_mut(name)
        .ok_or_else(|| StorageError::Unavailable(format!("collection not found: {name}")))
}

fn encoded_size(document: &Document) -> StorageResult<u64> {
    Ok(serde_json::to_vec(document)?.len() as u64)
}

impl DocumentStore for MemoryStore {
    fn ensure_bounded_collection(&self, name: &str, bounds: CollectionBounds) -> StorageResult<()> {
        let mut guard = self.lock()?;
        match guard.get(name) {
            Some(existing) if existing.bounds != bounds => {
                warn!(
                    collection = name,
                    existing = ?existing.bounds,
                    requested = ?bounds,
                    "collection already exists with different bounds, keeping existing"
                );
            }
            Some(_) => {}
            None => {
                guard.insert(name.to_string(), Collection::new(bounds));
                debug!(collection = name, ?bounds, "created bounded collection");
            }
        }
        Ok(())
    }

    fn ensure_index(&self, collection: &str, field_path: &str) -> StorageResult<()> {
        let mut guard = self.lock()?;
        collection_mut(&mut guard, collection)?
            .indexes
            .insert(field_path.to_string());
        Ok(())
    }

    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Document>> {
        let mut guard = self.lock()?;
        let coll = collection_mut(&mut guard, collection)?;
        Ok(coll
            .entries
            .iter()
            .filter(|e| filter.matches(&e.document))
            .take(limit.unwrap_or(usize::MAX))
            .map(|e| e.document.clone())
            .collect())
    }

    fn count(&self, collection: &str, filter: &Filter) -> StorageResult<usize> {
        let mut guard = self.lock()?;
        let coll = collection_mut(&mut guard, collection)?;
        Ok(coll
            .entries
            .iter()
            .filter(|e| filter.matches(&e.document))
            .count())
    }

    fn insert(&self, collection: &str, document: &Document) -> StorageResult<()> {
        let entry = Entry::new(document.clone())?;
        let mut guard = self.lock()?;
        collection_mut(&mut guard, collection)?.push(entry);
        Ok(())
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StorageResult<Option<Document>> {
        let mut guard = self.lock()?;
        let coll = collection_mut(&mut guard, collection)?;
        let Some(index) = coll
            .entries
            .iter()
            .position(|e| filter.matches(&e.document))
        else {
            return Ok(None);
        };
        let previous = coll.entries[index].document.clone();
        let mut updated = previous.clone();
        update.apply(&mut updated)?;
        coll.replace(index, updated)?;
        Ok(Some(previous))
    }

    fn insert_if_absent(
        &self,
        collection: &str,
        filter: &Filter,
        document: &Document,
    ) -> StorageResult<bool> {
        let entry = Entry::new(document.clone())?;
        let mut guard = self.lock()?;
        let coll = collection_mut(&mut guard, collection)?;
        if coll.entries.iter().any(|e| filter.matches(&e.document)) {
            return Ok(false);
        }
        coll.push(entry);
        Ok(true)
    }

    fn update_many(&self, collection: &str, ids: &[Uuid], update: &Update) -> StorageResult<usize> {
        let mut guard = self.lock()?;
        let coll = collection_mut(&mut guard, collection)?;
        let mut updated = 0;
        for index in 0..coll.entries.len() {
            if !ids.contains(&coll.entries[index].document.id) {
                continue;
            }
            let mut document = coll.entries[index].document.clone();
            update.apply(&mut document)?;
            coll.replace(index, document)?;
            updated += 1;
        }
        Ok(updated)
    }
}
