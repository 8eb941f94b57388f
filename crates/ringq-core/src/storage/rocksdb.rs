use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rocksdb::{
    ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded, Options,
    WriteBatch,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::document::Document;
use crate::error::{StorageError, StorageResult};
use crate::storage::filter::{Filter, Update};
use crate::storage::keys;
use crate::storage::traits::{CollectionBounds, DocumentStore};

const CF_DOCUMENTS: &str = "documents";
const CF_IDS: &str = "ids";
const CF_COLLECTIONS: &str = "collections";

/// All column family names (excluding `default` which RocksDB creates automatically).
const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_IDS, CF_COLLECTIONS];

type DB = DBWithThreadMode<MultiThreaded>;

/// Per-collection bookkeeping stored in the `collections` CF.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct CollectionState {
    bounds: CollectionBounds,
    indexes: BTreeSet<String>,
    next_seq: u64,
    count: u64,
    total_bytes: u64,
}

/// RocksDB-backed document store.
///
/// Reads go straight to the database. Every mutation takes the store-wide
/// write lock and commits through a single `WriteBatch`, so a
/// read-modify-write like `find_one_and_update` is indivisible for all
/// callers sharing this handle. RocksDB itself admits a single process per
/// data directory.
pub struct RocksDbStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksDbStore {
    /// Open or create a RocksDB database at the given path with all column families.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let cf_opts = Options::default();
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> StorageResult<()> {
        for name in COLUMN_FAMILIES {
            let cf = self.cf(name)?;
            self.db.flush_cf(&cf)?;
        }
        Ok(())
    }

    fn cf(&self, name: &str) -> StorageResult<std::sync::Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::RocksDb(format!("column family not found: {name}")))
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StorageError::Unavailable("rocksdb write lock poisoned".to_string()))
    }

    fn get_state(&self, collection: &str) -> StorageResult<Option<CollectionState>> {
        let cf = self.cf(CF_COLLECTIONS)?;
        match self.db.get_cf(&cf, collection.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn state(&self, collection: &str) -> StorageResult<CollectionState> {
        self.get_state(collection)?
            .ok_or_else(|| StorageError::Unavailable(format!("collection not found: {collection}")))
    }

    fn put_state(
        &self,
        batch: &mut WriteBatch,
        collection: &str,
        state: &CollectionState,
    ) -> StorageResult<()> {
        let cf = self.cf(CF_COLLECTIONS)?;
        batch.put_cf(&cf, collection.as_bytes(), serde_json::to_vec(state)?);
        Ok(())
    }

    /// Visit documents oldest first until `visit` returns `false`.
    fn scan(
        &self,
        collection: &str,
        mut visit: impl FnMut(&[u8], &[u8]) -> StorageResult<bool>,
    ) -> StorageResult<()> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let prefix = keys::document_prefix(collection)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, rocksdb::Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if !visit(&key[..], &value[..])? {
                break;
            }
        }
        Ok(())
    }

    fn first_match(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> StorageResult<Option<(Vec<u8>, Document)>> {
        let mut found = None;
        self.scan(collection, |key, value| {
            let document: Document = serde_json::from_slice(value)?;
            if filter.matches(&document) {
                found = Some((key.to_vec(), document));
                return Ok(false);
            }
            Ok(true)
        })?;
        Ok(found)
    }

    /// Stage a rewrite of an existing document, keeping the byte total current.
    fn stage_replace(
        &self,
        batch: &mut WriteBatch,
        state: &mut CollectionState,
        key: &[u8],
        old_len: usize,
        document: &Document,
    ) -> StorageResult<()> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let value = serde_json::to_vec(document)?;
        state.total_bytes = state.total_bytes.saturating_sub(old_len as u64) + value.len() as u64;
        batch.put_cf(&cf, key, &value);
        Ok(())
    }

    /// Stage an append plus whatever evictions it forces. Must be called with
    /// the write lock held.
    fn stage_insert(
        &self,
        batch: &mut WriteBatch,
        collection: &str,
        state: &mut CollectionState,
        document: &Document,
    ) -> StorageResult<()> {
        let docs_cf = self.cf(CF_DOCUMENTS)?;
        let ids_cf = self.cf(CF_IDS)?;

        let seq = state.next_seq;
        state.next_seq += 1;
        let value = serde_json::to_vec(document)?;
        batch.put_cf(&docs_cf, keys::document_key(collection, seq)?, &value);
        batch.put_cf(
            &ids_cf,
            keys::id_key(collection, &document.id)?,
            seq.to_be_bytes(),
        );
        state.count += 1;
        state.total_bytes += value.len() as u64;

        // The new document is only in the batch, so the scan never reaches it.
        let mut evictions = Vec::new();
        self.scan(collection, |key, value| {
            if state.count <= 1
                || (state.count <= state.bounds.max_count
                    && state.total_bytes <= state.bounds.max_bytes)
            {
                return Ok(false);
            }
            let evicted: Document = serde_json::from_slice(value)?;
            state.count -= 1;
            state.total_bytes = state.total_bytes.saturating_sub(value.len() as u64);
            evictions.push((key.to_vec(), evicted.id));
            Ok(true)
        })?;
        for (key, id) in evictions {
            debug!(collection, %id, "evicted oldest document");
            batch.delete_cf(&docs_cf, key);
            batch.delete_cf(&ids_cf, keys::id_key(collection, &id)?);
        }
        Ok(())
    }
}

impl DocumentStore for RocksDbStore {
    fn ensure_bounded_collection(&self, name: &str, bounds: CollectionBounds) -> StorageResult<()> {
        let _guard = self.lock()?;
        if let Some(existing) = self.get_state(name)? {
            if existing.bounds != bounds {
                warn!(
                    collection = name,
                    existing = ?existing.bounds,
                    requested = ?bounds,
                    "collection already exists with different bounds, keeping existing"
                );
            }
            return Ok(());
        }
        let state = CollectionState {
            bounds,
            indexes: BTreeSet::new(),
            next_seq: 0,
            count: 0,
            total_bytes: 0,
        };
        let mut batch = WriteBatch::default();
        self.put_state(&mut batch, name, &state)?;
        self.db.write(batch)?;
        debug!(collection = name, ?bounds, "created bounded collection");
        Ok(())
    }

    fn ensure_index(&self, collection: &str, field_path: &str) -> StorageResult<()> {
        let _guard = self.lock()?;
        let mut state = self.state(collection)?;
        if !state.indexes.insert(field_path.to_string()) {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        self.put_state(&mut batch, collection, &state)?;
        self.db.write(batch)?;
        Ok(())
    }

    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Document>> {
        self.state(collection)?;
        let limit = limit.unwrap_or(usize::MAX);
        let mut results = Vec::new();
        if limit == 0 {
            return Ok(results);
        }
        self.scan(collection, |_, value| {
            let document: Document = serde_json::from_slice(value)?;
            if filter.matches(&document) {
                results.push(document);
            }
            Ok(results.len() < limit)
        })?;
        Ok(results)
    }

    fn count(&self, collection: &str, filter: &Filter) -> StorageResult<usize> {
        self.state(collection)?;
        let mut count = 0;
        self.scan(collection, |_, value| {
            let document: Document = serde_json::from_slice(value)?;
            if filter.matches(&document) {
                count += 1;
            }
            Ok(true)
        })?;
        Ok(count)
    }

    fn insert(&self, collection: &str, document: &Document) -> StorageResult<()> {
        let _guard = self.lock()?;
        let mut state = self.state(collection)?;
        let mut batch = WriteBatch::default();
        self.stage_insert(&mut batch, collection, &mut state, document)?;
        self.put_state(&mut batch, collection, &state)?;
        self.db.write(batch)?;
        Ok(())
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StorageResult<Option<Document>> {
        let _guard = self.lock()?;
        let mut state = self.state(collection)?;
        let Some((key, previous)) = self.first_match(collection, filter)? else {
            return Ok(None);
        };
        let old_len = serde_json::to_vec(&previous)?.len();
        let mut updated = previous.clone();
        update.apply(&mut updated)?;

        let mut batch = WriteBatch::default();
        self.stage_replace(&mut batch, &mut state, &key, old_len, &updated)?;
        self.put_state(&mut batch, collection, &state)?;
        self.db.write(batch)?;
        Ok(Some(previous))
    }

    fn insert_if_absent(
        &self,
        collection: &str,
        filter: &Filter,
        document: &Document,
    ) -> StorageResult<bool> {
        let _guard = self.lock()?;
        let mut state = self.state(collection)?;
        if self.first_match(collection, filter)?.is_some() {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        self.stage_insert(&mut batch, collection, &mut state, document)?;
        self.put_state(&mut batch, collection, &state)?;
        self.db.write(batch)?;
        Ok(true)
    }

    fn update_many(&self, collection: &str, ids: &[Uuid], update: &Update) -> StorageResult<usize> {
        let _guard = self.lock()?;
        let mut state = self.state(collection)?;
        let docs_cf = self.cf(CF_DOCUMENTS)?;
        let ids_cf = self.cf(CF_IDS)?;

        let mut batch = WriteBatch::default();
        let mut seen = BTreeSet::new();
        let mut updated = 0;
        for id in ids {
            if !seen.insert(*id) {
                continue;
            }
            let Some(seq) = self.db.get_cf(&ids_cf, keys::id_key(collection, id)?)? else {
                continue;
            };
            let seq = keys::parse_seq(&seq).ok_or_else(|| {
                StorageError::Serialization(format!("corrupt id index entry for {id}"))
            })?;
            let key = keys::document_key(collection, seq)?;
            let Some(value) = self.db.get_cf(&docs_cf, &key)? else {
                continue;
            };
            let mut document: Document = serde_json::from_slice(&value)?;
            update.apply(&mut document)?;
            self.stage_replace(&mut batch, &mut state, &key, value.len(), &document)?;
            updated += 1;
        }
        self.put_state(&mut batch, collection, &state)?;
        self.db.write(batch)?;
        Ok(updated)
    }
}
