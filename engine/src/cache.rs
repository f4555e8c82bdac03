//! In-process document cache.
//!
//! Each database name owns one [`Cache`] with four regions:
//!
//! - `by_id`: documents by id
//! - `by_collection`: full snapshots of collections that have been scanned
//! - `collections`: sorted known collection names, filled lazily
//! - `results`: finished query results keyed by query fingerprint
//!
//! Every mutation that goes through the store updates `by_id` and any
//! existing snapshot bucket for the document in the same call, and drops
//! the result cache of the affected collections. Locks are held only for
//! the duration of one region update and never across an `.await`.
//!
//! Each of those mutations also moves the collection's epoch forward. A
//! reader takes the epoch before scanning the driver and hands it back when
//! installing the scan or a query result; the install is refused if a write
//! landed in between, so a finished write is never hidden by an older scan.
//!
//! Caches are handed out by a [`CacheRegistry`], which is injected into the
//! store so that independent stores (and tests) can be isolated.

use crate::{document::Document, query::QueryResult, CollectionName, DocumentId};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct CacheState {
    by_id: HashMap<DocumentId, Document>,
    by_collection: HashMap<CollectionName, Vec<Document>>,
    collections: Option<Vec<CollectionName>>,
    results: HashMap<CollectionName, HashMap<String, QueryResult>>,
    changes: u64,
    epochs: HashMap<CollectionName, u64>,
    floor: u64,
}

impl CacheState {
    fn touch(&mut self, collection: &str) {
        self.changes += 1;
        self.epochs.insert(collection.to_string(), self.changes);
        self.results.remove(collection);
    }

    fn epoch(&self, collection: &str) -> u64 {
        self.epochs.get(collection).copied().unwrap_or(self.floor)
    }

    fn remove_from_bucket(&mut self, collection: &str, id: &str) {
        if let Some(bucket) = self.by_collection.get_mut(collection) {
            if let Some(index) = bucket.iter().position(|d| d.id == id) {
                bucket.remove(index);
            }
        }
    }
}

/// The cache of one database.
#[derive(Debug, Default)]
pub struct Cache {
    state: Mutex<CacheState>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        // A panic while holding the lock cannot leave a region half-written:
        // every update is a single map operation.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace a document in `by_id` and in its snapshot bucket,
    /// if that bucket exists. A document whose collection changed is taken
    /// out of the old bucket.
    pub fn put_doc(&self, doc: &Document) {
        let mut state = self.state();

        if let Some(previous) = state.by_id.get(&doc.id) {
            if previous.collection != doc.collection {
                let old = previous.collection.clone();
                state.remove_from_bucket(&old, &doc.id);
                state.touch(&old);
            }
        }
        state.touch(&doc.collection);

        if let Some(bucket) = state.by_collection.get_mut(&doc.collection) {
            match bucket.iter().position(|d| d.id == doc.id) {
                Some(index) => bucket[index] = doc.clone(),
                None => bucket.push(doc.clone()),
            }
        }

        state.by_id.insert(doc.id.clone(), doc.clone());
    }

    /// Remove a document from `by_id` and from every snapshot bucket that
    /// holds it.
    pub fn remove_doc(&self, id: &str) {
        let mut state = self.state();

        let known_collection = state.by_id.remove(id).map(|doc| doc.collection);

        match known_collection {
            Some(collection) => {
                state.remove_from_bucket(&collection, id);
                state.touch(&collection);
            }
            None => {
                // Not in by_id; it may still sit in a snapshot.
                let holding: Vec<_> = state
                    .by_collection
                    .iter()
                    .filter(|(_, bucket)| bucket.iter().any(|d| d.id == id))
                    .map(|(name, _)| name.clone())
                    .collect();
                for collection in holding {
                    state.remove_from_bucket(&collection, id);
                    state.touch(&collection);
                }
            }
        }
    }

    pub fn get_doc(&self, id: &str) -> Option<Document> {
        self.state().by_id.get(id).cloned()
    }

    /// Current mutation epoch of a collection.
    pub fn epoch(&self, collection: &str) -> u64 {
        self.state().epoch(collection)
    }

    /// Store a full collection scan taken at `epoch`. Documents are also put
    /// in `by_id`. Returns `false`, leaving the cache untouched, when the
    /// collection changed since `epoch` was read.
    pub fn put_collection_snapshot(
        &self,
        collection: &str,
        docs: &[Document],
        epoch: u64,
    ) -> bool {
        let mut state = self.state();
        if state.epoch(collection) != epoch {
            debug!(collection = %collection, "stale collection scan discarded");
            return false;
        }

        for doc in docs {
            state.by_id.insert(doc.id.clone(), doc.clone());
        }
        state
            .by_collection
            .insert(collection.to_string(), docs.to_vec());
        true
    }

    /// A copy of the snapshot; changing it does not touch the cache.
    pub fn get_collection_snapshot(&self, collection: &str) -> Option<Vec<Document>> {
        self.state().by_collection.get(collection).cloned()
    }

    pub fn remove_collection_snapshot(&self, collection: &str) {
        let mut state = self.state();
        state.by_collection.remove(collection);
        state.touch(collection);
    }

    pub fn set_known_collections(&self, mut names: Vec<CollectionName>) {
        names.sort();
        names.dedup();
        self.state().collections = Some(names);
    }

    /// Record a collection name. Does nothing until the list has been
    /// populated once.
    pub fn add_known_collection(&self, name: &str) {
        let mut state = self.state();
        if let Some(names) = state.collections.as_mut() {
            if let Err(index) = names.binary_search_by(|n| n.as_str().cmp(name)) {
                names.insert(index, name.to_string());
            }
        }
    }

    pub fn get_known_collections(&self) -> Option<Vec<CollectionName>> {
        self.state().collections.clone()
    }

    pub fn get_result(&self, collection: &str, fingerprint: &str) -> Option<QueryResult> {
        let result = self
            .state()
            .results
            .get(collection)
            .and_then(|results| results.get(fingerprint))
            .cloned();

        if result.is_some() {
            debug!(collection = %collection, "query result cache hit");
        }
        result
    }

    /// Cache a result computed from data read at `epoch`. Refused like
    /// [`Cache::put_collection_snapshot`] when the collection moved on.
    pub fn put_result(
        &self,
        collection: &str,
        fingerprint: String,
        result: QueryResult,
        epoch: u64,
    ) -> bool {
        let mut state = self.state();
        if state.epoch(collection) != epoch {
            return false;
        }

        state
            .results
            .entry(collection.to_string())
            .or_default()
            .insert(fingerprint, result);
        true
    }

    /// Drop every cached result for a collection.
    pub fn invalidate_results(&self, collection: &str) {
        self.state().touch(collection);
    }

    /// Drop all regions. Epochs read before the call stay stale.
    pub fn clear(&self) {
        let mut state = self.state();
        let changes = state.changes + 1;
        *state = CacheState {
            changes,
            floor: changes,
            ..CacheState::default()
        };
    }
}

/// Hands out one shared [`Cache`] per database name.
#[derive(Debug, Default)]
pub struct CacheRegistry {
    caches: DashMap<String, Arc<Cache>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry wrapped in `Arc` for sharing between stores.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// The cache for `database`, created on first use.
    pub fn cache(&self, database: &str) -> Arc<Cache> {
        self.caches
            .entry(database.to_string())
            .or_insert_with(|| Arc::new(Cache::new()))
            .clone()
    }

    /// Clear the cache of one database.
    pub fn clear(&self, database: &str) {
        if let Some(cache) = self.caches.get(database) {
            cache.clear();
        }
    }

    /// Clear and forget every cache.
    pub fn clear_all(&self) {
        for entry in self.caches.iter() {
            entry.value().clear();
        }
        self.caches.clear();
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}
