//! In-memory driver.

use super::StorageDriver;
use crate::{
    document::Document, error::Result, schema::Schema, CollectionName, DocumentId, Error,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    docs: BTreeMap<DocumentId, Document>,
    by_collection: BTreeMap<CollectionName, BTreeSet<DocumentId>>,
}

impl MemoryState {
    fn insert(&mut self, doc: Document) {
        if let Some(previous) = self.docs.get(&doc.id) {
            if previous.collection != doc.collection {
                let previous_collection = previous.collection.clone();
                self.unindex(&previous_collection, &doc.id);
            }
        }

        self.by_collection
            .entry(doc.collection.clone())
            .or_default()
            .insert(doc.id.clone());
        self.docs.insert(doc.id.clone(), doc);
    }

    fn remove(&mut self, id: &str) {
        if let Some(doc) = self.docs.remove(id) {
            self.unindex(&doc.collection, id);
        }
    }

    fn unindex(&mut self, collection: &str, id: &str) {
        if let Some(ids) = self.by_collection.get_mut(collection) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_collection.remove(collection);
            }
        }
    }
}

/// A driver that keeps everything in process memory.
///
/// Iteration follows key order, like a cursor over an ordered object store.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: RwLock<Option<MemoryState>>,
}

impl MemoryDriver {
    /// Create an unopened driver. Call [`StorageDriver::init`] before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all data and go back to the unopened state.
    pub async fn close(&self) {
        *self.state.write().await = None;
    }
}

fn unavailable() -> Error {
    Error::StorageUnavailable("memory driver is not initialised".into())
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn init(&self, _schema: &Schema) -> Result<()> {
        let mut state = self.state.write().await;
        if state.is_none() {
            *state = Some(MemoryState::default());
        }
        Ok(())
    }

    async fn create(&self, doc: Document) -> Result<Document> {
        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or_else(unavailable)?;

        if state.docs.contains_key(&doc.id) {
            return Err(Error::Conflict(doc.id));
        }

        state.insert(doc.clone());
        Ok(doc)
    }

    async fn update(&self, doc: Document) -> Result<Document> {
        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or_else(unavailable)?;

        state.insert(doc.clone());
        Ok(doc)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Document>> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or_else(unavailable)?;

        Ok(state.docs.get(id).cloned())
    }

    async fn scan(&self, collection: Option<&str>) -> Result<Vec<Document>> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or_else(unavailable)?;

        let docs = match collection {
            Some(name) => state
                .by_collection
                .get(name)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.docs.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default(),
            None => state.docs.values().cloned().collect(),
        };

        Ok(docs)
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or_else(unavailable)?;

        state.remove(id);
        Ok(())
    }

    async fn get_collections(&self) -> Result<Vec<CollectionName>> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or_else(unavailable)?;

        Ok(state.by_collection.keys().cloned().collect())
    }

    async fn wipe(&self) -> Result<()> {
        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or_else(unavailable)?;

        *state = MemoryState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn doc(id: &str, collection: &str) -> Document {
        let mut fields = Map::new();
        fields.insert("title".into(), json!(id));
        Document::new(id, collection, fields, 1000)
    }

    async fn open() -> MemoryDriver {
        let driver = MemoryDriver::new();
        driver.init(&Schema::new()).await.unwrap();
        driver
    }

    #[tokio::test]
    async fn unopened_driver_is_unavailable() {
        let driver = MemoryDriver::new();
        let err = driver.get_by_id("x").await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));

        let err = driver.create(doc("a", "tasks")).await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn create_and_lookup() {
        let driver = open().await;
        driver.create(doc("a", "tasks")).await.unwrap();

        let found = driver.get_by_id("a").await.unwrap().unwrap();
        assert_eq!(found.collection, "tasks");
        assert!(driver.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let driver = open().await;
        driver.create(doc("a", "tasks")).await.unwrap();

        let err = driver.create(doc("a", "notes")).await.unwrap_err();
        assert_eq!(err, Error::Conflict("a".into()));
    }

    #[tokio::test]
    async fn scan_is_collection_filtered_and_key_ordered() {
        let driver = open().await;
        for (id, collection) in [("c", "tasks"), ("a", "tasks"), ("b", "notes")] {
            driver.create(doc(id, collection)).await.unwrap();
        }

        let tasks: Vec<_> = driver
            .scan(Some("tasks"))
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(tasks, vec!["a", "c"]);
        assert_eq!(driver.get_all().await.unwrap().len(), 3);
        assert!(driver.scan(Some("missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_reindexes_moved_documents() {
        let driver = open().await;
        driver.create(doc("a", "tasks")).await.unwrap();

        driver.update(doc("a", "archive")).await.unwrap();

        assert!(driver.scan(Some("tasks")).await.unwrap().is_empty());
        assert_eq!(driver.scan(Some("archive")).await.unwrap().len(), 1);
        assert_eq!(driver.get_collections().await.unwrap(), vec!["archive"]);
    }

    #[tokio::test]
    async fn delete_and_wipe() {
        let driver = open().await;
        driver.create(doc("a", "tasks")).await.unwrap();
        driver.create(doc("b", "notes")).await.unwrap();

        driver.delete_by_id("a").await.unwrap();
        driver.delete_by_id("a").await.unwrap();
        assert_eq!(driver.get_collections().await.unwrap(), vec!["notes"]);

        driver.wipe().await.unwrap();
        assert!(driver.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_makes_driver_unavailable() {
        let driver = open().await;
        driver.close().await;
        assert!(matches!(
            driver.get_all().await,
            Err(Error::StorageUnavailable(_))
        ));
    }
}
