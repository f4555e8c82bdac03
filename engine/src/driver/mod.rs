//! Storage drivers.
//!
//! A driver persists documents in a single key space keyed by `_id`, with a
//! secondary index by collection. It stores whatever it is given: trash and
//! purge semantics live in the store, not here.

mod memory;
mod sqlite;

pub use memory::MemoryDriver;
pub use sqlite::SqliteDriver;

use crate::{
    document::Document,
    error::Result,
    query::{Query, QueryResult},
    schema::Schema,
    CollectionName,
};
use async_trait::async_trait;
use std::fmt::Debug;

/// The persistence contract every backend implements.
///
/// Calls made before [`StorageDriver::init`] fail with
/// [`crate::Error::StorageUnavailable`].
#[async_trait]
pub trait StorageDriver: Send + Sync + Debug {
    /// Open the backend and prepare it for the given schema. Idempotent.
    async fn init(&self, schema: &Schema) -> Result<()>;

    /// Insert a new document. Fails with `Conflict` if the id is taken.
    async fn create(&self, doc: Document) -> Result<Document>;

    /// Insert or replace a document.
    async fn update(&self, doc: Document) -> Result<Document>;

    /// Point lookup.
    async fn get_by_id(&self, id: &str) -> Result<Option<Document>>;

    /// Full scan, optionally restricted to one collection, in key order.
    async fn scan(&self, collection: Option<&str>) -> Result<Vec<Document>>;

    /// Scan the query's collection and evaluate the query over it.
    async fn get(&self, query: &Query) -> Result<QueryResult> {
        let docs = self.scan(Some(&query.collection)).await?;
        Ok(query.execute(docs))
    }

    /// Remove a document. Removing a missing id is not an error.
    async fn delete_by_id(&self, id: &str) -> Result<()>;

    /// Every stored document, trashed and purged included.
    async fn get_all(&self) -> Result<Vec<Document>> {
        self.scan(None).await
    }

    /// Distinct collection names, sorted.
    async fn get_collections(&self) -> Result<Vec<CollectionName>>;

    /// Remove everything.
    async fn wipe(&self) -> Result<()>;
}
