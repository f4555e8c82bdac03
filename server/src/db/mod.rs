//! Document persistence.
//!
//! Handlers only see [`DocumentRepository`]. [`PgRepository`] keeps documents
//! in PostgreSQL; [`MemoryRepository`] keeps them in a concurrent map and
//! backs tests and database-less runs.

mod memory;
mod records;

pub use memory::MemoryRepository;
pub use records::{PgRepository, StoredDocument};

use crate::error::Result;
use async_trait::async_trait;
use hearth_engine::{Document, Timestamp};
use std::fmt::Debug;

/// Storage for the server's copy of every document.
#[async_trait]
pub trait DocumentRepository: Send + Sync + Debug {
    /// Current copies of the given ids. Unknown ids are left out.
    async fn find_many(&self, ids: &[String]) -> Result<Vec<Document>>;

    /// Insert or replace a document.
    async fn upsert(&self, doc: &Document) -> Result<()>;

    /// Documents whose `_updated_at` is at or after `since`, tombstones
    /// included, ordered by `_updated_at`.
    ///
    /// Timestamps have one-second resolution, so a document written in the
    /// same second as a client's watermark must still be returned.
    async fn updated_since(&self, since: Timestamp) -> Result<Vec<Document>>;

    /// The subset of `ids` stored as tombstones.
    async fn purged_among(&self, ids: &[String]) -> Result<Vec<String>> {
        Ok(self
            .find_many(ids)
            .await?
            .into_iter()
            .filter(|doc| doc.purged)
            .map(|doc| doc.id)
            .collect())
    }
}
