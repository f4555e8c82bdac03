//! # Hearth Engine
//!
//! A local-first document store with last-write-wins synchronization.
//!
//! Applications read and write JSON documents entirely against local
//! storage. A sync engine later reconciles them with a remote authority,
//! which decides conflicts by the newest `_updated_at`.
//!
//! ## Layers
//!
//! - [`StorageDriver`] - async persistence over one key space keyed by `_id`.
//!   [`MemoryDriver`] and [`SqliteDriver`] are provided.
//! - [`Cache`] - per-database cache of documents, collection snapshots,
//!   known collection names and finished query results, handed out by a
//!   [`CacheRegistry`].
//! - [`Query`] - immutable query values evaluated by a typed filter
//!   interpreter: filter, sort, slice, group.
//! - [`DocumentStore`] - the facade: collection queries and the mutation API
//!   that stamps lifecycle metadata.
//! - [`SyncEngine`] - validate and LWW sync flows against a [`SyncApi`].
//!
//! ## Document lifecycle
//!
//! Every document carries `_id`, `_collection`, `_created_at`,
//! `_updated_at`, `_deleted_at`, `_purged` and `_synced`. Local edits mark a
//! document dirty. Trashed documents are hidden from queries by default.
//! Purged documents stay in storage until a sync cycle has uploaded them.
//!
//! ## Quick Start
//!
//! ```rust
//! use hearth_engine::{Direction, DocumentStore};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> hearth_engine::Result<()> {
//! let store = DocumentStore::open_in_memory("app").await?;
//!
//! let a = store.create("tasks", json!({"title": "A"})).await?;
//! store.create("tasks", json!({"title": "B"})).await?;
//! store.trash(a).await?;
//!
//! let visible = store.collection("tasks").get().await?;
//! assert_eq!(visible.total, 1);
//!
//! let all = store
//!     .collection("tasks")
//!     .with_trashed()
//!     .order_by("title", Direction::Asc)
//!     .get()
//!     .await?;
//! assert_eq!(all.total, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Sync
//!
//! [`SyncEngine::from_config`] builds an engine over HTTP from a
//! [`SyncConfig`], usually loaded with [`SyncConfig::from_env`].

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod document;
pub mod driver;
pub mod error;
pub mod id;
pub mod query;
pub mod schema;
pub mod store;
pub mod sync;

// Re-export main types at crate root
pub use api::{
    Download, HttpSyncApi, LwwRequest, LwwResponse, SyncApi, ValidateRequest, ValidateResponse,
};
pub use cache::{Cache, CacheRegistry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use document::Document;
pub use driver::{MemoryDriver, SqliteDriver, StorageDriver};
pub use error::{Error, Result};
pub use query::{Direction, Filter, Grouped, Operator, Order, Query, QueryResult};
pub use schema::{CollectionSchema, Migration, Schema};
pub use store::{CollectionQuery, DocumentStore, StoreBuilder, StoreEvent, UpdateOptions};
pub use sync::{
    AlwaysOnline, Connectivity, ConnectivityFlag, NoticeLevel, Notifier, SkipReason, SyncEngine,
    SyncOutcome, SyncReport, TracingNotifier, ValidateReport,
};

/// Type aliases for clarity
pub type DocumentId = String;
pub type CollectionName = String;
/// Unix time in seconds
pub type Timestamp = i64;
pub type SchemaVersion = u32;
