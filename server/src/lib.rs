//! Hearth Server - reference last-write-wins sync authority.
//!
//! Serves the two endpoints `hearth-engine` clients sync against:
//! `POST /api/apps/db/sync/validate` and `POST /api/apps/db/sync/lww`.
//! Documents live in PostgreSQL, or in memory when no database is configured.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;

use crate::config::Config;
use crate::db::{DocumentRepository, MemoryRepository, PgRepository};
use std::sync::Arc;

pub use routes::build_router;

/// Application state shared across handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub repo: Arc<dyn DocumentRepository>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(repo: Arc<dyn DocumentRepository>, config: Config) -> Self {
        Self {
            repo,
            config: Arc::new(config),
        }
    }

    /// State over the repository `config` asks for.
    pub async fn from_config(config: Config) -> error::Result<Self> {
        let repo: Arc<dyn DocumentRepository> = match &config.database_url {
            Some(url) => Arc::new(PgRepository::connect(url).await?),
            None => {
                tracing::warn!("DATABASE_URL not set, keeping documents in memory");
                MemoryRepository::new_shared()
            }
        };

        Ok(Self::new(repo, config))
    }
}
