//! PostgreSQL repository over the `documents` table.

use super::DocumentRepository;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use hearth_engine::{Document, Timestamp};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

const MAX_CONNECTIONS: u32 = 10;

/// A stored document row from the database.
#[derive(Debug)]
pub struct StoredDocument {
    pub id: String,
    pub collection: String,
    pub updated_at: i64,
    pub purged: bool,
    pub body: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            id: row.try_get("id")?,
            collection: row.try_get("collection")?,
            updated_at: row.try_get("updated_at")?,
            purged: row.try_get("purged")?,
            body: row.try_get("body")?,
            received_at: row.try_get("received_at")?,
        })
    }
}

impl StoredDocument {
    /// Decode the stored body.
    pub fn to_document(&self) -> Result<Document> {
        Document::from_json(&self.body).map_err(|e| {
            AppError::Internal(format!(
                "stored document {} in {} (received {}) is unreadable: {e}",
                self.id, self.collection, self.received_at
            ))
        })
    }
}

fn decode_all(rows: Vec<StoredDocument>) -> Result<Vec<Document>> {
    rows.iter().map(StoredDocument::to_document).collect()
}

/// Repository backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_url)
            .await?;

        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::Internal(format!("migration failed: {e}")))?;

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl DocumentRepository for PgRepository {
    async fn find_many(&self, ids: &[String]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, StoredDocument>(
            r#"
            SELECT id, collection, updated_at, purged, body, received_at
            FROM documents
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        decode_all(rows)
    }

    async fn upsert(&self, doc: &Document) -> Result<()> {
        let body = serde_json::to_string(doc).map_err(hearth_engine::Error::from)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, collection, updated_at, purged, body)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                collection = EXCLUDED.collection,
                updated_at = EXCLUDED.updated_at,
                purged = EXCLUDED.purged,
                body = EXCLUDED.body,
                received_at = NOW()
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.collection)
        .bind(doc.updated_at)
        .bind(doc.purged)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn updated_since(&self, since: Timestamp) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, StoredDocument>(
            r#"
            SELECT id, collection, updated_at, purged, body, received_at
            FROM documents
            WHERE updated_at >= $1
            ORDER BY updated_at ASC, id ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        decode_all(rows)
    }

    async fn purged_among(&self, ids: &[String]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM documents WHERE purged AND id = ANY($1)")
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
