//! Embedded SQLite driver.
//!
//! All documents live in one `documents` table keyed by id, with the full
//! document stored as JSON text. Fields declared in the schema get partial
//! expression indexes per collection.

use super::StorageDriver;
use crate::{document::Document, error::Result, schema::Schema, CollectionName, Error};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tokio::sync::OnceCell;
use tracing::debug;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY NOT NULL,
    collection TEXT NOT NULL,
    body TEXT NOT NULL
)
"#;

const CREATE_COLLECTION_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents (collection)";

/// A driver backed by an SQLite database file (or `sqlite::memory:`).
#[derive(Debug)]
pub struct SqliteDriver {
    url: String,
    pool: OnceCell<SqlitePool>,
}

impl SqliteDriver {
    /// Create an unopened driver for a connection URL such as
    /// `sqlite://data/app.db` or `sqlite::memory:`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: OnceCell::new(),
        }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool.get().ok_or_else(|| {
            Error::StorageUnavailable(format!("sqlite driver for '{}' is not initialised", self.url))
        })
    }

    async fn connect(&self) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::from_str(&self.url)
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .create_if_missing(true);

        // Every connection to an in-memory database sees its own copy.
        let max_connections = if self.url.contains(":memory:") { 1 } else { 5 };

        SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))
    }

    async fn create_schema_indexes(pool: &SqlitePool, schema: &Schema) -> Result<()> {
        for collection in schema.collection_names() {
            let Some(declared) = schema.get_collection(&collection) else {
                continue;
            };

            for field in &declared.fields {
                if !is_plain_identifier(&collection) || !is_plain_identifier(field) {
                    debug!(collection = %collection, field = %field, "skipping index for non-identifier name");
                    continue;
                }

                let statement = format!(
                    "CREATE INDEX IF NOT EXISTS {} \
                     ON documents (json_extract(body, '$.{field}')) \
                     WHERE collection = '{collection}'",
                    index_name(&collection, field)
                );
                sqlx::query(&statement).execute(pool).await?;
            }
        }

        Ok(())
    }
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Index name for one declared field. The length prefixes keep names
/// distinct when the parts themselves contain underscores.
fn index_name(collection: &str, field: &str) -> String {
    format!("idx_{}_{collection}_{}_{field}", collection.len(), field.len())
}

fn decode(body: &str) -> Result<Document> {
    Document::from_json(body)
}

#[async_trait]
impl StorageDriver for SqliteDriver {
    async fn init(&self, schema: &Schema) -> Result<()> {
        let pool = self.pool.get_or_try_init(|| self.connect()).await?;

        sqlx::query(CREATE_TABLE).execute(pool).await?;
        sqlx::query(CREATE_COLLECTION_INDEX).execute(pool).await?;
        Self::create_schema_indexes(pool, schema).await?;

        debug!(url = %self.url, version = schema.latest_version(), "sqlite driver ready");
        Ok(())
    }

    async fn create(&self, doc: Document) -> Result<Document> {
        let body = serde_json::to_string(&doc)?;

        let result = sqlx::query("INSERT INTO documents (id, collection, body) VALUES (?1, ?2, ?3)")
            .bind(&doc.id)
            .bind(&doc.collection)
            .bind(body)
            .execute(self.pool()?)
            .await;

        match result {
            Ok(_) => Ok(doc),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(Error::Conflict(doc.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, doc: Document) -> Result<Document> {
        let body = serde_json::to_string(&doc)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, collection, body) VALUES (?1, ?2, ?3)
            ON CONFLICT (id) DO UPDATE SET
                collection = excluded.collection,
                body = excluded.body
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.collection)
        .bind(body)
        .execute(self.pool()?)
        .await?;

        Ok(doc)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Document>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT body FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool()?)
            .await?;

        row.map(|(body,)| decode(&body)).transpose()
    }

    async fn scan(&self, collection: Option<&str>) -> Result<Vec<Document>> {
        let rows: Vec<(String,)> = match collection {
            Some(name) => {
                sqlx::query_as("SELECT body FROM documents WHERE collection = ?1 ORDER BY id")
                    .bind(name)
                    .fetch_all(self.pool()?)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT body FROM documents ORDER BY id")
                    .fetch_all(self.pool()?)
                    .await?
            }
        };

        rows.iter().map(|(body,)| decode(body)).collect()
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id)
            .execute(self.pool()?)
            .await?;
        Ok(())
    }

    async fn get_collections(&self) -> Result<Vec<CollectionName>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT collection FROM documents ORDER BY collection")
                .fetch_all(self.pool()?)
                .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn wipe(&self) -> Result<()> {
        sqlx::query("DELETE FROM documents")
            .execute(self.pool()?)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSchema, Migration};

    #[test]
    fn plain_identifiers() {
        assert!(is_plain_identifier("due_date"));
        assert!(is_plain_identifier("Tasks2"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("title'); DROP TABLE documents; --"));
        assert!(!is_plain_identifier("a.b"));
    }

    #[test]
    fn index_names_do_not_collide() {
        assert_ne!(index_name("a_b", "c"), index_name("a", "b_c"));
        assert_ne!(index_name("a_1", "b"), index_name("a", "1_b"));
        assert_eq!(index_name("tasks", "title"), "idx_5_tasks_5_title");
    }

    #[tokio::test]
    async fn every_declared_field_gets_its_own_index() {
        let schema = Schema::new().with_version(
            Migration::new(1)
                .with_collection(CollectionSchema::new("a_b", ["c"]))
                .with_collection(CollectionSchema::new("a", ["b_c"])),
        );
        let driver = SqliteDriver::new("sqlite::memory:");
        driver.init(&schema).await.unwrap();

        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type = 'index' AND sql IS NOT NULL AND name != 'idx_documents_collection' \
             ORDER BY name",
        )
        .fetch_all(driver.pool().unwrap())
        .await
        .unwrap();

        assert_eq!(names, vec!["idx_1_a_3_b_c", "idx_3_a_b_1_c"]);
    }

    #[tokio::test]
    async fn unopened_driver_is_unavailable() {
        let driver = SqliteDriver::new("sqlite::memory:");
        assert!(matches!(
            driver.get_all().await,
            Err(Error::StorageUnavailable(_))
        ));
    }
}
