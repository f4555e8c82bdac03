//! In-memory repository.

use super::DocumentRepository;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use hearth_engine::{Document, Timestamp};
use std::sync::Arc;

/// Repository keeping documents in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    docs: DashMap<String, Document>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new repository wrapped in an Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[async_trait]
impl DocumentRepository for MemoryRepository {
    async fn find_many(&self, ids: &[String]) -> Result<Vec<Document>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.docs.get(id).map(|entry| entry.value().clone()))
            .collect())
    }

    async fn upsert(&self, doc: &Document) -> Result<()> {
        self.docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn updated_since(&self, since: Timestamp) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .docs
            .iter()
            .filter(|entry| entry.value().updated_at >= since)
            .map(|entry| entry.value().clone())
            .collect();

        docs.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, updated_at: Timestamp) -> Document {
        Document::new(id, "tasks", Default::default(), updated_at)
    }

    #[tokio::test]
    async fn updated_since_includes_the_watermark_second() {
        let repo = MemoryRepository::new();
        repo.upsert(&doc("b", 20)).await.unwrap();
        repo.upsert(&doc("a", 20)).await.unwrap();
        repo.upsert(&doc("c", 10)).await.unwrap();
        repo.upsert(&doc("d", 9)).await.unwrap();

        let ids: Vec<_> = repo
            .updated_since(10)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn purged_among_reports_tombstones() {
        let repo = MemoryRepository::new();
        let mut gone = doc("gone", 5);
        gone.mark_purged(6);
        repo.upsert(&gone).await.unwrap();
        repo.upsert(&doc("kept", 5)).await.unwrap();

        let ids = ["gone".to_string(), "kept".to_string(), "unknown".to_string()];
        assert_eq!(repo.purged_among(&ids).await.unwrap(), vec!["gone"]);
        assert_eq!(repo.len(), 2);
    }
}
