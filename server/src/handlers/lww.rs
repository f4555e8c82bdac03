//! LWW handler - exchanges dirty client documents for server changes.

use crate::db::DocumentRepository;
use crate::error::Result;
use hearth_engine::{Document, Download, LwwResponse, Timestamp};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Request body for LWW sync.
///
/// Uploads are kept as raw JSON so a malformed one can be reported back
/// instead of failing the whole request.
#[derive(Debug, Default, Deserialize)]
pub struct LwwBody {
    #[serde(default)]
    pub last_sync_at: Timestamp,
    #[serde(default)]
    pub uploads: Vec<Value>,
}

/// Outcome of comparing uploads with the server's copies.
#[derive(Debug, Default, PartialEq)]
pub struct Resolution {
    /// Uploads that become the server copy
    pub accepted: Vec<Document>,
    /// Server copies that beat an upload
    pub lost: Vec<Document>,
}

/// Split raw uploads into documents and the ids of malformed uploads.
///
/// An upload without a usable `_id` cannot be reported and is dropped.
pub fn parse_uploads(uploads: Vec<Value>) -> (Vec<Document>, Vec<String>) {
    let mut docs = Vec::with_capacity(uploads.len());
    let mut invalid = Vec::new();

    for upload in uploads {
        let id = upload
            .get("_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(String::from);

        match Document::from_value(upload) {
            Ok(doc) if !doc.collection.is_empty() => docs.push(doc),
            Ok(doc) => invalid.push(doc.id),
            Err(e) => match id {
                Some(id) => {
                    tracing::debug!(id = %id, error = %e, "malformed upload");
                    invalid.push(id);
                }
                None => tracing::warn!(error = %e, "dropping upload without _id"),
            },
        }
    }

    (docs, invalid)
}

/// Last write wins: an upload replaces the server copy unless the server
/// copy was updated strictly later. Ties go to the upload.
pub fn resolve(uploads: Vec<Document>, existing: &HashMap<String, Document>) -> Resolution {
    let mut resolution = Resolution::default();

    for mut upload in uploads {
        match existing.get(&upload.id) {
            Some(current) if current.updated_at > upload.updated_at => {
                resolution.lost.push(current.clone());
            }
            _ => {
                upload.synced = true;
                resolution.accepted.push(upload);
            }
        }
    }

    resolution
}

/// Process an LWW sync request from a client.
pub async fn handle_lww(repo: &dyn DocumentRepository, body: LwwBody) -> Result<LwwResponse> {
    let (uploads, invalid) = parse_uploads(body.uploads);

    let ids: Vec<String> = uploads.iter().map(|doc| doc.id.clone()).collect();
    let existing: HashMap<String, Document> = repo
        .find_many(&ids)
        .await?
        .into_iter()
        .map(|doc| (doc.id.clone(), doc))
        .collect();

    let Resolution { accepted, lost } = resolve(uploads, &existing);

    for doc in &accepted {
        repo.upsert(doc).await?;
    }

    let mut skip: HashSet<&str> = accepted.iter().map(|doc| doc.id.as_str()).collect();
    skip.extend(lost.iter().map(|doc| doc.id.as_str()));

    let mut downloads = lost
        .iter()
        .map(Download::from_document)
        .collect::<hearth_engine::Result<Vec<_>>>()?;

    for doc in repo.updated_since(body.last_sync_at).await? {
        if !skip.contains(doc.id.as_str()) {
            downloads.push(Download::from_document(&doc)?);
        }
    }

    tracing::info!(
        last_sync_at = body.last_sync_at,
        accepted = accepted.len(),
        lost = lost.len(),
        invalid = invalid.len(),
        downloads = downloads.len(),
        "lww sync handled"
    );

    Ok(LwwResponse { downloads, invalid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, updated_at: Timestamp) -> Document {
        let mut doc = Document::new(id, "tasks", Default::default(), 1);
        doc.updated_at = updated_at;
        doc
    }

    #[test]
    fn newer_or_equal_upload_wins() {
        let existing: HashMap<_, _> = [("a".to_string(), doc("a", 10)), ("b".to_string(), doc("b", 10))]
            .into_iter()
            .collect();

        let resolution = resolve(vec![doc("a", 10), doc("b", 11), doc("c", 1)], &existing);

        let accepted: Vec<_> = resolution.accepted.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(accepted, vec!["a", "b", "c"]);
        assert!(resolution.accepted.iter().all(|d| d.synced));
        assert!(resolution.lost.is_empty());
    }

    #[test]
    fn older_upload_loses_to_server_copy() {
        let mut server_copy = doc("a", 20);
        server_copy.set("title", json!("server"));
        let existing: HashMap<_, _> = [("a".to_string(), server_copy.clone())].into_iter().collect();

        let resolution = resolve(vec![doc("a", 19)], &existing);

        assert!(resolution.accepted.is_empty());
        assert_eq!(resolution.lost, vec![server_copy]);
    }

    #[test]
    fn malformed_uploads_are_reported_by_id() {
        let (docs, invalid) = parse_uploads(vec![
            json!({"_id": "ok", "_collection": "tasks"}),
            json!({"_id": "no-collection"}),
            json!({"_id": "empty-collection", "_collection": ""}),
            json!({"_collection": "tasks"}),
            json!("not an object"),
        ]);

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "ok");
        assert_eq!(invalid, vec!["no-collection", "empty-collection"]);
    }
}
