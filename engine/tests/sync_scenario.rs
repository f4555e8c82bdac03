//! End-to-end sync flows against an in-process server stand-in.

use async_trait::async_trait;
use hearth_engine::{
    Document, DocumentStore, Download, Error, LwwRequest, LwwResponse, ManualClock, Result,
    SyncApi, SyncEngine, ValidateRequest, ValidateResponse,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Keeps the newest copy of every document and answers like the reference
/// server does.
#[derive(Debug, Default)]
struct LwwServer {
    docs: Mutex<HashMap<String, Document>>,
    revoked: Mutex<Vec<String>>,
}

impl LwwServer {
    fn revoke(&self, id: &str) {
        self.revoked.lock().unwrap().push(id.to_string());
    }

    fn put(&self, doc: Document) {
        self.docs.lock().unwrap().insert(doc.id.clone(), doc);
    }
}

#[async_trait]
impl SyncApi for LwwServer {
    async fn validate(&self, request: &ValidateRequest) -> Result<ValidateResponse> {
        let revoked = self.revoked.lock().unwrap();
        Ok(ValidateResponse {
            invalid: request
                .docs
                .iter()
                .filter(|id| revoked.contains(id))
                .cloned()
                .collect(),
        })
    }

    async fn lww(&self, request: &LwwRequest) -> Result<LwwResponse> {
        let mut docs = self.docs.lock().unwrap();
        let mut accepted = Vec::new();
        let mut downloads = Vec::new();

        for upload in &request.uploads {
            let newer = docs
                .get(&upload.id)
                .map_or(true, |current| upload.updated_at >= current.updated_at);
            if newer {
                let mut stored = upload.clone();
                stored.synced = true;
                docs.insert(stored.id.clone(), stored);
                accepted.push(upload.id.clone());
            } else if let Some(current) = docs.get(&upload.id) {
                downloads.push(Download::from_document(current)?);
            }
        }

        for doc in docs.values() {
            if doc.updated_at > request.last_sync_at
                && !accepted.contains(&doc.id)
                && !downloads.iter().any(|d| d.doc_id == doc.id)
            {
                downloads.push(Download::from_document(doc)?);
            }
        }

        Ok(LwwResponse {
            downloads,
            invalid: Vec::new(),
        })
    }
}

async fn client(name: &str, server: Arc<LwwServer>, clock: Arc<ManualClock>) -> SyncEngine {
    let store = DocumentStore::builder(name).clock(clock).open().await.unwrap();
    SyncEngine::new(Arc::new(store), server)
}

#[tokio::test]
async fn trash_sync_then_validate() {
    let server = Arc::new(LwwServer::default());
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = client("scenario", server.clone(), clock.clone()).await;
    let store = engine.store().clone();

    let a = store.collection("tasks").create(json!({"title": "A"})).await.unwrap();
    let b = store.collection("tasks").create(json!({"title": "B"})).await.unwrap();

    clock.advance(1);
    store.trash(a.clone()).await.unwrap();

    let visible = store.collection("tasks").get().await.unwrap().into_docs();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, b.id);
    assert_eq!(store.collection("tasks").with_trashed().count().await.unwrap(), 2);

    let report = engine.sync(true).await.unwrap().completed().unwrap();
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.acknowledged, 2);
    assert!(store.get_all().await.unwrap().iter().all(|d| d.synced));

    server.revoke(&b.id);
    let report = engine.validate().await.unwrap().completed().unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.removed, 1);

    let remaining = store.get_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, a.id);
}

#[tokio::test]
async fn two_clients_converge_on_newest_write() {
    let server = Arc::new(LwwServer::default());
    let clock = Arc::new(ManualClock::new(5_000));
    let first = client("first", server.clone(), clock.clone()).await;
    let second = client("second", server.clone(), clock.clone()).await;

    let doc = first
        .store()
        .create("notes", json!({"body": "draft"}))
        .await
        .unwrap();
    first.sync(false).await.unwrap();
    second.sync(false).await.unwrap();

    let copy = second.store().find(&doc.id).await.unwrap().unwrap();
    assert!(copy.synced);
    assert_eq!(copy.get("body"), Some(&json!("draft")));

    // The second client edits later, so its version wins.
    clock.advance(10);
    let mut stale = doc.clone();
    stale.set("body", json!("first edit"));
    first
        .store()
        .update(stale, Default::default())
        .await
        .unwrap();

    clock.advance(10);
    let mut newer = copy;
    newer.set("body", json!("second edit"));
    second.store().update(newer, Default::default()).await.unwrap();

    second.sync(false).await.unwrap();
    first.sync(false).await.unwrap();

    let resolved = first.store().find(&doc.id).await.unwrap().unwrap();
    assert_eq!(resolved.get("body"), Some(&json!("second edit")));
    assert!(resolved.synced);
}

#[tokio::test]
async fn purge_reaches_other_clients() {
    let server = Arc::new(LwwServer::default());
    let clock = Arc::new(ManualClock::new(9_000));
    let first = client("first", server.clone(), clock.clone()).await;
    let second = client("second", server.clone(), clock.clone()).await;

    let doc = first.store().create("tasks", json!({"title": "gone"})).await.unwrap();
    first.sync(false).await.unwrap();
    second.sync(false).await.unwrap();
    assert!(second.store().find(&doc.id).await.unwrap().is_some());

    clock.advance(3);
    first.store().delete(doc.clone()).await.unwrap();
    let report = first.sync(false).await.unwrap().completed().unwrap();
    assert_eq!(report.purged, 1);
    assert!(first.store().find(&doc.id).await.unwrap().is_none());

    let report = second.sync(false).await.unwrap().completed().unwrap();
    assert_eq!(report.removed, 1);
    assert!(second.store().find(&doc.id).await.unwrap().is_none());
}

#[tokio::test]
async fn server_copy_seeds_an_empty_client() {
    let server = Arc::new(LwwServer::default());
    let mut seeded = Document::new("seed", "tasks", Default::default(), 100);
    seeded.set("title", json!("from server"));
    server.put(seeded);

    let engine = client("empty", server, Arc::new(ManualClock::new(200))).await;
    let report = engine.sync(true).await.unwrap().completed().unwrap();
    assert_eq!(report.downloaded, 1);

    let doc = engine
        .store()
        .collection("tasks")
        .get_by_id("seed")
        .await
        .unwrap()
        .unwrap();
    assert!(doc.synced);
    assert_eq!(doc.get("title"), Some(&json!("from server")));
}

#[derive(Debug)]
struct RejectingServer;

#[async_trait]
impl SyncApi for RejectingServer {
    async fn validate(&self, _request: &ValidateRequest) -> Result<ValidateResponse> {
        Err(Error::Unauthorized)
    }

    async fn lww(&self, _request: &LwwRequest) -> Result<LwwResponse> {
        Err(Error::Unauthorized)
    }
}

#[tokio::test]
async fn rejected_credentials_leave_local_data_alone() {
    let store = Arc::new(DocumentStore::open_in_memory("offline").await.unwrap());
    store.create("tasks", json!({"title": "A"})).await.unwrap();

    let engine = SyncEngine::new(store.clone(), Arc::new(RejectingServer));
    let err = engine.sync_on_start().await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized));
    assert!(!engine.is_authenticated());

    let docs = store.get_all().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert!(!docs[0].synced);
}
