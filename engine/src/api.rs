//! Remote sync API.
//!
//! The engine talks to the server through the [`SyncApi`] trait. Two calls
//! exist: `validate`, which reports which local ids the server no longer
//! accepts, and `lww`, which exchanges dirty documents for server changes.
//! [`HttpSyncApi`] implements the trait over HTTP/JSON with `reqwest`.

use crate::{
    config::SyncConfig, document::Document, error::Result, DocumentId, Error, Timestamp,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;
use tracing::debug;

/// Body of a validate call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidateRequest {
    /// Every local document id
    pub docs: Vec<DocumentId>,
}

/// Reply to a validate call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidateResponse {
    /// Ids to remove locally
    #[serde(default)]
    pub invalid: Vec<DocumentId>,
}

/// Body of an LWW sync call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LwwRequest {
    /// Highest `_updated_at` among synced local documents
    pub last_sync_at: Timestamp,
    /// Dirty local documents
    pub uploads: Vec<Document>,
}

/// A server document sent back to the client.
///
/// The document travels as JSON text inside the JSON reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub doc_id: DocumentId,
    pub document: String,
}

impl Download {
    /// Wrap a document for the wire.
    pub fn from_document(doc: &Document) -> Result<Self> {
        Ok(Self {
            doc_id: doc.id.clone(),
            document: serde_json::to_string(doc)?,
        })
    }

    /// Decode the embedded document.
    pub fn parse(&self) -> Result<Document> {
        let doc = Document::from_json(&self.document)?;
        if doc.id != self.doc_id {
            return Err(Error::Validation(format!(
                "download '{}' carries document '{}'",
                self.doc_id, doc.id
            )));
        }
        Ok(doc)
    }
}

/// Reply to an LWW sync call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LwwResponse {
    /// Server documents the client must apply
    #[serde(default)]
    pub downloads: Vec<Download>,
    /// Ids to remove locally
    #[serde(default)]
    pub invalid: Vec<DocumentId>,
}

/// The remote side of synchronization.
#[async_trait]
pub trait SyncApi: Send + Sync + Debug {
    async fn validate(&self, request: &ValidateRequest) -> Result<ValidateResponse>;

    async fn lww(&self, request: &LwwRequest) -> Result<LwwResponse>;
}

/// [`SyncApi`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpSyncApi {
    config: SyncConfig,
    client: reqwest::Client,
}

impl HttpSyncApi {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hearth-engine/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn post<B, T>(&self, url: String, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned + Send,
    {
        debug!(url = %url, "sync request");

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            return Err(Error::Network(format!("{url} returned {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    self.transport_error(e)
                } else {
                    Error::Serialization(format!("invalid reply from {url}: {e}"))
                }
            })
    }

    fn transport_error(&self, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::Timeout(self.config.timeout.as_secs())
        } else {
            Error::Network(error.to_string())
        }
    }
}

#[async_trait]
impl SyncApi for HttpSyncApi {
    async fn validate(&self, request: &ValidateRequest) -> Result<ValidateResponse> {
        self.post(self.config.validate_url(), request).await
    }

    async fn lww(&self, request: &LwwRequest) -> Result<LwwResponse> {
        self.post(self.config.lww_url(), request).await
    }
}
