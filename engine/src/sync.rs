//! Sync engine.
//!
//! Two flows reconcile a store with the server:
//!
//! - **validate** sends every local id and deletes the ids the server
//!   reports invalid.
//! - **sync** uploads dirty documents, applies the server's last-write-wins
//!   verdict and downloads, and finalizes purges.
//!
//! Each flow is guarded per store by an in-flight flag. A caller arriving
//! while the flag is held gets [`SyncOutcome::Skipped`] instead of waiting.
//! The flag is released by a guard on every exit path, errors included.
//!
//! The server decides LWW conflicts. A download always overwrites the local
//! copy; the client does not compare timestamps again.

use crate::{
    api::{HttpSyncApi, LwwRequest, SyncApi, ValidateRequest},
    config::{SyncConfig, DEFAULT_TIMEOUT_SECS},
    document::Document,
    error::Result,
    store::{DocumentStore, StoreEvent, UpdateOptions},
    Error, Timestamp,
};
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Message shown once when the server rejects the credentials.
pub const UNAUTHORIZED_NOTICE: &str = "Not logged in, sync disabled";

/// Per-store in-flight flags.
#[derive(Debug, Default)]
pub(crate) struct InFlightFlags {
    syncing: AtomicBool,
    validating: AtomicBool,
}

/// Holds an in-flight flag until dropped.
#[derive(Debug)]
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Online/offline check.
pub trait Connectivity: Send + Sync + Debug {
    fn is_online(&self) -> bool;
}

/// Connectivity that never goes offline.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Connectivity switched by the application.
#[derive(Debug)]
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// User-facing notification surface.
pub trait Notifier: Send + Sync + Debug {
    fn notify(&self, message: &str, level: NoticeLevel);
}

/// Notifier that writes notices to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, level: NoticeLevel) {
        match level {
            NoticeLevel::Info => info!(notice = %message),
            NoticeLevel::Warning => warn!(notice = %message),
            NoticeLevel::Error => tracing::error!(notice = %message),
        }
    }
}

/// Why a flow did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    InFlight,
}

/// Result of a guarded flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome<T> {
    Skipped(SkipReason),
    Completed(T),
}

impl<T> SyncOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, SyncOutcome::Skipped(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Skipped(_) => None,
        }
    }
}

/// Summary of a sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Watermark sent to the server
    pub last_sync_at: Timestamp,
    /// Documents sent
    pub uploaded: usize,
    /// Uploads now marked synced
    pub acknowledged: usize,
    /// Purged uploads physically removed
    pub purged: usize,
    /// Ids removed because the server reported them invalid
    pub invalidated: usize,
    /// Server documents written locally
    pub downloaded: usize,
    /// Server documents removed locally because they are purged
    pub removed: usize,
    /// Downloads that could not be decoded
    pub rejected: usize,
}

/// Summary of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidateReport {
    /// Ids sent to the server
    pub checked: usize,
    /// Ids removed locally
    pub removed: usize,
}

/// Drives validate and sync for one store.
#[derive(Debug)]
pub struct SyncEngine {
    store: Arc<DocumentStore>,
    api: Arc<dyn SyncApi>,
    connectivity: Arc<dyn Connectivity>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    authenticated: AtomicBool,
    unauthorized_notified: AtomicBool,
}

impl SyncEngine {
    pub fn new(store: Arc<DocumentStore>, api: Arc<dyn SyncApi>) -> Self {
        Self {
            store,
            api,
            connectivity: Arc::new(AlwaysOnline),
            notifier: Arc::new(TracingNotifier),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            authenticated: AtomicBool::new(true),
            unauthorized_notified: AtomicBool::new(false),
        }
    }

    /// Engine talking HTTP to the server described by `config`.
    pub fn from_config(store: Arc<DocumentStore>, config: SyncConfig) -> Result<Self> {
        let timeout = config.timeout;
        let api = HttpSyncApi::new(config)?;
        Ok(Self::new(store, Arc::new(api)).with_timeout(timeout))
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Bound on each network call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// False once the server has answered 401, until a call succeeds again.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    async fn call<T, F>(&self, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.timeout.as_secs())),
        };

        match &result {
            Ok(_) => self.authenticated.store(true, Ordering::Release),
            Err(Error::Unauthorized) => self.authenticated.store(false, Ordering::Release),
            Err(_) => {}
        }

        result
    }

    fn precheck<'a>(
        &self,
        flag: &'a AtomicBool,
        flow: &str,
    ) -> std::result::Result<InFlightGuard<'a>, SkipReason> {
        if !self.connectivity.is_online() {
            debug!(flow, "offline, skipping");
            return Err(SkipReason::Offline);
        }

        InFlightGuard::acquire(flag).ok_or_else(|| {
            debug!(flow, "already in flight, skipping");
            SkipReason::InFlight
        })
    }

    /// Delete every local document the server no longer accepts.
    pub async fn validate(&self) -> Result<SyncOutcome<ValidateReport>> {
        let _guard = match self.precheck(&self.store.in_flight.validating, "validate") {
            Ok(guard) => guard,
            Err(reason) => return Ok(SyncOutcome::Skipped(reason)),
        };

        let docs: Vec<_> = self
            .store
            .get_all()
            .await?
            .into_iter()
            .map(|doc| doc.id)
            .collect();
        let checked = docs.len();

        let response = self.call(self.api.validate(&ValidateRequest { docs })).await?;

        for id in &response.invalid {
            self.store.delete_by_id(id).await?;
        }

        let report = ValidateReport {
            checked,
            removed: response.invalid.len(),
        };
        info!(checked = report.checked, removed = report.removed, "validation complete");
        self.store.emit(StoreEvent::Validated);

        Ok(SyncOutcome::Completed(report))
    }

    /// Run one LWW sync cycle.
    pub async fn sync(&self, fire_events: bool) -> Result<SyncOutcome<SyncReport>> {
        let _guard = match self.precheck(&self.store.in_flight.syncing, "sync") {
            Ok(guard) => guard,
            Err(reason) => return Ok(SyncOutcome::Skipped(reason)),
        };

        let docs = self.store.get_all().await?;
        let last_sync_at = docs
            .iter()
            .filter(|doc| doc.synced)
            .map(|doc| doc.updated_at)
            .max()
            .unwrap_or(0);
        let uploads: Vec<Document> = docs.into_iter().filter(|doc| !doc.synced).collect();

        let request = LwwRequest {
            last_sync_at,
            uploads,
        };
        let mut report = SyncReport {
            last_sync_at,
            uploaded: request.uploads.len(),
            ..SyncReport::default()
        };

        debug!(last_sync_at, uploads = report.uploaded, "sync request");
        let response = self.call(self.api.lww(&request)).await?;

        for uploaded in request.uploads {
            if uploaded.purged {
                self.store.delete_by_id(&uploaded.id).await?;
                report.purged += 1;
                continue;
            }

            // A document edited while the request was in flight stays dirty.
            match self.store.find(&uploaded.id).await? {
                Some(current) if current == uploaded => {
                    let mut acknowledged = current;
                    acknowledged.synced = true;
                    self.store
                        .update(acknowledged, UpdateOptions::silent())
                        .await?;
                    report.acknowledged += 1;
                }
                Some(_) => debug!(id = %uploaded.id, "changed during sync, left dirty"),
                None => debug!(id = %uploaded.id, "removed during sync"),
            }
        }

        for id in &response.invalid {
            self.store.delete_by_id(id).await?;
            report.invalidated += 1;
        }

        for download in &response.downloads {
            let mut doc = match download.parse() {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(doc_id = %download.doc_id, error = %e, "skipping malformed download");
                    report.rejected += 1;
                    continue;
                }
            };

            if doc.purged {
                self.store.delete_by_id(&doc.id).await?;
                report.removed += 1;
                continue;
            }

            doc.synced = true;
            match self.store.find(&doc.id).await? {
                Some(_) => {
                    self.store.update(doc, UpdateOptions::silent()).await?;
                }
                None => {
                    self.store.store(doc).await?;
                }
            }
            report.downloaded += 1;
        }

        info!(
            uploaded = report.uploaded,
            acknowledged = report.acknowledged,
            purged = report.purged,
            invalidated = report.invalidated,
            downloaded = report.downloaded,
            removed = report.removed,
            "sync complete"
        );

        if fire_events {
            self.store.emit(StoreEvent::Synced);
        }

        Ok(SyncOutcome::Completed(report))
    }

    /// Validate, then sync. Rejected credentials are reported once through
    /// the notifier and still returned as [`Error::Unauthorized`].
    pub async fn sync_on_start(&self) -> Result<()> {
        let result = async {
            self.validate().await?;
            self.sync(true).await?;
            Ok(())
        }
        .await;

        if let Err(Error::Unauthorized) = &result {
            warn!("sync server rejected credentials");
            if !self.unauthorized_notified.swap(true, Ordering::AcqRel) {
                self.notifier.notify(UNAUTHORIZED_NOTICE, NoticeLevel::Warning);
            }
        }

        result
    }
}
