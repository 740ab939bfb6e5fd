use crate::model::{
    is_immediate_child, normalize_parent, PathSeparator, PeerName, RemoteDirectory, RemoteListing,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Failures at the remote boundary. `Offline` is surfaced to callers as a
/// not-found equivalent and is not retried automatically; anything else is
/// a protocol-level fault.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("peer {0} is offline")]
    Offline(PeerName),
    #[error("remote protocol error: {0}")]
    Protocol(String),
}

/// Percent-complete counter for an in-flight browse. Shared between the
/// fetching client and status pollers; cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct BrowseProgress(Arc<AtomicU32>);

impl BrowseProgress {
    pub fn set_percent(&self, percent: u32) {
        self.0.store(percent.min(100), Ordering::Relaxed);
    }

    pub fn percent(&self) -> f32 {
        self.0.load(Ordering::Relaxed) as f32
    }
}

/// The wire client used to talk to a remote peer. Both operations are
/// fallible, unbounded-latency network calls; every call site wraps them in
/// a timeout. Implementations over an actual protocol live outside this
/// crate.
pub trait RemoteListingClient: Clone + Send + Sync + 'static {
    /// Fetch the peer's full listing, reporting percent-complete through
    /// `progress` as data arrives.
    fn browse(
        &self,
        peer: PeerName,
        progress: BrowseProgress,
    ) -> impl Future<Output = Result<RemoteListing, RemoteError>> + Send;

    /// Fetch a single directory. By convention the first record is the
    /// requested directory itself (carrying its files); any further records
    /// are its immediate subdirectories.
    fn list_directory(
        &self,
        peer: PeerName,
        path: String,
    ) -> impl Future<Output = Result<Vec<RemoteDirectory>, RemoteError>> + Send;
}

/// One file the caller wants transferred, fully qualified within the
/// peer's share.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub filename: String,
    pub size: u64,
}

/// Hand-off point to the external transfer subsystem.
pub trait TransferQueue: Send + Sync {
    fn enqueue(
        &self,
        peer: &PeerName,
        files: Vec<DownloadRequest>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Serves a fixed listing loaded from a JSON fixture. Used by the CLI to
/// drive the pipeline without a wire protocol, and handy as a second client
/// implementation in tests.
#[derive(Clone)]
pub struct StaticListingClient {
    listing: Arc<RemoteListing>,
    separator: PathSeparator,
}

impl StaticListingClient {
    pub fn new(listing: RemoteListing) -> Self {
        let separator = PathSeparator::detect(
            listing
                .directories
                .iter()
                .chain(&listing.locked_directories)
                .filter_map(|d| d.name.as_deref()),
        )
        .unwrap_or_default();
        Self {
            listing: Arc::new(listing),
            separator,
        }
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let listing: RemoteListing = serde_json::from_str(&raw)?;
        Ok(Self::new(listing))
    }
}

impl RemoteListingClient for StaticListingClient {
    async fn browse(
        &self,
        _peer: PeerName,
        progress: BrowseProgress,
    ) -> Result<RemoteListing, RemoteError> {
        progress.set_percent(100);
        Ok((*self.listing).clone())
    }

    async fn list_directory(
        &self,
        _peer: PeerName,
        path: String,
    ) -> Result<Vec<RemoteDirectory>, RemoteError> {
        let parent = normalize_parent(&path, self.separator).to_string();
        let mut result = Vec::new();
        let all = self
            .listing
            .directories
            .iter()
            .chain(&self.listing.locked_directories);
        for entry in all {
            let Some(name) = entry.name.as_deref() else {
                continue;
            };
            if normalize_parent(name, self.separator) == parent {
                result.insert(0, entry.clone());
            } else if is_immediate_child(name, &parent, self.separator) {
                result.push(entry.clone());
            }
        }
        if result.is_empty() {
            return Err(RemoteError::Protocol(format!(
                "no such directory: {path}"
            )));
        }
        Ok(result)
    }
}

/// Transfer queue that only logs what would be enqueued. Stands in for the
/// real transfer subsystem in the CLI.
#[derive(Clone, Default)]
pub struct LoggingTransferQueue;

impl TransferQueue for LoggingTransferQueue {
    async fn enqueue(&self, peer: &PeerName, files: Vec<DownloadRequest>) -> anyhow::Result<()> {
        for file in &files {
            tracing::info!(peer = %peer, file = %file.filename, size = file.size, "queued");
        }
        tracing::info!(peer = %peer, count = files.len(), "download batch submitted");
        Ok(())
    }
}
