use crate::client::{DownloadRequest, RemoteListingClient, TransferQueue};
use crate::model::{join_path, normalize_directories, PathSeparator, PeerName, RemoteDirectory};
use crate::service::retry::{with_retry, RetryPolicy};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Bounds concurrent per-directory fetches during selection resolution, so
/// selecting a wide tree cannot flood the peer.
static DIRECTORY_FETCH_SEMAPHORE: Lazy<Arc<Semaphore>> =
    Lazy::new(|| Arc::new(Semaphore::new(MAX_CONCURRENT_DIRECTORY_FETCHES)));

const MAX_CONCURRENT_DIRECTORY_FETCHES: usize = 3;

/// What the user picked: whole directories (resolved recursively) and
/// individually selected files (already fully qualified).
#[derive(Clone, Debug, Default)]
pub struct DownloadSelection {
    pub directories: Vec<String>,
    pub files: Vec<DownloadRequest>,
}

impl DownloadSelection {
    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.files.is_empty()
    }

    pub fn select_directory(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.directories.contains(&path) {
            self.directories.push(path);
        }
    }

    pub fn deselect_directory(&mut self, path: &str) {
        self.directories.retain(|selected| selected != path);
    }

    pub fn toggle_directory(&mut self, path: &str) {
        if self.directories.iter().any(|selected| selected == path) {
            self.deselect_directory(path);
        } else {
            self.directories.push(path.to_string());
        }
    }

    /// Select every listed directory at once, keeping first-seen order.
    pub fn select_all(&mut self, paths: impl IntoIterator<Item = String>) {
        for path in paths {
            self.select_directory(path);
        }
    }

    pub fn clear(&mut self) {
        self.directories.clear();
        self.files.clear();
    }
}

/// A directory that could not be resolved after retries. The rest of the
/// selection proceeds without it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedDirectory {
    pub path: String,
    pub error: String,
}

/// What came out of a selection: how many files were handed to the transfer
/// subsystem, which directories were skipped, and a user-facing notice when
/// nothing was enqueued at all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub queued: usize,
    pub failed_directories: Vec<FailedDirectory>,
    pub notice: Option<String>,
}

/// Expands a selection into a flat batch of download requests and submits
/// it. Directories are fetched live from the peer one at a time (their
/// cached file lists may be stale), breadth-first into any subdirectories
/// the peer reports.
#[derive(Clone, Debug)]
pub struct DownloadSelectionCoordinator<C> {
    client: C,
    retry: RetryPolicy,
    directory_timeout: Duration,
}

impl<C: RemoteListingClient> DownloadSelectionCoordinator<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            directory_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_directory_timeout(mut self, directory_timeout: Duration) -> Self {
        self.directory_timeout = directory_timeout;
        self
    }

    /// Resolve `selection` against `peer` and enqueue everything that
    /// resolved. Individual directory failures become warnings in the
    /// report; only queue submission itself can fail the call.
    pub async fn submit<Q: TransferQueue>(
        &self,
        peer: PeerName,
        selection: DownloadSelection,
        separator: PathSeparator,
        queue: &Q,
    ) -> anyhow::Result<DownloadReport> {
        if selection.is_empty() {
            return Ok(DownloadReport {
                notice: Some("nothing selected".to_string()),
                ..Default::default()
            });
        }

        let mut files = selection.files;
        let mut failed_directories = Vec::new();
        self.resolve_directories(
            &peer,
            selection.directories,
            separator,
            &mut files,
            &mut failed_directories,
        )
        .await?;

        for failure in &failed_directories {
            tracing::warn!(
                peer = %peer,
                path = %failure.path,
                error = %failure.error,
                "directory skipped"
            );
        }

        if files.is_empty() {
            return Ok(DownloadReport {
                queued: 0,
                failed_directories,
                notice: Some("selection resolved to no files".to_string()),
            });
        }

        let queued = files.len();
        queue.enqueue(&peer, files).await?;
        tracing::info!(peer = %peer, queued, skipped = failed_directories.len(), "batch submitted");
        Ok(DownloadReport {
            queued,
            failed_directories,
            notice: None,
        })
    }

    /// Breadth-first expansion: each frontier level is fetched concurrently
    /// under the global semaphore, and subdirectories reported by the peer
    /// form the next level.
    async fn resolve_directories(
        &self,
        peer: &PeerName,
        roots: Vec<String>,
        separator: PathSeparator,
        files: &mut Vec<DownloadRequest>,
        failed: &mut Vec<FailedDirectory>,
    ) -> anyhow::Result<()> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: Vec<String> = roots
            .into_iter()
            .filter(|path| visited.insert(path.clone()))
            .collect();

        while !frontier.is_empty() {
            let mut join_set = JoinSet::new();
            for path in frontier.drain(..) {
                let client = self.client.clone();
                let peer = peer.clone();
                let retry = self.retry;
                let budget = self.directory_timeout;
                let semaphore = Arc::clone(&DIRECTORY_FETCH_SEMAPHORE);
                join_set.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return (path, Err("fetch pool closed".to_string())),
                    };
                    let result = with_retry(retry, "directory fetch", || {
                        fetch_directory(&client, &peer, &path, budget)
                    })
                    .await;
                    (path, result)
                });
            }

            let mut next = Vec::new();
            while let Some(joined) = join_set.join_next().await {
                let (path, result) = joined?;
                match result {
                    Ok(records) => {
                        collect_level(path, records, separator, files, &mut visited, &mut next);
                    }
                    Err(error) => failed.push(FailedDirectory { path, error }),
                }
            }
            frontier = next;
        }
        Ok(())
    }
}

async fn fetch_directory<C: RemoteListingClient>(
    client: &C,
    peer: &PeerName,
    path: &str,
    budget: Duration,
) -> Result<Vec<RemoteDirectory>, String> {
    match timeout(budget, client.list_directory(peer.clone(), path.to_string())).await {
        Ok(Ok(records)) => Ok(records),
        Ok(Err(error)) => Err(error.to_string()),
        Err(_) => Err(format!("no response within {budget:?}")),
    }
}

/// Fold one fetched directory into the batch: the first record carries the
/// requested directory's files, any further records are subdirectories for
/// the next frontier.
fn collect_level(
    requested: String,
    mut records: Vec<RemoteDirectory>,
    separator: PathSeparator,
    files: &mut Vec<DownloadRequest>,
    visited: &mut HashSet<String>,
    next: &mut Vec<String>,
) {
    if records.is_empty() {
        return;
    }
    let rest = records.split_off(1);
    let (requested_records, _) = normalize_directories(records, false);
    if let Some(record) = requested_records.into_iter().next() {
        for file in record.files {
            files.push(DownloadRequest {
                filename: join_path(&record.full_path, &file.filename, separator),
                size: file.size,
            });
        }
    } else {
        // The peer answered but named nothing; qualify against the path we
        // asked for so nothing is silently lost.
        tracing::debug!(path = %requested, "directory response without a usable name");
    }
    let (subdirectories, _) = normalize_directories(rest, false);
    for subdirectory in subdirectories {
        if visited.insert(subdirectory.full_path.clone()) {
            next.push(subdirectory.full_path);
        }
    }
}
