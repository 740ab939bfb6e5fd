use crate::cache::{BrowseCache, EvictionPolicy};
use crate::client::{BrowseProgress, RemoteError, RemoteListingClient};
use crate::model::{
    normalize_directories, normalize_parent, paginate, DirectoryRecord, FileRecord,
    ListingSnapshot, PaginatedView, PathSeparator, PeerName, RemoteListing,
};
use futures::channel::{mpsc, oneshot};
use futures::{SinkExt, Stream, StreamExt};
use itertools::Itertools;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 1_000;

/// Conventional cadence for sampling [`ListingService::progress_stream`].
pub const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Remote call budgets and cache policy. Defaults follow the sampled
/// system: 60s for a full browse, 120s for an oversized limited browse,
/// 15s for a single-directory fetch.
#[derive(Clone, Copy, Debug)]
pub struct ServiceConfig {
    pub full_browse_timeout: Duration,
    pub limited_browse_timeout: Duration,
    pub directory_timeout: Duration,
    pub eviction: EvictionPolicy,
    pub default_page_size: usize,
    pub default_browse_limit: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            full_browse_timeout: Duration::from_secs(60),
            limited_browse_timeout: Duration::from_secs(120),
            directory_timeout: Duration::from_secs(15),
            eviction: EvictionPolicy::SingleSlot,
            default_page_size: 100,
            default_browse_limit: 1_000,
        }
    }
}

/// Result of any listing operation. `Building` means the snapshot is being
/// fetched; callers poll or retry rather than block. `Failed` is the
/// generic surface for internal faults, logged with full context but never
/// leaking it.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Ready(T),
    Building,
    Offline,
    TimedOut,
    Failed,
}

impl<T> Outcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub const fn is_building(&self) -> bool {
        matches!(self, Self::Building)
    }
}

/// Immediate children of one directory, served from the warm snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectoryChildren {
    pub subdirectories: Vec<DirectoryRecord>,
    pub files: Vec<FileRecord>,
    pub separator: PathSeparator,
}

/// Live contents of a single directory, fetched from the peer.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectoryContents {
    pub files: Vec<FileRecord>,
    pub subdirectories: Vec<DirectoryRecord>,
}

/// Truncated listing for peers whose share exceeds the safety threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct LimitedBrowse {
    pub directories: Vec<DirectoryRecord>,
    pub total_count: usize,
    pub limited_count: usize,
    pub is_limited: bool,
    pub limit: usize,
}

/// Per-peer percent-complete registry for in-flight browses. The one piece
/// of service state read outside the event loop, so status polling never
/// waits on a fetch.
#[derive(Clone, Default)]
pub struct BrowseTracker {
    inner: Arc<RwLock<HashMap<PeerName, BrowseProgress>>>,
}

impl BrowseTracker {
    fn start(&self, peer: &PeerName) -> BrowseProgress {
        let progress = BrowseProgress::default();
        self.inner.write().insert(peer.clone(), progress.clone());
        progress
    }

    fn finish(&self, peer: &PeerName) {
        self.inner.write().remove(peer);
    }

    /// Percent complete, or `None` once the browse reaches a terminal
    /// state. Pollers stop on `None`.
    pub fn try_get(&self, peer: &PeerName) -> Option<f32> {
        self.inner.read().get(peer).map(BrowseProgress::percent)
    }
}

enum Command {
    Browse {
        peer: PeerName,
        force_refresh: bool,
        budget: Duration,
        sender: oneshot::Sender<Outcome<Arc<ListingSnapshot>>>,
    },
    Children {
        peer: PeerName,
        parent: String,
        sender: oneshot::Sender<Outcome<DirectoryChildren>>,
    },
}

enum FetchOutcome {
    Listing(Box<RemoteListing>),
    Offline,
    TimedOut,
    Failed(String),
}

struct FetchComplete {
    peer: PeerName,
    outcome: FetchOutcome,
}

/// Creates the listing service components: the cloneable handle used from
/// anywhere in the application, and the event loop driving the cache.
/// The loop owns the cache outright; callers reach it only through
/// commands, so snapshot replacement is single-writer by construction.
pub fn new<C: RemoteListingClient>(
    client: C,
    config: ServiceConfig,
) -> (ListingService<C>, EventLoop<C>) {
    let (command_sender, command_receiver) = mpsc::channel(0);
    let (fetch_sender, fetch_receiver) = mpsc::channel(0);
    let tracker = BrowseTracker::default();
    let service = ListingService {
        sender: command_sender,
        client: client.clone(),
        tracker: tracker.clone(),
        config,
    };
    let event_loop = EventLoop {
        client,
        config,
        cache: BrowseCache::new(config.eviction),
        tracker,
        command_receiver,
        fetch_sender,
        fetch_receiver,
        pending_browse: HashMap::new(),
    };
    (service, event_loop)
}

#[derive(Clone)]
pub struct ListingService<C> {
    sender: mpsc::Sender<Command>,
    client: C,
    tracker: BrowseTracker,
    config: ServiceConfig,
}

impl<C: RemoteListingClient> ListingService<C> {
    /// Fetch-or-serve-from-cache. Cache hits return immediately; misses
    /// issue one bounded remote fetch, with concurrent callers for the
    /// same peer coalesced onto it.
    pub async fn browse(&self, peer: PeerName) -> Outcome<Arc<ListingSnapshot>> {
        self.browse_inner(peer, false, self.config.full_browse_timeout)
            .await
    }

    /// Drop the cached snapshot and browse again.
    pub async fn refresh(&self, peer: PeerName) -> Outcome<Arc<ListingSnapshot>> {
        self.browse_inner(peer, true, self.config.full_browse_timeout)
            .await
    }

    async fn browse_inner(
        &self,
        peer: PeerName,
        force_refresh: bool,
        budget: Duration,
    ) -> Outcome<Arc<ListingSnapshot>> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .clone()
            .send(Command::Browse {
                peer,
                force_refresh,
                budget,
                sender,
            })
            .await
            .expect("Command receiver not to be dropped.");
        receiver.await.expect("Sender not to be dropped.")
    }

    /// Percent complete for a pending browse; `None` once terminal.
    pub fn browse_status(&self, peer: &PeerName) -> Option<f32> {
        self.tracker.try_get(peer)
    }

    /// Progress samples every `every` until the browse reaches a terminal
    /// state, at which point the stream ends and the poll timer with it.
    pub fn progress_stream(
        &self,
        peer: PeerName,
        every: Duration,
    ) -> impl Stream<Item = f32> + Send {
        let tracker = self.tracker.clone();
        async_stream::stream! {
            while let Some(percent) = tracker.try_get(&peer) {
                yield percent;
                tokio::time::sleep(every).await;
            }
        }
    }

    /// Paged directory list with an optional case-insensitive substring
    /// filter on display names. Counts reflect the filtered set.
    pub async fn list_directories(
        &self,
        peer: PeerName,
        page: usize,
        page_size: Option<usize>,
        search: Option<&str>,
    ) -> Outcome<PaginatedView<DirectoryRecord>> {
        let snapshot = match self.browse(peer).await {
            Outcome::Ready(snapshot) => snapshot,
            Outcome::Building => return Outcome::Building,
            Outcome::Offline => return Outcome::Offline,
            Outcome::TimedOut => return Outcome::TimedOut,
            Outcome::Failed => return Outcome::Failed,
        };
        let page_size = page_size
            .unwrap_or(self.config.default_page_size)
            .clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
        let needle = search.map(str::to_lowercase).filter(|s| !s.is_empty());
        let matches: Vec<DirectoryRecord> = snapshot
            .all_directories()
            .filter(|record| match &needle {
                Some(needle) => record
                    .display_name(snapshot.separator)
                    .to_lowercase()
                    .contains(needle),
                None => true,
            })
            .cloned()
            .collect();
        Outcome::Ready(paginate(matches, page, page_size))
    }

    /// Browse capped at `limit` directories, protecting the caller from
    /// unbounded memory use against massive shares.
    pub async fn browse_limited(
        &self,
        peer: PeerName,
        limit: Option<usize>,
    ) -> Outcome<LimitedBrowse> {
        let limit = limit.unwrap_or(self.config.default_browse_limit).max(1);
        let snapshot = match self
            .browse_inner(peer, false, self.config.limited_browse_timeout)
            .await
        {
            Outcome::Ready(snapshot) => snapshot,
            Outcome::Building => return Outcome::Building,
            Outcome::Offline => return Outcome::Offline,
            Outcome::TimedOut => return Outcome::TimedOut,
            Outcome::Failed => return Outcome::Failed,
        };
        let total_count = snapshot.all_directories().count();
        let directories: Vec<DirectoryRecord> = snapshot
            .all_directories()
            .sorted_by_cached_key(|record| record.full_path.to_lowercase())
            .take(limit)
            .cloned()
            .collect();
        let limited_count = directories.len();
        Outcome::Ready(LimitedBrowse {
            directories,
            total_count,
            limited_count,
            is_limited: total_count > limit,
            limit,
        })
    }

    /// Immediate children of `parent` from the warm snapshot. A cold cache
    /// kicks off a background browse and returns `Building` rather than
    /// blocking; callers poll or retry.
    pub async fn directory_children(
        &self,
        peer: PeerName,
        parent: impl Into<String>,
    ) -> Outcome<DirectoryChildren> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .clone()
            .send(Command::Children {
                peer,
                parent: parent.into(),
                sender,
            })
            .await
            .expect("Command receiver not to be dropped.");
        receiver.await.expect("Sender not to be dropped.")
    }

    /// Live single-directory fetch straight from the peer. No automatic
    /// retry here; the download resolver layers retry on top.
    pub async fn directory_contents(
        &self,
        peer: PeerName,
        path: impl Into<String>,
    ) -> Outcome<DirectoryContents> {
        let path = path.into();
        let fetched = timeout(
            self.config.directory_timeout,
            self.client.list_directory(peer.clone(), path.clone()),
        )
        .await;
        match fetched {
            Ok(Ok(mut records)) => {
                if records.is_empty() {
                    return Outcome::Ready(DirectoryContents {
                        files: Vec::new(),
                        subdirectories: Vec::new(),
                    });
                }
                let rest = records.split_off(1);
                let (requested, dropped_first) = normalize_directories(records, false);
                let (subdirectories, dropped_rest) = normalize_directories(rest, false);
                let dropped = dropped_first + dropped_rest;
                if dropped > 0 {
                    tracing::debug!(peer = %peer, %path, dropped, "dropped malformed records");
                }
                let files = requested
                    .into_iter()
                    .next()
                    .map(|record| record.files)
                    .unwrap_or_default();
                Outcome::Ready(DirectoryContents {
                    files,
                    subdirectories,
                })
            }
            Ok(Err(RemoteError::Offline(_))) => Outcome::Offline,
            Ok(Err(error)) => {
                tracing::error!(peer = %peer, %path, %error, "directory fetch failed");
                Outcome::Failed
            }
            Err(_) => Outcome::TimedOut,
        }
    }
}

pub struct EventLoop<C: RemoteListingClient> {
    client: C,
    config: ServiceConfig,
    cache: BrowseCache,
    tracker: BrowseTracker,
    command_receiver: mpsc::Receiver<Command>,
    fetch_sender: mpsc::Sender<FetchComplete>,
    fetch_receiver: mpsc::Receiver<FetchComplete>,
    pending_browse: HashMap<PeerName, Vec<oneshot::Sender<Outcome<Arc<ListingSnapshot>>>>>,
}

impl<C: RemoteListingClient> EventLoop<C> {
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_receiver.next() => match command {
                    Some(command) => self.handle_command(command),
                    // Command channel closed, thus shutting down the service loop.
                    None => return,
                },
                fetch = self.fetch_receiver.next() => {
                    if let Some(fetch) = fetch {
                        self.handle_fetch_complete(fetch);
                    }
                },
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Browse {
                peer,
                force_refresh,
                budget,
                sender,
            } => {
                if force_refresh {
                    self.cache.remove(&peer);
                } else if let Some(snapshot) = self.cache.get(&peer) {
                    let _ = sender.send(Outcome::Ready(snapshot));
                    return;
                }
                if let Some(waiters) = self.pending_browse.get_mut(&peer) {
                    // Coalesce onto the in-flight fetch.
                    waiters.push(sender);
                    return;
                }
                self.pending_browse.insert(peer.clone(), vec![sender]);
                self.spawn_fetch(peer, budget);
            }
            Command::Children {
                peer,
                parent,
                sender,
            } => {
                let Some(snapshot) = self.cache.get(&peer) else {
                    let _ = sender.send(Outcome::Building);
                    if !self.pending_browse.contains_key(&peer) {
                        self.pending_browse.insert(peer.clone(), Vec::new());
                        self.spawn_fetch(peer, self.config.full_browse_timeout);
                    }
                    return;
                };
                let parent_key = normalize_parent(&parent, snapshot.separator);
                let subdirectories: Vec<DirectoryRecord> = snapshot
                    .immediate_children(&parent)
                    .into_iter()
                    .cloned()
                    .collect();
                let files = snapshot
                    .directory(parent_key)
                    .map(|record| record.files.clone())
                    .unwrap_or_default();
                let _ = sender.send(Outcome::Ready(DirectoryChildren {
                    subdirectories,
                    files,
                    separator: snapshot.separator,
                }));
            }
        }
    }

    fn spawn_fetch(&mut self, peer: PeerName, budget: Duration) {
        let client = self.client.clone();
        let progress = self.tracker.start(&peer);
        let mut fetch_sender = self.fetch_sender.clone();
        tracing::debug!(peer = %peer, ?budget, "starting remote browse");
        tokio::spawn(async move {
            let outcome = match timeout(budget, client.browse(peer.clone(), progress)).await {
                Ok(Ok(listing)) => FetchOutcome::Listing(Box::new(listing)),
                Ok(Err(RemoteError::Offline(_))) => FetchOutcome::Offline,
                Ok(Err(error)) => FetchOutcome::Failed(error.to_string()),
                Err(_) => FetchOutcome::TimedOut,
            };
            let _ = fetch_sender.send(FetchComplete { peer, outcome }).await;
        });
    }

    fn handle_fetch_complete(&mut self, fetch: FetchComplete) {
        let FetchComplete { peer, outcome } = fetch;
        self.tracker.finish(&peer);
        let waiters = self.pending_browse.remove(&peer).unwrap_or_default();
        match outcome {
            FetchOutcome::Listing(listing) => {
                let snapshot = ListingSnapshot::from_remote(peer.clone(), *listing);
                let stats = snapshot.stats();
                tracing::info!(
                    peer = %peer,
                    directories = stats.directories,
                    files = stats.files,
                    locked = stats.locked_directories,
                    "browse complete"
                );
                let snapshot = self.cache.insert(snapshot);
                for waiter in waiters {
                    let _ = waiter.send(Outcome::Ready(Arc::clone(&snapshot)));
                }
            }
            FetchOutcome::Offline => {
                tracing::warn!(peer = %peer, "peer offline");
                for waiter in waiters {
                    let _ = waiter.send(Outcome::Offline);
                }
            }
            FetchOutcome::TimedOut => {
                tracing::warn!(peer = %peer, "browse exceeded budget");
                for waiter in waiters {
                    let _ = waiter.send(Outcome::TimedOut);
                }
            }
            FetchOutcome::Failed(error) => {
                tracing::error!(peer = %peer, %error, "browse failed");
                for waiter in waiters {
                    let _ = waiter.send(Outcome::Failed);
                }
            }
        }
    }
}
