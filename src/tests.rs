#[cfg(test)]
#[allow(clippy::module_inception)]
mod tests {
    use crate::cache::EvictionPolicy;
    use crate::client::{
        BrowseProgress, RemoteError, RemoteListingClient, StaticListingClient,
    };
    use crate::model::{
        DirectoryRecord, PathSeparator, PeerName, RemoteDirectory, RemoteFile, RemoteListing,
    };
    use crate::service::listing::{self, ListingService, Outcome, ServiceConfig};
    use crate::view::TreeView;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    // Helper to build a remote listing the way a Windows-pathed peer
    // reports one.
    fn sample_listing() -> RemoteListing {
        let dir = |name: &str, files: &[&str]| RemoteDirectory {
            name: Some(name.to_string()),
            files: files
                .iter()
                .map(|f| RemoteFile {
                    filename: Some((*f).to_string()),
                    size: Some(1_024),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        RemoteListing {
            directories: vec![
                dir("Music", &["readme.txt"]),
                dir("Music\\Jazz", &["take5.flac", "blue.flac"]),
                dir("Music\\Rock", &[]),
                dir("Video", &["clip.mkv"]),
            ],
            locked_directories: vec![dir("Private", &["secret.txt"])],
        }
    }

    /// Wraps the fixture client with a browse delay, an offline switch and
    /// a call counter, so tests can observe exactly how often the remote
    /// peer was asked for a full listing.
    #[derive(Clone)]
    struct FakeClient {
        inner: StaticListingClient,
        browse_calls: Arc<AtomicU32>,
        browse_delay: Duration,
        offline: bool,
    }

    impl FakeClient {
        fn new(listing: RemoteListing) -> Self {
            Self {
                inner: StaticListingClient::new(listing),
                browse_calls: Arc::new(AtomicU32::new(0)),
                browse_delay: Duration::from_millis(100),
                offline: false,
            }
        }

        fn offline(mut self) -> Self {
            self.offline = true;
            self
        }

        fn with_browse_delay(mut self, delay: Duration) -> Self {
            self.browse_delay = delay;
            self
        }

        fn browse_count(&self) -> u32 {
            self.browse_calls.load(Ordering::SeqCst)
        }
    }

    impl RemoteListingClient for FakeClient {
        async fn browse(
            &self,
            peer: PeerName,
            progress: BrowseProgress,
        ) -> Result<RemoteListing, RemoteError> {
            self.browse_calls.fetch_add(1, Ordering::SeqCst);
            progress.set_percent(50);
            tokio::time::sleep(self.browse_delay).await;
            if self.offline {
                return Err(RemoteError::Offline(peer));
            }
            progress.set_percent(100);
            self.inner.browse(peer, progress).await
        }

        async fn list_directory(
            &self,
            peer: PeerName,
            path: String,
        ) -> Result<Vec<RemoteDirectory>, RemoteError> {
            if self.offline {
                return Err(RemoteError::Offline(peer));
            }
            self.inner.list_directory(peer, path).await
        }
    }

    fn start(client: FakeClient, config: ServiceConfig) -> ListingService<FakeClient> {
        let (service, event_loop) = listing::new(client, config);
        tokio::spawn(event_loop.run());
        service
    }

    fn peer() -> PeerName {
        PeerName::from("alice")
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_browses_share_one_fetch() {
        let client = FakeClient::new(sample_listing());
        let service = start(client.clone(), ServiceConfig::default());

        let (first, second) = tokio::join!(service.browse(peer()), service.browse(peer()));
        let first = first.ready().unwrap();
        let second = second.ready().unwrap();

        assert_eq!(client.browse_count(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_snapshot_is_served_without_refetch() {
        let client = FakeClient::new(sample_listing());
        let service = start(client.clone(), ServiceConfig::default());

        service.browse(peer()).await.ready().unwrap();
        let snapshot = service.browse(peer()).await.ready().unwrap();

        assert_eq!(client.browse_count(), 1);
        assert_eq!(snapshot.stats().directories, 4);
        assert_eq!(snapshot.stats().locked_directories, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_snapshot_wholesale() {
        let client = FakeClient::new(sample_listing());
        let service = start(client.clone(), ServiceConfig::default());

        let old = service.browse(peer()).await.ready().unwrap();
        let new = service.refresh(peer()).await.ready().unwrap();

        assert_eq!(client.browse_count(), 2);
        assert!(!Arc::ptr_eq(&old, &new));
        // A reader holding the old snapshot still sees the same complete
        // listing, record for record.
        assert_eq!(old.directories, new.directories);
        assert_eq!(old.locked_directories, new.locked_directories);
        assert_eq!(old.separator, new.separator);
    }

    #[tokio::test(start_paused = true)]
    async fn test_browsing_new_peer_evicts_previous_snapshot() {
        let client = FakeClient::new(sample_listing());
        let service = start(client.clone(), ServiceConfig::default());

        service.browse(peer()).await.ready().unwrap();
        service.browse(PeerName::from("bob")).await.ready().unwrap();

        // Alice's snapshot is gone; asking for her children starts a
        // rebuild instead of answering stale.
        let children = service.directory_children(peer(), "Music").await;
        assert!(children.is_building());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let children = service.directory_children(peer(), "Music").await.ready().unwrap();
        assert_eq!(children.subdirectories.len(), 2);
        assert_eq!(client.browse_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_policy_keeps_both_peers_warm() {
        let client = FakeClient::new(sample_listing());
        let config = ServiceConfig {
            eviction: EvictionPolicy::LruBounded(2),
            ..Default::default()
        };
        let service = start(client.clone(), config);

        service.browse(peer()).await.ready().unwrap();
        service.browse(PeerName::from("bob")).await.ready().unwrap();

        let children = service.directory_children(peer(), "Music").await;
        assert!(children.ready().is_some());
        assert_eq!(client.browse_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_children_come_from_the_warm_snapshot() {
        let client = FakeClient::new(sample_listing());
        let service = start(client, ServiceConfig::default());

        service.browse(peer()).await.ready().unwrap();
        let children = service
            .directory_children(peer(), "Music")
            .await
            .ready()
            .unwrap();

        let names: Vec<&str> = children
            .subdirectories
            .iter()
            .map(|d| d.full_path.as_str())
            .collect();
        assert_eq!(names, ["Music\\Jazz", "Music\\Rock"]);
        assert_eq!(children.files.len(), 1);
        assert_eq!(children.files[0].filename, "readme.txt");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_expansion_merges_children_into_the_view() {
        let client = FakeClient::new(sample_listing());
        let service = start(client, ServiceConfig::default());

        let mut view = TreeView::lazy_roots(
            [DirectoryRecord::new("Music"), DirectoryRecord::new("Video")],
            PathSeparator::Backslash,
        );

        // Cold cache: the expand kicks off a rebuild in the background and
        // the node drops back to expandable so the user can retry.
        assert!(view.begin_lazy_load("Music"));
        assert!(service.directory_children(peer(), "Music").await.is_building());
        view.fail_lazy_load("Music");
        assert!(!view.flatten()[0].loading);

        // Retry once the snapshot has landed; the fetched children merge
        // into the working copy.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(view.begin_lazy_load("Music"));
        let children = service
            .directory_children(peer(), "Music")
            .await
            .ready()
            .unwrap();
        view.complete_lazy_load("Music", children.subdirectories);

        let rows = view.flatten();
        let names: Vec<&str> = rows.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, ["Music", "Jazz", "Rock", "Video"]);
        assert!(rows[0].children_loaded && !rows[0].loading);
        assert_eq!(rows[1].level, 1);
        // Loaded nodes never refetch.
        assert!(!view.begin_lazy_load("Music"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pagination_and_filter_reflect_each_other() {
        let client = FakeClient::new(sample_listing());
        let service = start(client, ServiceConfig::default());

        let page = service
            .list_directories(peer(), 1, Some(2), None)
            .await
            .ready()
            .unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_next);

        let filtered = service
            .list_directories(peer(), 1, Some(2), Some("jazz"))
            .await
            .ready()
            .unwrap();
        assert_eq!(filtered.total_count, 1);
        assert_eq!(filtered.items[0].full_path, "Music\\Jazz");
        assert!(!filtered.has_next);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limited_browse_caps_directory_count() {
        let client = FakeClient::new(sample_listing());
        let service = start(client, ServiceConfig::default());

        let limited = service
            .browse_limited(peer(), Some(2))
            .await
            .ready()
            .unwrap();
        assert!(limited.is_limited);
        assert_eq!(limited.limited_count, 2);
        assert_eq!(limited.total_count, 5);

        let unlimited = service.browse_limited(peer(), None).await.ready().unwrap();
        assert!(!unlimited.is_limited);
        assert_eq!(unlimited.limited_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_peer_is_surfaced_not_retried() {
        let client = FakeClient::new(sample_listing()).offline();
        let service = start(client.clone(), ServiceConfig::default());

        assert!(matches!(service.browse(peer()).await, Outcome::Offline));
        assert_eq!(client.browse_count(), 1);

        // Derived operations surface the same outcome.
        let page = service.list_directories(peer(), 1, None, None).await;
        assert_eq!(page, Outcome::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_browse_times_out_within_budget() {
        let client = FakeClient::new(sample_listing()).with_browse_delay(Duration::from_secs(600));
        let config = ServiceConfig {
            full_browse_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let service = start(client, config);

        let started = tokio::time::Instant::now();
        assert!(matches!(service.browse(peer()).await, Outcome::TimedOut));
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        // The failed fetch left no progress entry behind.
        assert_eq!(service.browse_status(&peer()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_observable_while_fetching() {
        let client = FakeClient::new(sample_listing());
        let service = start(client, ServiceConfig::default());

        assert_eq!(service.browse_status(&peer()), None);

        let pending = tokio::spawn({
            let service = service.clone();
            async move { service.browse(peer()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(service.browse_status(&peer()), Some(50.0));

        pending.await.unwrap().ready().unwrap();
        assert_eq!(service.browse_status(&peer()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_stream_ends_at_terminal_state() {
        let client = FakeClient::new(sample_listing());
        let service = start(client, ServiceConfig::default());

        let pending = tokio::spawn({
            let service = service.clone();
            async move { service.browse(peer()).await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let samples: Vec<f32> = service
            .progress_stream(peer(), listing::PROGRESS_POLL_INTERVAL)
            .collect()
            .await;
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|p| (0.0..=100.0).contains(p)));

        pending.await.unwrap().ready().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_directory_contents_fetch_live() {
        let client = FakeClient::new(sample_listing());
        let service = start(client.clone(), ServiceConfig::default());

        let contents = service
            .directory_contents(peer(), "Music")
            .await
            .ready()
            .unwrap();
        assert_eq!(contents.files.len(), 1);
        assert_eq!(contents.subdirectories.len(), 2);
        // Live fetch, no full browse involved.
        assert_eq!(client.browse_count(), 0);
    }
}
