//! End-to-end refresh cycles against fake remote services and an in-memory
//! store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::Notify;
use url::Url;

use common::{CatalogFile, CatalogItem, Category, IndexHandle, IndexLayout, MediaType};
use tmc_daemon::catalog::{
    CatalogClient, CatalogError, FetchError, MatchCandidate, MatchError, MetadataMatcher,
    RangeFetcher,
};
use tmc_daemon::fuse::{BlockCache, BlockCacheConfig, ReadError};
use tmc_daemon::links::{LinkPolicy, LinkReconciler};
use tmc_daemon::sync::{
    spawn_scheduler, CycleOutcome, CycleReport, CycleRequest, Enricher, SchedulerConfig,
    SyncDispatcher, SyncEvent, SyncSettings, Synchronizer,
};
use tmc_daemon::{Database, MetadataStore};

const MKV: &str = "video/x-matroska";

fn item(id: u64, name: &str, cached: bool, files: Vec<CatalogFile>) -> CatalogItem {
    CatalogItem {
        id,
        hash: format!("hash{}", id),
        name: Some(name.to_string()),
        cached,
        files,
    }
}

fn file(id: u64, short_name: &str, mime_type: &str) -> CatalogFile {
    CatalogFile {
        id,
        short_name: short_name.to_string(),
        size: 1024 * id,
        mime_type: mime_type.to_string(),
        relative_path: short_name.to_string(),
    }
}

fn movie(id: u64, name: &str) -> CatalogItem {
    item(id, name, true, vec![file(1, &format!("{}.mkv", name.to_lowercase()), MKV)])
}

#[derive(Default)]
struct FakeCatalog {
    listings: Mutex<HashMap<Category, Option<Vec<CatalogItem>>>>,
    list_calls: AtomicUsize,
    entered: Notify,
    release: Mutex<Option<Arc<Notify>>>,
}

impl FakeCatalog {
    fn set(&self, category: Category, items: Vec<CatalogItem>) {
        self.listings.lock().insert(category, Some(items));
    }

    fn fail(&self, category: Category) {
        self.listings.lock().insert(category, None);
    }

    /// Block listings until the returned notify fires.
    fn hold(&self) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *self.release.lock() = Some(release.clone());
        release
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn list(
        &self,
        category: Category,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let release = self.release.lock().take();
        if let Some(release) = release {
            self.entered.notify_one();
            release.notified().await;
        }

        let listing = self.listings.lock().get(&category).cloned();
        match listing {
            Some(Some(items)) => Ok(items.into_iter().skip(offset).take(limit).collect()),
            Some(None) => Err(CatalogError::HttpStatus(
                StatusCode::INTERNAL_SERVER_ERROR,
                "unavailable".to_string(),
            )),
            None => Ok(Vec::new()),
        }
    }

    async fn resolve_download_url(
        &self,
        category: Category,
        item_id: u64,
        file_id: u64,
    ) -> Result<Url, CatalogError> {
        Ok(Url::parse(&format!(
            "https://cdn.test/{}/{}/{}",
            category, item_id, file_id
        ))?)
    }
}

/// Names the match after the first word of the query. Queries mentioning
/// `nomatch` find nothing and `broken` ones fail.
struct FakeMatcher;

#[async_trait]
impl MetadataMatcher for FakeMatcher {
    async fn search(&self, query: &str) -> Result<Option<MatchCandidate>, MatchError> {
        if query.contains("broken") {
            return Err(MatchError::Url);
        }
        if query.contains("nomatch") {
            return Ok(None);
        }
        let title = query.split_whitespace().next().unwrap_or_default().to_string();
        let media_type = if title.starts_with("Show") {
            MediaType::Series
        } else {
            MediaType::Movie
        };
        Ok(Some(MatchCandidate {
            title,
            media_type,
            year: Some(2024),
            link: None,
            image: None,
            backdrop: None,
        }))
    }
}

struct Harness {
    catalog: Arc<FakeCatalog>,
    db: Database,
    sync: Synchronizer,
}

async fn harness() -> Harness {
    let db = Database::in_memory().await.unwrap();
    harness_with(Arc::new(FakeCatalog::default()), db, None)
}

fn harness_with(catalog: Arc<FakeCatalog>, db: Database, mirror: Option<(String, String)>) -> Harness {
    let layout = IndexLayout::default();
    let store = Arc::new(db.clone());
    let (mirror_root, reconciler) = match mirror {
        Some((mount, root)) => (
            Some(root),
            Some(LinkReconciler::new(LinkPolicy::Once, mount, store.clone())),
        ),
        None => (None, None),
    };
    let sync = Synchronizer::new(
        catalog.clone(),
        store,
        Enricher::new(Arc::new(FakeMatcher), layout.clone(), mirror_root),
        reconciler,
        IndexHandle::empty(&layout),
        SyncSettings {
            page_size: 2,
            ..Default::default()
        },
    );
    Harness { catalog, db, sync }
}

async fn cycle(sync: &Synchronizer, fresh: bool) -> CycleReport {
    match sync.run_cycle(CycleRequest { fresh }).await {
        CycleOutcome::Completed(report) => report,
        CycleOutcome::Skipped => panic!("cycle unexpectedly skipped"),
    }
}

#[tokio::test]
async fn test_cycle_publishes_ready_allowed_files() {
    let h = harness().await;
    h.catalog.set(
        Category::Torrents,
        vec![
            item(
                1,
                "Alpha",
                true,
                vec![file(1, "alpha.mkv", MKV), file(2, "notes.txt", "text/plain")],
            ),
            movie(2, "Beta"),
            item(3, "Pending", false, vec![file(1, "pending.mkv", MKV)]),
        ],
    );

    let report = cycle(&h.sync, false).await;
    assert!(report.is_success());
    assert_eq!(report.categories.len(), 3);
    let torrents = &report.categories[0];
    assert_eq!(torrents.items, 3);
    assert_eq!(torrents.ready_items, 2);
    assert_eq!(torrents.records, 2);

    let index = h.sync.index().load();
    assert!(index.is_file("/movies/Alpha (2024)/Alpha (2024).mkv"));
    assert!(index.is_file("/movies/Beta (2024)/Beta (2024).mkv"));
    assert_eq!(index.file_count(), 2);
    assert_eq!(report.files, 2);

    let stored = h.db.list_by_type(Category::Torrents).await.unwrap();
    assert_eq!(stored.len(), 2);
    // Pages of two: torrents takes two requests, the empty categories one each.
    assert_eq!(h.catalog.list_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_series_land_under_season_folders() {
    let h = harness().await;
    h.catalog.set(
        Category::Webdl,
        vec![item(5, "Show", true, vec![file(9, "Show.S02E03.1080p.mkv", MKV)])],
    );

    cycle(&h.sync, false).await;
    let index = h.sync.index().load();
    assert!(index.is_file("/series/Show (2024)/Season 02/Show S02E03.mkv"));
}

#[tokio::test]
async fn test_failed_category_keeps_previous_snapshot() {
    let h = harness().await;
    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha")]);
    h.catalog.set(Category::Usenet, vec![movie(7, "Gamma")]);
    cycle(&h.sync, false).await;

    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha"), movie(2, "Delta")]);
    h.catalog.fail(Category::Usenet);
    let report = cycle(&h.sync, false).await;

    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].category, Category::Usenet);

    let index = h.sync.index().load();
    assert!(index.is_file("/movies/Alpha (2024)/Alpha (2024).mkv"));
    assert!(index.is_file("/movies/Delta (2024)/Delta (2024).mkv"));
    assert!(index.is_file("/movies/Gamma (2024)/Gamma (2024).mkv"));
    assert_eq!(h.db.list_by_type(Category::Usenet).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_fresh_cycle_clears_listed_categories_only() {
    let h = harness().await;
    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha"), movie(2, "Beta")]);
    h.catalog.set(Category::Usenet, vec![movie(7, "Gamma")]);
    cycle(&h.sync, false).await;

    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha")]);
    h.catalog.fail(Category::Usenet);
    let report = cycle(&h.sync, true).await;

    assert_eq!(report.categories[0].category, Category::Torrents);
    assert_eq!(report.categories[0].cleared, 2);
    let torrents = h.db.list_by_type(Category::Torrents).await.unwrap();
    assert_eq!(torrents.len(), 1);
    assert_eq!(torrents[0].item_id, 1);
    // The failed listing happens before any clearing.
    assert_eq!(h.db.list_by_type(Category::Usenet).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_incremental_cycle_drops_vanished_items() {
    let h = harness().await;
    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha"), movie(2, "Beta")]);
    cycle(&h.sync, false).await;

    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha")]);
    let report = cycle(&h.sync, false).await;

    assert_eq!(report.categories[0].removed_items, 1);
    let index = h.sync.index().load();
    assert!(!index.is_directory("/movies/Beta (2024)"));
    let stored = h.db.list_by_type(Category::Torrents).await.unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_items_no_longer_ready_leave_the_store() {
    let h = harness().await;
    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha"), movie(2, "Beta")]);
    cycle(&h.sync, false).await;

    h.catalog.set(
        Category::Torrents,
        vec![
            movie(1, "Alpha"),
            item(2, "Beta", false, vec![file(1, "beta.mkv", MKV)]),
        ],
    );
    let report = cycle(&h.sync, false).await;
    assert_eq!(report.categories[0].removed_items, 1);

    let stored = h.db.list_by_type(Category::Torrents).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].item_id, 1);

    // A restart must not bring the unready item back.
    let restarted = harness_with(Arc::new(FakeCatalog::default()), h.db.clone(), None);
    restarted.sync.warm_start().await.unwrap();
    let index = restarted.sync.index().load();
    assert!(!index.is_directory("/movies/Beta (2024)"));
    assert!(index.is_directory("/movies/Alpha (2024)"));
}

#[tokio::test]
async fn test_enrichment_falls_back_to_raw_names() {
    let h = harness().await;
    h.catalog.set(
        Category::Torrents,
        vec![
            item(1, "nomatch pack", true, vec![file(1, "nomatch.file.mkv", MKV)]),
            item(2, "broken pack", true, vec![file(1, "broken: cut.mkv", MKV)]),
        ],
    );

    let report = cycle(&h.sync, false).await;
    assert!(report.is_success());

    let index = h.sync.index().load();
    assert!(index.is_file("/movies/nomatch pack/nomatch.file.mkv"));
    assert!(index.is_file("/movies/broken pack/broken cut.mkv"));
}

#[tokio::test]
async fn test_overlapping_cycle_is_skipped() {
    let h = harness().await;
    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha")]);
    let release = h.catalog.hold();

    let sync = Arc::new(h.sync);
    let first = tokio::spawn({
        let sync = sync.clone();
        async move { sync.run_cycle(CycleRequest::default()).await }
    });

    h.catalog.entered.notified().await;
    assert!(matches!(
        sync.run_cycle(CycleRequest { fresh: true }).await,
        CycleOutcome::Skipped
    ));

    release.notify_one();
    assert!(matches!(first.await.unwrap(), CycleOutcome::Completed(_)));
}

#[tokio::test]
async fn test_warm_start_serves_stored_records() {
    let h = harness().await;
    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha")]);
    cycle(&h.sync, false).await;

    let restarted = harness_with(Arc::new(FakeCatalog::default()), h.db.clone(), None);
    let generation = restarted.sync.warm_start().await.unwrap();

    assert_eq!(generation, 1);
    let index = restarted.sync.index().load();
    assert!(index.is_file("/movies/Alpha (2024)/Alpha (2024).mkv"));
    assert_eq!(restarted.catalog.list_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cycle_emits_events() {
    let h = harness().await;
    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha")]);
    h.catalog.fail(Category::Webdl);
    let events = h.sync.subscribe();

    cycle(&h.sync, false).await;
    let events: Vec<SyncEvent> = events.try_iter().collect();

    let published = events
        .iter()
        .filter(|e| matches!(e, SyncEvent::IndexPublished { .. }))
        .count();
    assert_eq!(published, 2);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::CategoryFailed {
            category: Category::Webdl,
            ..
        }
    )));
    assert!(matches!(events.last(), Some(SyncEvent::CycleFinished { .. })));
}

#[cfg(unix)]
#[tokio::test]
async fn test_mirror_links_follow_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let mount = dir.path().join("mnt").to_string_lossy().into_owned();
    let mirror = dir.path().join("mirror").to_string_lossy().into_owned();

    let db = Database::in_memory().await.unwrap();
    let catalog = Arc::new(FakeCatalog::default());
    let h = harness_with(catalog, db, Some((mount.clone(), mirror.clone())));

    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha"), movie(2, "Beta")]);
    let report = cycle(&h.sync, false).await;
    let links = report.links.unwrap();
    assert_eq!(links.created, 2);

    let alpha = format!("{}/movies/Alpha (2024)/Alpha (2024).mkv", mirror);
    let beta = format!("{}/movies/Beta (2024)/Beta (2024).mkv", mirror);
    assert_eq!(
        std::fs::read_link(&alpha).unwrap(),
        std::path::PathBuf::from(format!("{}/movies/Alpha (2024)/Alpha (2024).mkv", mount))
    );
    assert!(std::fs::symlink_metadata(&beta).is_ok());

    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha")]);
    let report = cycle(&h.sync, false).await;
    let links = report.links.unwrap();
    assert_eq!(links.removed, 1);
    assert_eq!(links.kept, 1);
    assert!(std::fs::symlink_metadata(&alpha).is_ok());
    assert!(std::fs::symlink_metadata(&beta).is_err());
}

/// Serves the byte at each position as `position % 256`.
struct PatternFetcher;

#[async_trait]
impl RangeFetcher for PatternFetcher {
    async fn fetch_range(&self, _url: &Url, offset: u64, length: u64) -> Result<Bytes, FetchError> {
        Ok((offset..offset + length).map(|pos| pos as u8).collect())
    }
}

#[tokio::test]
async fn test_synced_files_read_through_block_cache() {
    let h = harness().await;
    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha"), movie(2, "Beta")]);
    cycle(&h.sync, false).await;

    let cache = BlockCache::new(
        h.sync.index().clone(),
        h.catalog.clone(),
        Arc::new(PatternFetcher),
        BlockCacheConfig {
            block_size: 256,
            ..Default::default()
        },
    );

    // File id 1 is 1024 bytes long.
    let path = "/movies/Beta (2024)/Beta (2024).mkv";
    let bytes = cache.read(path, 1000, 100).await.unwrap();
    assert_eq!(bytes.len(), 24);
    assert_eq!(bytes[0], (1000 % 256) as u8);

    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha")]);
    cycle(&h.sync, false).await;
    assert!(matches!(
        cache.read(path, 0, 10).await,
        Err(ReadError::NotFound(_))
    ));
}

async fn next_cycle(events: &flume::Receiver<SyncEvent>) -> CycleReport {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv_async())
            .await
            .expect("no cycle finished in time")
            .unwrap();
        if let SyncEvent::CycleFinished { report } = event {
            return report;
        }
    }
}

#[tokio::test]
async fn test_scheduler_runs_startup_timer_and_requested_cycles() {
    let h = harness().await;
    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha")]);
    let sync = Arc::new(h.sync);
    let events = sync.subscribe();

    let (dispatcher, receiver) = SyncDispatcher::new();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let config = SchedulerConfig {
        interval: Duration::from_millis(100),
        jitter: Duration::ZERO,
        fresh_start: true,
    };
    let task = spawn_scheduler(sync.clone(), receiver, config, shutdown_rx);

    let startup = next_cycle(&events).await;
    assert!(startup.fresh);
    assert!(sync.index().load().is_directory("/movies/Alpha (2024)"));

    h.catalog.set(Category::Torrents, vec![movie(1, "Alpha"), movie(2, "Beta")]);
    // Timer-driven cycles are incremental and pick up catalog changes.
    let mut timed = 0;
    while !sync.index().load().is_directory("/movies/Beta (2024)") {
        assert!(!next_cycle(&events).await.fresh);
        timed += 1;
        assert!(timed < 10, "timer cycles never saw the new item");
    }

    dispatcher.request(true).unwrap();
    let mut requested = false;
    for _ in 0..10 {
        if next_cycle(&events).await.fresh {
            requested = true;
            break;
        }
    }
    assert!(requested);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    let calls = h.catalog.list_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(h.catalog.list_calls.load(Ordering::SeqCst), calls);
}
