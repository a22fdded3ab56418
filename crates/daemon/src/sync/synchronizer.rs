//! Refresh cycles: list the catalog, persist records, publish the index and
//! reconcile mirror links.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::{stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use common::{CatalogFile, CatalogItem, Category, FilesystemIndex, IndexHandle, IndexLayout, MetaRecord};

use crate::catalog::{CatalogClient, CatalogError};
use crate::database::{MetadataStore, StoreError};
use crate::links::{LinkReconciler, ReconcileReport};

use super::enrich::Enricher;
use super::events::SyncEvent;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Where the synchronizer is within a cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Listing,
    Upserting,
    IndexSwap,
    Reconciling,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleRequest {
    /// Clear stored records of each category before repopulating it
    pub fresh: bool,
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already running
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryReport {
    pub category: Category,
    /// Items listed by the catalog
    pub items: usize,
    /// Items ready to stream
    pub ready_items: usize,
    /// Records stored and published
    pub records: usize,
    /// Records that failed to persist
    pub skipped: usize,
    /// Items that stopped producing records since the last refresh
    pub removed_items: usize,
    /// Rows removed by a fresh refresh
    pub cleared: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryFailure {
    pub category: Category,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub fresh: bool,
    pub categories: Vec<CategoryReport>,
    pub failures: Vec<CategoryFailure>,
    pub links: Option<ReconcileReport>,
    /// Generation of the index published last
    pub generation: u64,
    pub files: usize,
    pub duration_ms: u64,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Settings for refresh cycles
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub categories: Vec<Category>,
    pub allowed_mime_types: Vec<String>,
    /// Files enriched concurrently
    pub concurrency: usize,
    pub page_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            categories: Category::ALL.to_vec(),
            allowed_mime_types: vec!["video/x-matroska".into(), "video/mp4".into()],
            concurrency: 8,
            page_size: 1000,
        }
    }
}

/// Owns the authoritative record set and publishes indexes built from it.
pub struct Synchronizer {
    catalog: Arc<dyn CatalogClient>,
    store: Arc<dyn MetadataStore>,
    enricher: Enricher,
    reconciler: Option<LinkReconciler>,
    index: IndexHandle,
    settings: SyncSettings,
    /// Last successfully refreshed records, per category
    snapshots: Mutex<BTreeMap<Category, Vec<MetaRecord>>>,
    phase: Mutex<SyncPhase>,
    running: tokio::sync::Mutex<()>,
    subscribers: Mutex<Vec<flume::Sender<SyncEvent>>>,
}

impl Synchronizer {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        store: Arc<dyn MetadataStore>,
        enricher: Enricher,
        reconciler: Option<LinkReconciler>,
        index: IndexHandle,
        settings: SyncSettings,
    ) -> Self {
        Self {
            catalog,
            store,
            enricher,
            reconciler,
            index,
            settings,
            snapshots: Mutex::new(BTreeMap::new()),
            phase: Mutex::new(SyncPhase::Idle),
            running: tokio::sync::Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock() = phase;
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> flume::Receiver<SyncEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: SyncEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn layout(&self) -> &IndexLayout {
        self.enricher.layout()
    }

    /// All records currently published, in category order.
    pub fn records(&self) -> Vec<MetaRecord> {
        self.snapshots.lock().values().flatten().cloned().collect()
    }

    fn publish(&self) -> (u64, usize) {
        let index = {
            let snapshots = self.snapshots.lock();
            FilesystemIndex::build(snapshots.values().flatten(), self.layout())
        };
        let files = index.file_count();
        let generation = self.index.publish(index);
        tracing::info!(generation, files, "published filesystem index");
        self.emit(SyncEvent::IndexPublished { generation, files });
        (generation, files)
    }

    /// Load the stored records and publish them, so the filesystem is
    /// browsable before the first refresh completes.
    pub async fn warm_start(&self) -> Result<u64, StoreError> {
        let mut loaded = BTreeMap::new();
        for &category in &self.settings.categories {
            let mut records = self.store.list_by_type(category).await?;
            // Paths follow the configured layout, not the stored one.
            for record in &mut records {
                record.assign_paths(self.layout(), self.enricher.mirror_root());
            }
            tracing::debug!(%category, count = records.len(), "loaded stored records");
            loaded.insert(category, records);
        }
        *self.snapshots.lock() = loaded;

        let (generation, _) = self.publish();
        Ok(generation)
    }

    /// Run one refresh cycle unless one is already running.
    pub async fn run_cycle(&self, request: CycleRequest) -> CycleOutcome {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::debug!("refresh already running, skipping");
            return CycleOutcome::Skipped;
        };

        let started = Instant::now();
        tracing::info!(fresh = request.fresh, "starting refresh cycle");

        let previous = self.records();
        let mut report = CycleReport {
            fresh: request.fresh,
            generation: self.index.load().generation(),
            ..Default::default()
        };

        for category in self.settings.categories.clone() {
            match self.refresh_category(category, request.fresh).await {
                Ok((category_report, generation, files)) => {
                    report.categories.push(category_report);
                    report.generation = generation;
                    report.files = files;
                }
                Err(err) => {
                    tracing::warn!(%category, "refresh failed, keeping previous snapshot: {}", err);
                    let error = err.to_string();
                    report.failures.push(CategoryFailure {
                        category,
                        error: error.clone(),
                    });
                    self.emit(SyncEvent::CategoryFailed { category, error });
                }
            }
        }

        if let Some(reconciler) = &self.reconciler {
            self.set_phase(SyncPhase::Reconciling);
            let current = self.records();
            match reconciler.store().list_links().await {
                Ok(existing) => {
                    report.links = Some(reconciler.reconcile(&previous, &current, &existing).await);
                }
                Err(err) => tracing::warn!("failed to load link records, skipping links: {}", err),
            }
        }

        self.set_phase(SyncPhase::Idle);
        report.files = self.index.load().file_count();
        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            generation = report.generation,
            files = report.files,
            failures = report.failures.len(),
            duration_ms = report.duration_ms,
            "refresh cycle finished"
        );
        self.emit(SyncEvent::CycleFinished {
            report: report.clone(),
        });
        CycleOutcome::Completed(report)
    }

    async fn refresh_category(
        &self,
        category: Category,
        fresh: bool,
    ) -> Result<(CategoryReport, u64, usize), SyncError> {
        let mut report = CategoryReport {
            category,
            items: 0,
            ready_items: 0,
            records: 0,
            skipped: 0,
            removed_items: 0,
            cleared: 0,
        };

        self.set_phase(SyncPhase::Listing);
        let items = self
            .catalog
            .list_all(category, self.settings.page_size)
            .await?;
        report.items = items.len();

        let ready: Vec<_> = items.iter().filter(|item| item.cached).collect();
        report.ready_items = ready.len();

        let allowed = &self.settings.allowed_mime_types;
        let files: Vec<(Arc<CatalogItem>, CatalogFile)> = ready
            .into_iter()
            .flat_map(|item| {
                let shared = Arc::new(item.clone());
                item.files
                    .iter()
                    .filter(|file| file.is_allowed(allowed))
                    .map(move |file| (shared.clone(), file.clone()))
            })
            .collect();

        let records: Vec<MetaRecord> = stream::iter(files)
            .map(|(item, file)| async move { self.enricher.build(category, &item, &file).await })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        self.set_phase(SyncPhase::Upserting);
        if fresh {
            report.cleared = self.store.clear(category).await?;
            tracing::debug!(%category, cleared = report.cleared, "cleared stored records");
        }

        let produced: HashSet<u64> = records.iter().map(|r| r.item_id).collect();
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            match self.store.upsert(&record).await {
                Ok(()) => stored.push(record),
                Err(err) => {
                    tracing::warn!(
                        %category,
                        item_id = record.item_id,
                        file_id = record.file_id,
                        "failed to store record: {}",
                        err
                    );
                    report.skipped += 1;
                }
            }
        }
        report.records = stored.len();

        // Stored rows of items that no longer produce records are dropped.
        let vanished: BTreeSet<u64> = self
            .snapshots
            .lock()
            .get(&category)
            .map(|records| {
                records
                    .iter()
                    .map(|r| r.item_id)
                    .filter(|id| !produced.contains(id))
                    .collect()
            })
            .unwrap_or_default();
        if !vanished.is_empty() && !fresh {
            let ids: Vec<u64> = vanished.iter().copied().collect();
            if let Err(err) = self.store.delete(&ids, None, Some(category)).await {
                tracing::warn!(%category, "failed to delete vanished items: {}", err);
            }
        }
        report.removed_items = vanished.len();

        self.set_phase(SyncPhase::IndexSwap);
        self.snapshots.lock().insert(category, stored);
        let (generation, files) = self.publish();

        tracing::info!(
            %category,
            items = report.items,
            ready = report.ready_items,
            records = report.records,
            "refreshed category"
        );
        Ok((report, generation, files))
    }
}
