//! Service wiring: logging, engine construction and the long-running daemon.

use std::path::Path;
use std::sync::Arc;
#[cfg(feature = "fuse")]
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use common::IndexHandle;

use crate::catalog::{CatalogApi, CatalogError, FetchError, HttpRangeFetcher, MatchError, SearchApi};
use crate::database::{Database, DatabaseSetupError, StoreError};
use crate::fuse::BlockCache;
use crate::links::LinkReconciler;
use crate::service_config::Config;
use crate::state::AppState;
use crate::sync::{spawn_scheduler, Enricher, SchedulerConfig, SyncDispatcher, Synchronizer};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("database setup failed: {0}")]
    Database(#[from] DatabaseSetupError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("catalog client: {0}")]
    Catalog(#[from] CatalogError),

    #[error("search client: {0}")]
    Match(#[from] MatchError),

    #[error("download client: {0}")]
    Fetch(#[from] FetchError),

    #[error("failed to prepare {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "fuse")]
    #[error("mount failed: {0}")]
    Mount(#[from] crate::fuse::MountError),
}

/// Install the global subscriber: stderr, plus a daily rolling file when
/// `log_dir` is set. `RUST_LOG` overrides `level`.
///
/// Keep the returned guard alive for as long as file logs should be flushed.
pub fn init_tracing(level: tracing::Level, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tmc.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A subscriber may already be installed, e.g. by tests.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    guard
}

/// Everything needed to refresh the catalog and serve file contents
pub struct Engine {
    pub database: Database,
    pub index: IndexHandle,
    pub synchronizer: Arc<Synchronizer>,
    pub cache: Arc<BlockCache>,
}

impl Engine {
    /// Build the engine over the database of an initialized app directory.
    pub async fn open(state: &AppState) -> Result<Self, ServiceError> {
        let database = Database::new(&state.db_path).await?;
        Self::new(&state.config, database)
    }

    pub fn new(config: &Config, database: Database) -> Result<Self, ServiceError> {
        let timeout = config.http_timeout();
        let catalog = Arc::new(CatalogApi::new(&config.api_base_url, &config.api_key, timeout)?);
        let matcher = Arc::new(SearchApi::new(&config.search_api_url, &config.api_key, timeout)?);
        let fetcher = Arc::new(HttpRangeFetcher::new(timeout, config.fetch_read_timeout())?);
        let store = Arc::new(database.clone());

        let layout = config.layout();
        let index = IndexHandle::empty(&layout);
        let enricher = Enricher::new(matcher, layout, config.mirror_root());
        let reconciler = config.symlink_path.as_ref().map(|_| {
            LinkReconciler::new(config.symlink_creation, &config.mount_path, store.clone())
        });

        let synchronizer = Arc::new(Synchronizer::new(
            catalog.clone(),
            store,
            enricher,
            reconciler,
            index.clone(),
            config.sync_settings(),
        ));
        let cache = Arc::new(BlockCache::new(
            index.clone(),
            catalog,
            fetcher,
            config.block_cache(),
        ));

        Ok(Self {
            database,
            index,
            synchronizer,
            cache,
        })
    }
}

/// Create the mount point and the mirror tree's top-level directories.
pub fn prepare_directories(config: &Config) -> Result<(), ServiceError> {
    let mut dirs = vec![config.mount_path.clone()];
    if let Some(mirror) = &config.symlink_path {
        dirs.push(mirror.join(&config.movies_dir));
        dirs.push(mirror.join(&config.series_dir));
    }
    for dir in dirs {
        std::fs::create_dir_all(&dir).map_err(|source| ServiceError::Directory {
            path: dir.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

/// Handle to a running service
pub struct ShutdownHandle {
    shutdown_tx: watch::Sender<()>,
    dispatcher: SyncDispatcher,
    tasks: Vec<JoinHandle<()>>,
    #[cfg(feature = "fuse")]
    session: Option<fuser::BackgroundSession>,
}

impl ShutdownHandle {
    /// Dispatcher for on-demand refreshes
    pub fn dispatcher(&self) -> &SyncDispatcher {
        &self.dispatcher
    }

    /// Stop the scheduler and unmount the filesystem.
    pub async fn shutdown(self) {
        tracing::info!("shutting down");
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::warn!("background task ended abnormally: {}", err);
            }
        }
        #[cfg(feature = "fuse")]
        if let Some(session) = self.session {
            session.join();
            tracing::info!("filesystem unmounted");
        }
    }
}

/// Start the daemon: publish stored records, start the refresh scheduler and
/// mount the filesystem. With `fresh_start` the first refresh clears stored
/// records of each category it lists successfully.
pub async fn spawn_service(
    state: &AppState,
    fresh_start: bool,
) -> Result<ShutdownHandle, ServiceError> {
    let config = &state.config;
    prepare_directories(config)?;

    let engine = Engine::open(state).await?;
    let generation = engine.synchronizer.warm_start().await?;
    tracing::info!(
        generation,
        files = engine.index.load().file_count(),
        "published stored records"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let (dispatcher, receiver) = SyncDispatcher::new();
    let scheduler = spawn_scheduler(
        engine.synchronizer.clone(),
        receiver,
        SchedulerConfig {
            fresh_start,
            ..config.scheduler()
        },
        shutdown_rx,
    );

    #[cfg(feature = "fuse")]
    let session = {
        let fs = crate::fuse::MediaFs::new(engine.cache.clone(), Duration::from_secs(1))?;
        Some(crate::fuse::spawn_mount(fs, &config.mount_path, config.allow_other)?)
    };
    #[cfg(not(feature = "fuse"))]
    tracing::warn!("built without the fuse feature, the catalog will not be mounted");

    Ok(ShutdownHandle {
        shutdown_tx,
        dispatcher,
        tasks: vec![scheduler],
        #[cfg(feature = "fuse")]
        session,
    })
}
