//! SQLite persistence for metadata records and mirror links.
//!
//! The store is accessed through the [`MetadataStore`] and [`LinkStore`]
//! traits so the engine can be driven against any backend; [`Database`] is
//! the production implementation.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use url::Url;

mod link_queries;
mod meta_queries;

pub use link_queries::{LinkRecord, LinkStore};
pub use meta_queries::MetadataStore;

/// Database connection pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl std::ops::Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

/// Errors that can occur when setting up the database
#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("failed to create database directory: {0}")]
    Directory(#[from] std::io::Error),
}

/// Errors returned by store queries
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("corrupt extra fields: {0}")]
    Extra(#[from] serde_json::Error),

    #[error("invalid stored value in column {column}: {value}")]
    InvalidColumn { column: &'static str, value: String },
}

impl Database {
    /// Open (creating if missing) a file-based database and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, DatabaseSetupError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        tracing::info!("database initialized at {:?}", path);
        Ok(db)
    }

    /// Connect using a `sqlite://` URL.
    pub async fn connect(url: &Url) -> Result<Self, DatabaseSetupError> {
        if url.as_str().starts_with("sqlite::memory:") {
            return Self::in_memory().await;
        }
        Self::new(url.path()).await
    }

    /// In-memory database, used by tests.
    pub async fn in_memory() -> Result<Self, DatabaseSetupError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        // A single connection, otherwise each one gets its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        tracing::debug!("database initialized in-memory");
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meta_items (
                category TEXT NOT NULL,
                item_id INTEGER NOT NULL,
                file_id INTEGER NOT NULL,
                media_type TEXT NOT NULL,
                root_folder_name TEXT NOT NULL,
                season_folder_name TEXT,
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                download_link_template TEXT NOT NULL,
                real_path TEXT NOT NULL,
                symlink_path TEXT,
                folder_name TEXT NOT NULL DEFAULT '',
                folder_hash TEXT NOT NULL DEFAULT '',
                original_file_name TEXT NOT NULL DEFAULT '',
                mime_type TEXT NOT NULL DEFAULT '',
                relative_path TEXT NOT NULL DEFAULT '',
                extension TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL DEFAULT '',
                year INTEGER,
                season INTEGER,
                episodes TEXT NOT NULL DEFAULT '',
                metadata_link TEXT,
                image TEXT,
                backdrop TEXT,
                extra_json TEXT NOT NULL DEFAULT '{}',
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (category, item_id, file_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_meta_items_media_type ON meta_items(media_type)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                symlink_path TEXT PRIMARY KEY,
                real_path TEXT NOT NULL,
                category TEXT NOT NULL,
                item_id INTEGER NOT NULL,
                file_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_item ON links(category, item_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
