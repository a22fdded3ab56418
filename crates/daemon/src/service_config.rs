use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use common::vfs::path::is_valid_component;
use common::{Category, IndexLayout};

use crate::fuse::BlockCacheConfig;
use crate::links::LinkPolicy;
use crate::sync::{SchedulerConfig, SyncSettings};

/// Environment variable overriding `api_key`
pub const API_KEY_ENV: &str = "TMC_API_KEY";

/// Shortest allowed refresh interval
pub const MIN_REFRESH_INTERVAL_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("api_key is empty; set it in config.toml or {API_KEY_ENV}")]
    MissingApiKey,

    #[error("refresh_interval_secs must be at least {MIN_REFRESH_INTERVAL_SECS}, got {0}")]
    RefreshIntervalTooShort(u64),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{field} must be an absolute path, got {path}")]
    RelativePath { field: &'static str, path: PathBuf },

    #[error("invalid directory name for {field}: {name:?}")]
    InvalidDirectoryName { field: &'static str, name: String },

    #[error("movies_dir and series_dir must differ")]
    SameLayoutDirectories,

    #[error("no categories configured")]
    NoCategories,

    #[error("symlink_path must not be inside mount_path")]
    MirrorInsideMount,

    #[error("invalid log level: {0}")]
    LogLevel(String),
}

/// Daemon configuration, read from `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_key: String,
    pub api_base_url: Url,
    pub search_api_url: Url,
    pub categories: Vec<Category>,

    /// Where the catalog filesystem is mounted
    pub mount_path: PathBuf,
    /// Root of the mirror link tree; mirroring is off when unset
    pub symlink_path: Option<PathBuf>,
    pub symlink_creation: LinkPolicy,
    pub movies_dir: String,
    pub series_dir: String,
    pub allow_other: bool,

    pub block_size: u64,
    pub max_blocks_per_file: usize,
    pub link_ttl_secs: u64,

    pub refresh_interval_secs: u64,
    pub refresh_jitter_secs: u64,
    pub sync_concurrency: usize,
    pub list_page_size: usize,
    pub allowed_mime_types: Vec<String>,
    /// Connect and request timeout of catalog and search calls
    pub http_timeout_secs: u64,
    /// Longest stall tolerated while a block body streams in
    pub fetch_read_timeout_secs: u64,

    pub log_level: String,
    /// Daily rolling log files are written here when set
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: Url::parse("https://api.torbox.app/v1/api/").expect("valid default URL"),
            search_api_url: Url::parse("https://search-api.torbox.app/")
                .expect("valid default URL"),
            categories: Category::ALL.to_vec(),
            mount_path: PathBuf::from("/mnt/tmc"),
            symlink_path: None,
            symlink_creation: LinkPolicy::Once,
            movies_dir: "movies".to_string(),
            series_dir: "series".to_string(),
            allow_other: false,
            block_size: 16 * 1024 * 1024,
            max_blocks_per_file: 16,
            link_ttl_secs: 3600,
            refresh_interval_secs: 3600,
            refresh_jitter_secs: 120,
            sync_concurrency: 8,
            list_page_size: 1000,
            allowed_mime_types: vec!["video/x-matroska".to_string(), "video/mp4".to_string()],
            http_timeout_secs: 30,
            fetch_read_timeout_secs: 30,
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Apply environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.api_key = key.trim().to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.refresh_interval_secs < MIN_REFRESH_INTERVAL_SECS {
            return Err(ConfigError::RefreshIntervalTooShort(
                self.refresh_interval_secs,
            ));
        }
        for (field, value) in [
            ("block_size", self.block_size),
            ("max_blocks_per_file", self.max_blocks_per_file as u64),
            ("link_ttl_secs", self.link_ttl_secs),
            ("sync_concurrency", self.sync_concurrency as u64),
            ("list_page_size", self.list_page_size as u64),
            ("http_timeout_secs", self.http_timeout_secs),
            ("fetch_read_timeout_secs", self.fetch_read_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(field));
            }
        }
        if self.categories.is_empty() {
            return Err(ConfigError::NoCategories);
        }

        for (field, name) in [("movies_dir", &self.movies_dir), ("series_dir", &self.series_dir)] {
            if !is_valid_component(name) {
                return Err(ConfigError::InvalidDirectoryName {
                    field,
                    name: name.clone(),
                });
            }
        }
        if self.movies_dir == self.series_dir {
            return Err(ConfigError::SameLayoutDirectories);
        }

        if !self.mount_path.is_absolute() {
            return Err(ConfigError::RelativePath {
                field: "mount_path",
                path: self.mount_path.clone(),
            });
        }
        if let Some(mirror) = &self.symlink_path {
            if !mirror.is_absolute() {
                return Err(ConfigError::RelativePath {
                    field: "symlink_path",
                    path: mirror.clone(),
                });
            }
            if mirror.starts_with(&self.mount_path) {
                return Err(ConfigError::MirrorInsideMount);
            }
        }

        self.tracing_level()?;
        Ok(())
    }

    pub fn tracing_level(&self) -> Result<tracing::Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::LogLevel(self.log_level.clone()))
    }

    pub fn layout(&self) -> IndexLayout {
        IndexLayout::new(&self.movies_dir, &self.series_dir)
    }

    pub fn mirror_root(&self) -> Option<String> {
        self.symlink_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn fetch_read_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_read_timeout_secs)
    }

    pub fn block_cache(&self) -> BlockCacheConfig {
        BlockCacheConfig {
            block_size: self.block_size,
            max_blocks_per_file: self.max_blocks_per_file,
            link_ttl: Duration::from_secs(self.link_ttl_secs),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            categories: self.categories.clone(),
            allowed_mime_types: self.allowed_mime_types.clone(),
            concurrency: self.sync_concurrency,
            page_size: self.list_page_size,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.refresh_interval_secs),
            jitter: Duration::from_secs(self.refresh_jitter_secs),
            fresh_start: true,
        }
    }
}
