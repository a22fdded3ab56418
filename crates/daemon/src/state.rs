//! On-disk application state: the app directory, its config and database
//!
//! ```text
//! ~/.tmc/
//! ├── config.toml
//! ├── db.sqlite
//! └── logs/          (with `log_dir = "logs"`)
//! ```

use std::path::PathBuf;

use crate::service_config::{Config, ConfigError};

pub const APP_NAME: &str = "tmc";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("could not determine the home directory")]
    NoHomeDirectory,

    #[error("{0} is not initialized; run `tmc init` first")]
    NotInitialized(PathBuf),

    #[error("{0} already exists")]
    AlreadyInitialized(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ParseConfig(#[from] toml::de::Error),

    #[error("failed to write config: {0}")]
    WriteConfig(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Resolved paths and configuration of an initialized app directory
#[derive(Debug, Clone)]
pub struct AppState {
    pub app_dir: PathBuf,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    pub config: Config,
}

impl AppState {
    /// The app directory: `custom` when given, `~/.tmc` otherwise.
    pub fn app_dir(custom: Option<PathBuf>) -> Result<PathBuf, StateError> {
        match custom {
            Some(dir) => Ok(dir),
            None => dirs::home_dir()
                .map(|home| home.join(format!(".{}", APP_NAME)))
                .ok_or(StateError::NoHomeDirectory),
        }
    }

    /// Create the app directory and write `config`.
    pub fn init(custom: Option<PathBuf>, config: Config) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom)?;
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Err(StateError::AlreadyInitialized(config_path));
        }

        std::fs::create_dir_all(&app_dir)?;
        std::fs::write(&config_path, toml::to_string_pretty(&config)?)?;
        tracing::info!(path = %config_path.display(), "wrote default config");

        Ok(Self::from_parts(app_dir, config))
    }

    /// Load and validate the config of an initialized app directory.
    pub fn load(custom: Option<PathBuf>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom)?;
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized(app_dir));
        }

        let raw = std::fs::read_to_string(&config_path)?;
        let config = toml::from_str::<Config>(&raw)?.with_env_overrides();
        config.validate()?;

        Ok(Self::from_parts(app_dir, config))
    }

    fn from_parts(app_dir: PathBuf, config: Config) -> Self {
        Self {
            config_path: app_dir.join(CONFIG_FILE_NAME),
            db_path: app_dir.join(DB_FILE_NAME),
            app_dir,
            config,
        }
    }

    /// Directory for log files, when file logging is configured. Relative
    /// paths resolve inside the app directory.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.config.log_dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                self.app_dir.join(dir)
            }
        })
    }
}
