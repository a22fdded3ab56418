use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use common::Category;
use tmc_daemon::links::LinkPolicy;
use tmc_daemon::service_config::{Config, ConfigError, API_KEY_ENV};
use tmc_daemon::state::{AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Catalog API key
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    pub api_key: String,

    /// Where the catalog filesystem is mounted (absolute path)
    #[arg(long, default_value = "/mnt/tmc")]
    pub mount_path: PathBuf,

    /// Root of the mirror link tree; mirroring stays off when omitted
    #[arg(long)]
    pub symlink_path: Option<PathBuf>,

    /// When mirror links are (re)created
    #[arg(long, value_enum, default_value_t = LinkPolicy::Once)]
    pub symlink_creation: LinkPolicy,

    /// Categories to refresh (default: all)
    #[arg(long, value_delimiter = ',')]
    pub categories: Vec<Category>,

    /// Let other users access the mount
    #[arg(long)]
    pub allow_other: bool,
}

#[derive(Debug)]
pub struct InitOutput {
    pub app_dir: PathBuf,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    pub mount_path: PathBuf,
    pub symlink_path: Option<PathBuf>,
    pub symlink_creation: LinkPolicy,
    pub categories: Vec<Category>,
}

impl fmt::Display for InitOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} tmc at {}",
            "Initialized".green().bold(),
            self.app_dir.display().to_string().bold()
        )?;
        writeln!(f, "  {} {}", "Config:".dimmed(), self.config_path.display())?;
        writeln!(f, "  {} {}", "Database:".dimmed(), self.db_path.display())?;
        writeln!(f, "  {} {}", "Mount:".dimmed(), self.mount_path.display())?;
        let mirror = match &self.symlink_path {
            Some(path) => format!("{} ({})", path.display(), self.symlink_creation),
            None => "disabled".to_string(),
        };
        writeln!(f, "  {} {}", "Mirror:".dimmed(), mirror)?;
        let categories: Vec<&str> = self.categories.iter().map(|c| c.as_str()).collect();
        write!(f, "  {} {}", "Categories:".dimmed(), categories.join(", "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    State(#[from] StateError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl Init {
    fn config(&self) -> Config {
        let defaults = Config::default();
        Config {
            api_key: self.api_key.trim().to_string(),
            mount_path: self.mount_path.clone(),
            symlink_path: self.symlink_path.clone(),
            symlink_creation: self.symlink_creation,
            categories: if self.categories.is_empty() {
                defaults.categories.clone()
            } else {
                self.categories.clone()
            },
            allow_other: self.allow_other,
            ..defaults
        }
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = InitOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = self.config();
        config.validate()?;

        let state = AppState::init(ctx.config_path.clone(), config)?;

        Ok(InitOutput {
            app_dir: state.app_dir,
            config_path: state.config_path,
            db_path: state.db_path,
            mount_path: state.config.mount_path,
            symlink_path: state.config.symlink_path,
            symlink_creation: state.config.symlink_creation,
            categories: state.config.categories,
        })
    }
}
