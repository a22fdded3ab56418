use clap::Args;

use tmc_daemon::process::{init_tracing, spawn_service, ServiceError};
use tmc_daemon::service_config::ConfigError;
use tmc_daemon::state::{AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Keep stored records on the startup refresh instead of clearing them
    #[arg(long)]
    pub no_fresh_start: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("daemon failed: {0}")]
    Service(#[from] ServiceError),

    #[error("failed to wait for shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Daemon {
    type Error = DaemonError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let _guard = init_tracing(state.config.tracing_level()?, state.log_dir().as_deref());

        tracing::info!(
            app_dir = %state.app_dir.display(),
            mount = %state.config.mount_path.display(),
            "starting daemon"
        );
        let handle = spawn_service(&state, !self.no_fresh_start).await?;

        tokio::signal::ctrl_c().await?;
        handle.shutdown().await;
        Ok("daemon stopped".to_string())
    }
}
