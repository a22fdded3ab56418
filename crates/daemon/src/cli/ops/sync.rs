use std::fmt;

use clap::Args;
use comfy_table::Table;
use owo_colors::OwoColorize;

use tmc_daemon::process::{init_tracing, prepare_directories, Engine, ServiceError};
use tmc_daemon::service_config::ConfigError;
use tmc_daemon::state::{AppState, StateError};
use tmc_daemon::sync::{CycleOutcome, CycleReport, CycleRequest};

/// Run one refresh cycle against the stored catalog and exit
#[derive(Args, Debug, Clone)]
pub struct SyncOnce {
    /// Clear stored records of each category before repopulating it
    #[arg(long)]
    pub fresh: bool,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug)]
pub struct SyncOutput {
    pub report: CycleReport,
    pub json: bool,
}

impl fmt::Display for SyncOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.json {
            let json = serde_json::to_string_pretty(&self.report).map_err(|_| fmt::Error)?;
            return write!(f, "{}", json);
        }

        let report = &self.report;
        let status = if report.is_success() {
            "Refreshed".green().bold().to_string()
        } else {
            "Refreshed with failures".yellow().bold().to_string()
        };
        writeln!(
            f,
            "{} {} files in {} ms (generation {})",
            status, report.files, report.duration_ms, report.generation
        )?;

        let mut table = Table::new();
        table.set_header(vec!["CATEGORY", "ITEMS", "READY", "RECORDS", "SKIPPED", "REMOVED"]);
        for category in &report.categories {
            table.add_row(vec![
                category.category.to_string(),
                category.items.to_string(),
                category.ready_items.to_string(),
                category.records.to_string(),
                category.skipped.to_string(),
                category.removed_items.to_string(),
            ]);
        }
        write!(f, "{table}")?;

        for failure in &report.failures {
            write!(
                f,
                "\n  {} {}: {}",
                "failed".red(),
                failure.category,
                failure.error
            )?;
        }
        if let Some(links) = &report.links {
            write!(
                f,
                "\n  {} {} created, {} removed, {} kept, {} failed",
                "Links:".dimmed(),
                links.created,
                links.removed,
                links.kept,
                links.failed
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("sync failed: {0}")]
    Service(#[from] ServiceError),

    #[error("a refresh is already running")]
    Busy,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for SyncOnce {
    type Error = SyncError;
    type Output = SyncOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let _guard = init_tracing(state.config.tracing_level()?, state.log_dir().as_deref());
        prepare_directories(&state.config)?;

        let engine = Engine::open(&state).await?;
        engine
            .synchronizer
            .warm_start()
            .await
            .map_err(ServiceError::from)?;

        let request = CycleRequest { fresh: self.fresh };
        match engine.synchronizer.run_cycle(request).await {
            CycleOutcome::Completed(report) => Ok(SyncOutput {
                report,
                json: self.json,
            }),
            CycleOutcome::Skipped => Err(SyncError::Busy),
        }
    }
}
