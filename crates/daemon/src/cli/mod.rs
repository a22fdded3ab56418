use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod op;
pub mod ops;

use op::Op;

crate::command_enum! {
    (Init, ops::Init),
    (Daemon, ops::Daemon),
    (Sync, ops::SyncOnce),
    (Meta, ops::Meta),
    (Version, ops::Version),
}

#[derive(Parser, Debug)]
#[command(name = "tmc", about = "Mount a remote media catalog as a local filesystem")]
pub struct Cli {
    /// App directory holding config.toml and db.sqlite (default: ~/.tmc)
    #[arg(long, global = true, env = "TMC_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}
