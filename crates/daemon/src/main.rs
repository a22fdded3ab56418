use clap::Parser;

mod cli;

use cli::op::OpContext;
use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ctx = OpContext {
        config_path: cli.config_path.clone(),
    };

    let output = cli.command.execute(&ctx).await?;
    println!("{}", output);
    Ok(())
}
