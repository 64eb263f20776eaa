//! evalcard CLI: publish evaluation runs and maintain their dataset cards.
//!
//! Saves finished runs locally, pushes results and details to a dataset hub,
//! and rebuilds the run-history configuration of details repositories.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
