//! PolicyHarvest CLI: policy and legal document ingestion.
//!
//! Discovers documents in official publications, case law, crawl archives
//! and municipal websites, normalizes them into canonical documents, and
//! links them into navigation and knowledge graphs.

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
