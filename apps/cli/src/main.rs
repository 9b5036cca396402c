//! sitemind CLI: sitemap-driven page ingestion with cached AI processing.
//!
//! Resolves a site's sitemap, fetches and normalizes every page, and runs
//! each page through a completion model, caching every step.

mod commands;
mod progress;

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
