//! kubedocs CLI: scrape the Kubernetes documentation into Markdown.
//!
//! Fetches the configured documentation sources, converts them to Markdown,
//! and writes one file per topic plus the downloaded provider guides.

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
