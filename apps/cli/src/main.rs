//! JobPulse CLI: recruitment-listing collection and analysis.
//!
//! Fetches listings from configured sources, cleans and stores them, and
//! writes keyword and statistics snapshots, once or on a schedule.

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
