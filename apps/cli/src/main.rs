//! jobrelay CLI: answers job questions arriving on a PubNub channel.
//!
//! Each request is grounded in stored job context, answered by a chat model,
//! persisted, and relayed back on the response channel.

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
