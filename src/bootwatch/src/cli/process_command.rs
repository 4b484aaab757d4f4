use anyhow::{Context, Result};
use clap::Parser;

use super::commands::{Cli, Command};
use super::handlers;
use crate::config::ConfigLoader;

/// Process the command line.
pub fn process_command() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config.as_deref())?;

    match cli.command {
        Command::Report { log } => handlers::report(&config, log),
        Command::Info { json } => handlers::info(&config, json),
        Command::Run(args) => tokio::runtime::Runtime::new()
            .context("Failed to start the async runtime")?
            .block_on(handlers::run(config, args, &cli.log_level)),
    }
}
