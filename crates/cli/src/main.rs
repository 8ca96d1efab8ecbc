mod cli;
mod commands;
mod config;
mod fs_model;
mod report;

use anyhow::Result;
use clap::Parser;

use crate::cli::CliArgs;

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    strata_core::config::load_dotenv();
    let args = CliArgs::parse();

    let config = config::load(args.config.as_deref(), args.state_dir)?;
    config.log_summary();

    commands::run(args.command, &config)
}
