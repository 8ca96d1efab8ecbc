use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Incremental code metrics.
///
/// Computes size and coupling metrics over a code model (a JSON manifest or
/// a project directory) and keeps the results in a persistent cache.
/// `compute` rebuilds the elements it is given from scratch; the other
/// commands read cached metrics and compute only what is missing.
#[derive(Parser, Debug)]
#[command(name = "strata", about = "Incremental code metrics")]
pub struct CliArgs {
    /// Path to config file (default: ~/.config/strata/strata.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache directory (overrides config and STRATA_STATE_DIR)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// JSON model manifest, or a project directory to scan
    #[arg(long, short)]
    pub model: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compute metrics for the given handles (default: every project)
    Compute {
        #[command(flatten)]
        model: ModelArgs,
        /// Element handles to recompute
        handles: Vec<String>,
    },
    /// Print the metrics of one element
    Show {
        handle: String,
        /// Compute against this model when nothing is cached
        #[arg(long, short)]
        model: Option<PathBuf>,
    },
    /// Write the cached metric tree below an element as JSON
    Export {
        handle: String,
        /// Output file (default: stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Forget a deleted element and refresh its ancestors
    Remove {
        #[command(flatten)]
        model: ModelArgs,
        handle: String,
    },
    /// Delete cached metrics of one project, or of all projects
    Clear { project: Option<String> },
    /// Print the package dependency map of a project
    Deps {
        project: String,
        /// Compute against this model when nothing is cached
        #[arg(long, short)]
        model: Option<PathBuf>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}
