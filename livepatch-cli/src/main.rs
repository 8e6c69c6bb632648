//! livepatch — hot-reload a running program from fresh builds.
//!
//! # Usage
//!
//! ```text
//! livepatch check [--config <path>] [--json]
//! livepatch config [--config <path>]
//! ```
//!
//! The reload loop itself patches the process it runs in, so it is not a
//! subcommand: the reloadee links `livepatch-reloader` and starts it with
//! `ReloadLoop::from_config`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check::CheckArgs, config::ConfigArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "livepatch",
    version,
    about = "Apply fresh builds to a running program without restarting it",
    long_about = None,
)]
struct Cli {
    /// Config file (default: ./livepatch.yaml, then ~/.livepatch/config.yaml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the provider library and report its entry points.
    Check(CheckArgs),

    /// Print the resolved configuration.
    Config(ConfigArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Check(args) => args.run(config),
        Commands::Config(args) => args.run(config),
    }
}
