//! Top-level CLI surface (spec §6): `--config`, `--dry-run`, `--once`,
//! `--version`, dispatching into the Supervisor.
//!
//! `assets`, `bootstrap`, `dashboard`, `from_source`, `install`,
//! `integrations`, `uninstall`, `update`, and `wizard` are the teacher's
//! installer/updater/release-artifact machinery, kept as reference pending
//! the final trim pass; none of it is relevant to a cleanup daemon's CLI
//! surface and none of it is declared below.

use std::path::PathBuf;

use clap::Parser;

use crate::core::config::{Config, DEFAULT_CONFIG_PATH};
use crate::core::errors::Result;
use crate::daemon::supervisor::Supervisor;

/// StorageSage — filesystem-cleanup daemon.
#[derive(Debug, Parser)]
#[command(name = "storage-sage", author, version, about = "StorageSage - filesystem cleanup daemon", long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Never actually delete anything; record `DRY_RUN` rows instead.
    #[arg(long)]
    pub dry_run: bool,

    /// Run exactly one cleanup cycle over every root, then exit.
    #[arg(long)]
    pub once: bool,
}

/// Load configuration, start the Supervisor, and run either a single cycle
/// (`--once`) or the full tick loop until a shutdown signal arrives.
///
/// # Errors
///
/// Returns the first fatal error from configuration loading or Supervisor
/// startup; the caller maps it to a process exit code via
/// [`crate::core::errors::SsError::exit_code`].
pub fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let supervisor = Supervisor::start(config, cli.dry_run)?;

    if cli.once {
        supervisor.run_once();
    } else {
        supervisor.run_forever();
    }

    Ok(())
}
