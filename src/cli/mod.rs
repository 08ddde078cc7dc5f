//! Command-line interface for reforge.
//!
//! Every engine operation has a subcommand. Mutating commands run through
//! [`UpdaterService`] exactly as an embedding host would, streaming log lines
//! and a progress bar to the terminal; read-only commands call the service
//! directly. `--json` prints results as JSON instead of text.
//!
//! # Commands
//!
//! | Command | What it does |
//! |---------|--------------|
//! | `version [--no-clone]` | current build identity |
//! | `check` | commits ahead of and behind upstream |
//! | `commits [-n N]` | recent local commits |
//! | `update [--restart]` | fetch, merge, rebuild |
//! | `build [--tag T] [--restart]` | rebuild without fetching |
//! | `backups [-n N]` | retained executables |
//! | `rollback <path>` | swap in a backup |
//! | `prs [--state S] [--limit N]` | upstream PRs joined with the ledger |
//! | `cherry-pick <n>...` | apply PRs |
//! | `revert <n>` | revert an applied PR |

mod common;
mod info;
mod patch;
mod update;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::UpdaterConfig;
use crate::repo;
use crate::service::UpdaterService;

pub use common::CommandContext;

/// Self-update engine for a long-running service.
#[derive(Parser, Debug)]
#[command(
    name = "reforge",
    about = "Pull upstream changes, apply or revert PRs, rebuild and swap the running service",
    version,
    author
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// No logging and no progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Install directory (defaults to the directory of this executable)
    #[arg(long, global = true, env = "REFORGE_INSTALL_DIR")]
    install_dir: Option<PathBuf>,

    /// Configuration file (defaults to `<install-dir>/reforge.toml`)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Executable of the running service; backed up on restart and compared
    /// against on rollback. Without it no running image is assumed.
    #[arg(long, global = true, env = "REFORGE_RUNNING_EXE")]
    running_exe: Option<PathBuf>,

    /// Process id of the running service, waited for before a swap
    #[arg(long, global = true, env = "REFORGE_SERVICE_PID")]
    pid: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the current build identity
    Version(info::VersionCommand),
    /// Compare the checkout with upstream
    Check(info::CheckCommand),
    /// List recent local commits
    Commits(info::CommitsCommand),
    /// Fetch and merge upstream, then rebuild
    Update(update::UpdateCommand),
    /// Rebuild from the checkout as it is
    Build(update::BuildCommand),
    /// List retained executables
    Backups(info::BackupsCommand),
    /// Swap in a backup executable
    Rollback(update::RollbackCommand),
    /// List upstream pull requests
    Prs(info::PrsCommand),
    /// Apply pull requests by number
    CherryPick(patch::CherryPickCommand),
    /// Revert an applied pull request
    Revert(patch::RevertCommand),
}

impl Cli {
    /// `RUST_LOG` when set, else `debug` with `--verbose`, `off` with
    /// `--quiet`, `warn` otherwise.
    #[must_use]
    pub fn log_filter(&self) -> EnvFilter {
        if self.quiet {
            return EnvFilter::new("off");
        }
        if self.verbose {
            return EnvFilter::new("debug");
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    }

    /// Installs the stderr subscriber.
    pub fn init_logging(&self) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(self.log_filter())
            .with_writer(std::io::stderr)
            .with_target(self.verbose)
            .try_init();
    }

    fn load_config(&self, install_dir: &std::path::Path) -> Result<UpdaterConfig> {
        match &self.config {
            Some(path) => UpdaterConfig::load_from(path),
            None => UpdaterConfig::load(install_dir),
        }
    }

    /// The service this invocation acts on. The CLI process is never the
    /// running service itself.
    fn build_service(&self) -> Result<UpdaterService> {
        let install_dir = self.install_dir.clone().unwrap_or_else(repo::install_dir);
        let config = self.load_config(&install_dir)?;
        UpdaterService::builder(config)
            .install_dir(install_dir)
            .running_executable(self.running_exe.clone())
            .service_pid(self.pid)
            .build()
    }

    /// Runs the selected command.
    pub async fn execute(self) -> Result<()> {
        let service = self.build_service()?;
        let ctx = CommandContext::new(service, self.json, self.quiet);

        match self.command {
            Commands::Version(cmd) => cmd.execute(&ctx).await,
            Commands::Check(cmd) => cmd.execute(&ctx).await,
            Commands::Commits(cmd) => cmd.execute(&ctx).await,
            Commands::Update(cmd) => cmd.execute(&ctx).await,
            Commands::Build(cmd) => cmd.execute(&ctx).await,
            Commands::Backups(cmd) => cmd.execute(&ctx),
            Commands::Rollback(cmd) => cmd.execute(&ctx).await,
            Commands::Prs(cmd) => cmd.execute(&ctx).await,
            Commands::CherryPick(cmd) => cmd.execute(&ctx).await,
            Commands::Revert(cmd) => cmd.execute(&ctx).await,
        }
    }
}
