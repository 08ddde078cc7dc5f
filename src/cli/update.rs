//! Subcommands that replace the service executable.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::common::{CommandContext, follow};
use crate::relaunch::{BackupTag, RollbackOutcome};
use crate::service::{BuildReport, RestartAction};

fn print_build(report: &BuildReport) {
    println!(
        "{} {}",
        "Built".green().bold(),
        report.artifact.executable.display()
    );
    if !report.backups.moved.is_empty() {
        println!("Backed up {} executable(s)", report.backups.moved.len());
    }
    match &report.restart {
        RestartAction::Restarted {
            ..
        } => println!("{}", "Restarting...".cyan()),
        RestartAction::MoveOnExit {
            script: Some(_),
        } => println!("Restart the service to run the new build; the old executable is moved on exit."),
        RestartAction::MoveOnExit {
            script: None,
        } => println!("Restart the service to run the new build."),
    }
}

/// `reforge update`
#[derive(Args, Debug)]
pub struct UpdateCommand {
    /// Restart into the new build when done
    #[arg(long)]
    pub restart: bool,
}

impl UpdateCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let handle = ctx.service.start_update(self.restart)?;
        let report = follow(ctx, handle).await?;
        if ctx.json {
            return ctx.print_json(&report);
        }

        if report.update.local_changes_discarded {
            println!("{}", "Local changes conflicted with upstream and were discarded".yellow());
        } else if report.update.stashed {
            println!("Local changes were kept");
        }
        print_build(&report.build);
        Ok(())
    }
}

/// `reforge build`
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Backup tag: `update`, `build` or `pr`
    #[arg(long, default_value = "build")]
    pub tag: String,

    /// Restart into the new build when done
    #[arg(long)]
    pub restart: bool,
}

impl BuildCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let handle = ctx.service.start_build(self.restart, BackupTag::parse(&self.tag))?;
        let report = follow(ctx, handle).await?;
        if ctx.json {
            return ctx.print_json(&report);
        }
        print_build(&report);
        Ok(())
    }
}

/// `reforge rollback`
#[derive(Args, Debug)]
pub struct RollbackCommand {
    /// Backup file inside the backup directory
    pub path: PathBuf,
}

impl RollbackCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let handle = ctx.service.start_rollback(self.path)?;
        let outcome = follow(ctx, handle).await?;
        if ctx.json {
            return ctx.print_json(&outcome);
        }
        match outcome {
            RollbackOutcome::AlreadyCurrent => {
                println!("{}", "Selected version is already running".yellow());
            }
            RollbackOutcome::Scheduled {
                ..
            } => println!("{}", "Rolling back...".cyan()),
        }
        Ok(())
    }
}
