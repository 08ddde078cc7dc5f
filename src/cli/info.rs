//! Read-only subcommands.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::common::CommandContext;
use crate::backup::BackupVersion;
use crate::git::CommitInfo;

fn format_date<Tz: chrono::TimeZone>(date: Option<&chrono::DateTime<Tz>>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    date.map_or_else(|| "unknown date".to_string(), |d| d.format("%Y-%m-%d %H:%M").to_string())
}

fn print_commit(commit: &CommitInfo) {
    println!(
        "  {} {} {}",
        commit.hash.yellow(),
        format_date(commit.date.as_ref()).bright_black(),
        commit.message
    );
}

/// `reforge version`
#[derive(Args, Debug)]
pub struct VersionCommand {
    /// Never clone a missing source repository
    #[arg(long)]
    no_clone: bool,
}

impl VersionCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let version = ctx.service.current_version(self.no_clone).await?;
        if ctx.json {
            return ctx.print_json(&version);
        }

        match version {
            Some(v) => {
                println!("{} {}", "Commit:".bold(), v.commit_hash.yellow());
                println!("{} {}", "Branch:".bold(), v.branch);
                println!("{} {}", "Date:".bold(), format_date(v.commit_date.as_ref()));
                if !v.commit_message.is_empty() {
                    println!("{} {}", "Message:".bold(), v.commit_message);
                }
            }
            None => println!("{}", "No version information available".yellow()),
        }
        Ok(())
    }
}

/// `reforge check`
#[derive(Args, Debug)]
pub struct CheckCommand {}

impl CheckCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let result = ctx.service.check_for_updates().await?;
        if ctx.json {
            return ctx.print_json(&result);
        }

        if result.has_updates {
            println!(
                "{} commit(s) behind upstream",
                result.commits_behind.to_string().yellow().bold()
            );
            for commit in &result.new_commits {
                print_commit(commit);
            }
        } else {
            println!("{}", "Up to date with upstream".green());
        }
        if result.commits_ahead > 0 {
            println!("{} local commit(s) not upstream", result.commits_ahead.to_string().cyan());
            for commit in &result.ahead_commits {
                print_commit(commit);
            }
        }
        Ok(())
    }
}

/// `reforge commits`
#[derive(Args, Debug)]
pub struct CommitsCommand {
    /// Number of commits (1-50)
    #[arg(short = 'n', long, default_value_t = 10)]
    limit: usize,
}

impl CommitsCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let commits = ctx.service.current_commits(self.limit).await?;
        if ctx.json {
            return ctx.print_json(&commits);
        }
        for commit in &commits {
            print_commit(commit);
        }
        Ok(())
    }
}

/// `reforge backups`
#[derive(Args, Debug)]
pub struct BackupsCommand {
    /// Maximum number listed; 0 lists all
    #[arg(short = 'n', long, default_value_t = 0)]
    limit: usize,
}

fn print_backup(backup: &BackupVersion) {
    let marker = if backup.is_current { "*".green().bold() } else { " ".normal() };
    println!(
        "{} {:<48} {:>10}  {}",
        marker,
        backup.filename,
        format!("{} KiB", backup.size / 1024),
        format_date(Some(&backup.created_at)).bright_black()
    );
}

impl BackupsCommand {
    pub fn execute(self, ctx: &CommandContext) -> Result<()> {
        let current = ctx.service.current_executable()?;
        let backups = ctx.service.list_backups(self.limit)?;
        if ctx.json {
            return ctx.print_json(&serde_json::json!({
                "current": current,
                "backups": backups,
            }));
        }

        if let Some(current) = &current {
            println!("{}", "Current executable:".bold());
            print_backup(current);
        }
        if backups.is_empty() {
            println!("{}", "No backups".yellow());
            return Ok(());
        }
        println!("{}", "Backups (newest first):".bold());
        for backup in &backups {
            print_backup(backup);
        }
        Ok(())
    }
}

/// `reforge prs`
#[derive(Args, Debug)]
pub struct PrsCommand {
    /// `open`, `closed` or `all`
    #[arg(long, default_value = "open")]
    state: String,

    /// Page size (1-100)
    #[arg(long, default_value_t = 30)]
    limit: u32,
}

impl PrsCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let prs = ctx.service.list_prs(&self.state, self.limit).await?;
        if ctx.json {
            return ctx.print_json(&prs);
        }
        if prs.is_empty() {
            println!("{}", "No pull requests".yellow());
            return Ok(());
        }

        for pr in &prs {
            let status = if pr.can_revert {
                "applied".green()
            } else if pr.applied {
                "applied (no commits)".cyan()
            } else {
                "".normal()
            };
            println!(
                "{:>6} {} {} {}",
                format!("#{}", pr.number).yellow(),
                pr.title,
                format!("by {}", pr.user.login).bright_black(),
                status
            );
        }
        Ok(())
    }
}
