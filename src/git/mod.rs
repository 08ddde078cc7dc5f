//! Git operations wrapper for reforge
//!
//! The engine drives the system `git` binary rather than an embedded library,
//! so it works with whatever credentials, hooks and configuration the
//! installation already has. Every invocation goes through
//! [`command_builder::GitCommand`]; this module adds a thin repository handle
//! ([`GitRepo`]) with the queries the update, cherry-pick and revert flows
//! share, plus classifiers that read git's human-oriented failure output.
//!
//! # Output classification
//!
//! Merge, cherry-pick and revert report conflicts and no-op results only in
//! their text output. The classifiers ([`is_merge_conflict_output`], [`is_conflict_output`],
//! [`is_merge_commit_output`], [`is_empty_pick_output`],
//! [`is_empty_revert_output`]) match the messages git prints under `LC_ALL=C`,
//! which [`GitCommand`] always sets.
//!
//! # Examples
//!
//! ```rust,no_run
//! use reforge::git::GitRepo;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let repo = GitRepo::new("/opt/app/.reforge-src");
//! if repo.is_dirty().await? {
//!     println!("local edits on {}", repo.current_branch().await?);
//! }
//! let (ahead, behind) = repo.ahead_behind("HEAD", "upstream/main").await?;
//! println!("{ahead} ahead, {behind} behind");
//! # Ok(())
//! # }
//! ```

pub mod command_builder;

use crate::core::UpdaterError;
use crate::git::command_builder::GitCommand;
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Length of the abbreviated commit hashes shown to users.
pub const SHORT_HASH_LEN: usize = 7;

/// One line of `git log`, as shown in update checks and commit listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Abbreviated hash
    pub hash: String,
    /// Committer date; `None` when git printed something unparsable
    pub date: Option<DateTime<FixedOffset>>,
    /// Subject line
    pub message: String,
}

impl CommitInfo {
    /// Parse a `%H|%ci|%s` log line. The subject may itself contain `|`.
    #[must_use]
    pub fn parse_log_line(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, '|');
        let hash = parts.next()?.trim();
        let date = parts.next()?.trim();
        let message = parts.next()?.trim();
        if hash.is_empty() {
            return None;
        }
        Some(Self {
            hash: short_hash(hash),
            date: parse_git_date(date),
            message: message.to_string(),
        })
    }
}

/// Parses the `%ci` format (`2024-03-01 10:00:00 +0100`).
#[must_use]
pub fn parse_git_date(date: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(date.trim(), "%Y-%m-%d %H:%M:%S %z").ok()
}

/// First [`SHORT_HASH_LEN`] characters of a commit identifier.
#[must_use]
pub fn short_hash(hash: &str) -> String {
    hash.chars().take(SHORT_HASH_LEN).collect()
}

/// A local Git repository handle.
///
/// Holds only the path; every method spawns `git -C <path> ...`.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
}

impl GitRepo {
    /// Creates a handle without checking that `path` is a repository.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The repository root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn command(&self, cmd: GitCommand) -> GitCommand {
        cmd.current_dir(&self.path)
    }

    /// Clones `url` into `target`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdaterError::GitCommandError`] with operation `clone` when
    /// git reports failure. The caller is responsible for cleaning up a
    /// partially created target.
    pub async fn clone(url: &str, target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref();
        GitCommand::clone(url, target)
            .with_context(format!("clone {url}"))
            .execute_success()
            .await?;
        Ok(Self::new(target))
    }

    /// URL of `remote`, or `None` when it is not configured.
    pub async fn remote_url(&self, remote: &str) -> Result<Option<String>> {
        let output = self.command(GitCommand::remote_get_url(remote)).execute_allow_failure().await?;
        if !output.success {
            return Ok(None);
        }
        let url = output.stdout.trim();
        Ok((!url.is_empty()).then(|| url.to_string()))
    }

    /// Adds `remote` pointing at `url`.
    pub async fn add_remote(&self, remote: &str, url: &str) -> Result<()> {
        self.command(GitCommand::remote_add(remote, url)).execute_success().await
    }

    /// Repoints `remote` at `url`.
    pub async fn set_remote_url(&self, remote: &str, url: &str) -> Result<()> {
        self.command(GitCommand::remote_set_url(remote, url)).execute_success().await
    }

    /// `git fetch <remote> [<reference>]`.
    pub async fn fetch(&self, remote: &str, reference: Option<&str>) -> Result<()> {
        self.command(GitCommand::fetch(remote, reference))
            .execute_success()
            .await
            .with_context(|| match reference {
                Some(r) => format!("Failed to fetch {r} from {remote}"),
                None => format!("Failed to fetch {remote}"),
            })
    }

    /// Current branch name; `HEAD` when detached or unresolvable.
    pub async fn current_branch(&self) -> Result<String> {
        let branch = self.command(GitCommand::current_branch()).execute_stdout().await?;
        if branch.is_empty() {
            Ok("HEAD".to_string())
        } else {
            Ok(branch)
        }
    }

    /// Resolves `reference` to a full hash.
    pub async fn rev_parse(&self, reference: &str) -> Result<String> {
        self.command(GitCommand::rev_parse(reference)).execute_stdout().await
    }

    /// Resolves `reference`, returning `None` instead of failing.
    pub async fn try_rev_parse(&self, reference: &str) -> Result<Option<String>> {
        let output = self.command(GitCommand::rev_parse(reference)).execute_allow_failure().await?;
        let hash = output.stdout.trim();
        Ok((output.success && !hash.is_empty()).then(|| hash.to_string()))
    }

    /// Whether `reference` names a commit present in the object store.
    pub async fn commit_exists(&self, reference: &str) -> Result<bool> {
        self.command(GitCommand::commit_exists(reference)).succeeds().await
    }

    /// Whether `status --porcelain` reports anything, untracked files included.
    pub async fn is_dirty(&self) -> Result<bool> {
        let status = self.command(GitCommand::status_porcelain()).execute_stdout().await?;
        Ok(!status.is_empty())
    }

    /// Whether the index holds unmerged entries.
    pub async fn has_unmerged_paths(&self) -> Result<bool> {
        let output = self.command(GitCommand::unmerged_files()).execute_allow_failure().await?;
        Ok(output.success && !output.stdout.trim().is_empty())
    }

    /// Counts commits only in `base` and only in `upstream`.
    pub async fn ahead_behind(&self, base: &str, upstream: &str) -> Result<(u32, u32)> {
        let counts = self
            .command(GitCommand::rev_list_left_right(base, upstream))
            .execute_stdout()
            .await?;
        parse_ahead_behind(&counts).with_context(|| format!("Unexpected rev-list output: {counts:?}"))
    }

    /// Commits in `range`, newest first, at most `limit`.
    pub async fn log(&self, range: &str, limit: usize) -> Result<Vec<CommitInfo>> {
        let output = self.command(GitCommand::log_pretty(range, limit)).execute_stdout().await?;
        Ok(output.lines().filter_map(CommitInfo::parse_log_line).collect())
    }

    /// Committer date and subject of `hash`.
    pub async fn date_and_subject(
        &self,
        hash: &str,
    ) -> Result<(Option<DateTime<FixedOffset>>, String)> {
        let line = self.command(GitCommand::show_format("%ci|%s", hash)).execute_stdout().await?;
        let (date, subject) = line.split_once('|').unwrap_or((line.as_str(), ""));
        Ok((parse_git_date(date), subject.trim().to_string()))
    }

    /// Strict ISO 8601 committer date of `hash` (`%cI`).
    pub async fn commit_time(&self, hash: &str) -> Result<String> {
        self.command(GitCommand::show_format("%cI", hash)).execute_stdout().await
    }

    /// Stashes tracked and untracked changes under `label`.
    ///
    /// Returns whether a stash entry was created; `No local changes` output
    /// means git had nothing to save.
    pub async fn stash_push(&self, label: &str) -> Result<bool> {
        let output = self
            .command(GitCommand::stash_push(label))
            .execute()
            .await
            .context("Failed to stash local changes")?;
        Ok(!output.combined().contains("No local changes"))
    }

    /// Drops the most recent stash entry, logging instead of failing.
    pub async fn stash_drop_quiet(&self) {
        match self.command(GitCommand::stash_drop()).execute_allow_failure().await {
            Ok(out) if !out.success => {
                tracing::warn!(target: "git", "stash drop failed: {}", out.combined());
            }
            Err(e) => tracing::warn!(target: "git", "stash drop failed: {e:#}"),
            Ok(_) => {}
        }
    }

    /// `reset --hard <reference>` followed by `clean -fd`.
    pub async fn hard_reset_clean(&self, reference: &str) -> Result<()> {
        self.command(GitCommand::reset_hard(reference)).execute_success().await?;
        self.command(GitCommand::clean()).execute_success().await
    }

    /// A prebuilt command rooted at this repository.
    #[must_use]
    pub fn run(&self, cmd: GitCommand) -> GitCommand {
        self.command(cmd)
    }
}

fn parse_ahead_behind(counts: &str) -> Option<(u32, u32)> {
    let mut parts = counts.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next()?.parse().ok()?;
    Some((ahead, behind))
}

/// Checks whether `git --version` runs.
#[must_use]
pub fn is_git_installed() -> bool {
    std::process::Command::new(crate::utils::platform::get_git_command())
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Fails with [`UpdaterError::GitNotFound`] when git is unavailable.
pub fn ensure_git_available() -> Result<()> {
    if !is_git_installed() {
        return Err(UpdaterError::GitNotFound.into());
    }
    Ok(())
}

/// Whether `path` has a `.git` entry (directory, or file for worktrees).
#[must_use]
pub fn is_valid_git_repo(path: &Path) -> bool {
    path.join(".git").exists()
}

/// A merge (or stash pop) stopped on conflicting hunks.
#[must_use]
pub fn is_merge_conflict_output(output: &str) -> bool {
    output.contains("CONFLICT") || output.contains("Automatic merge failed")
}

/// A cherry-pick or revert stopped on conflicting hunks.
#[must_use]
pub fn is_conflict_output(output: &str) -> bool {
    output.contains("conflict") || output.contains("CONFLICT")
}

/// The commit is a merge and needs `-m` to be picked or reverted.
#[must_use]
pub fn is_merge_commit_output(output: &str) -> bool {
    output.contains("is a merge but no -m option was given")
}

/// The cherry-pick produced no change; its content is already present.
#[must_use]
pub fn is_empty_pick_output(output: &str) -> bool {
    output.contains("nothing to commit")
        || output.contains("empty commit")
        || output.contains("The previous cherry-pick is now empty")
}

/// The revert produced no change; the commit was already reverted.
#[must_use]
pub fn is_empty_revert_output(output: &str) -> bool {
    output.contains("nothing to commit")
        || output.contains("The previous cherry-pick is now empty")
        || output.contains("The previous cherry-pick is empty")
        || output.contains("nothing added to commit but untracked files present")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestGit;
    use tempfile::TempDir;

    #[test]
    fn test_parse_log_line() {
        let line = "0123456789abcdef0123456789abcdef01234567|2024-03-01 10:00:00 +0100|Fix a|b parsing";
        let info = CommitInfo::parse_log_line(line).unwrap();
        assert_eq!(info.hash, "0123456");
        assert_eq!(info.date.unwrap().to_rfc3339(), "2024-03-01T10:00:00+01:00");
        assert_eq!(info.message, "Fix a|b parsing");
        assert!(CommitInfo::parse_log_line("garbage").is_none());
    }

    #[test]
    fn test_parse_ahead_behind() {
        assert_eq!(parse_ahead_behind("0\t3"), Some((0, 3)));
        assert_eq!(parse_ahead_behind("2 5\n"), Some((2, 5)));
        assert_eq!(parse_ahead_behind(""), None);
    }

    #[test]
    fn test_output_classifiers() {
        assert!(is_conflict_output("CONFLICT (content): Merge conflict in a.txt"));
        assert!(is_merge_conflict_output("Automatic merge failed; fix conflicts and then commit"));
        assert!(!is_merge_conflict_output("Fast-forward"));
        assert!(is_conflict_output("error: could not apply 1234567... hint: after resolving the conflicts"));

        assert!(is_merge_commit_output(
            "error: commit abc is a merge but no -m option was given."
        ));
        assert!(is_empty_pick_output("The previous cherry-pick is now empty, possibly due to"));
        assert!(is_empty_revert_output(
            "nothing added to commit but untracked files present"
        ));
        assert!(!is_empty_revert_output("empty commit"));
    }

    #[tokio::test]
    async fn test_repo_queries() {
        let temp = TempDir::new().unwrap();
        let git = TestGit::new(temp.path());
        git.init().unwrap();
        git.config_user().unwrap();
        std::fs::write(temp.path().join("a.txt"), "one\n").unwrap();
        git.add_all().unwrap();
        git.commit("First commit").unwrap();

        let repo = GitRepo::new(temp.path());
        assert!(!repo.is_dirty().await.unwrap());
        std::fs::write(temp.path().join("b.txt"), "untracked\n").unwrap();
        assert!(repo.is_dirty().await.unwrap());

        let head = repo.rev_parse("HEAD").await.unwrap();
        assert_eq!(head.len(), 40);
        assert!(repo.commit_exists(&head).await.unwrap());
        assert!(!repo.commit_exists("0000000000000000000000000000000000000000").await.unwrap());
        assert!(repo.try_rev_parse("no-such-ref").await.unwrap().is_none());

        let (date, subject) = repo.date_and_subject(&head).await.unwrap();
        assert!(date.is_some());
        assert_eq!(subject, "First commit");

        let log = repo.log("HEAD", 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].hash, short_hash(&head));

        assert!(repo.remote_url("upstream").await.unwrap().is_none());
        repo.add_remote("upstream", "https://example.com/a.git").await.unwrap();
        assert_eq!(
            repo.remote_url("upstream").await.unwrap().as_deref(),
            Some("https://example.com/a.git")
        );
    }

    #[tokio::test]
    async fn test_stash_push_reports_no_changes() {
        let temp = TempDir::new().unwrap();
        let git = TestGit::new(temp.path());
        git.init().unwrap();
        git.config_user().unwrap();
        std::fs::write(temp.path().join("a.txt"), "one\n").unwrap();
        git.add_all().unwrap();
        git.commit("First").unwrap();

        let repo = GitRepo::new(temp.path());
        assert!(!repo.stash_push("label").await.unwrap());

        std::fs::write(temp.path().join("a.txt"), "two\n").unwrap();
        assert!(repo.stash_push("label").await.unwrap());
        assert!(!repo.is_dirty().await.unwrap());
    }
}
