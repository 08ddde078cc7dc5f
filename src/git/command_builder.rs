//! Type-safe Git command builder for consistent command execution
//!
//! Every `git` invocation made by the engine goes through [`GitCommand`], so
//! logging, error mapping and output capture behave the same for a one-line
//! `rev-parse` and for a conflicting `merge`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::UpdaterError;
use crate::utils::platform::get_git_command;

/// Builder for constructing and executing Git commands.
///
/// Local repository commands run without a timeout by default: a hung `git`
/// blocks the calling operation. Call [`with_timeout`](Self::with_timeout) for
/// anything that should be bounded.
///
/// Two execution styles are offered:
///
/// - [`execute`](Self::execute) treats a non-zero exit as an error
///   ([`UpdaterError::GitCommandError`]).
/// - [`execute_allow_failure`](Self::execute_allow_failure) always returns the
///   captured output, for commands whose failure output must be inspected
///   (merge, cherry-pick, revert, stash).
///
/// # Examples
///
/// ```rust,ignore
/// use reforge::git::command_builder::GitCommand;
///
/// # async fn example(repo: &std::path::Path) -> anyhow::Result<()> {
/// let status = GitCommand::status_porcelain().current_dir(repo).execute_stdout().await?;
///
/// let merge = GitCommand::merge("upstream/main")
///     .current_dir(repo)
///     .execute_allow_failure()
///     .await?;
/// if !merge.success {
///     println!("merge failed: {}", merge.combined());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct GitCommand {
    /// Command arguments passed to Git
    args: Vec<String>,

    /// Working directory, passed with `-C`
    current_dir: Option<PathBuf>,

    /// Environment variables set for the Git process
    env_vars: Vec<(String, String)>,

    /// Maximum duration to wait for completion (None = no timeout)
    timeout_duration: Option<Duration>,

    /// Optional context string included in log lines
    context: Option<String>,
}

impl Default for GitCommand {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            current_dir: None,
            env_vars: Vec::new(),
            timeout_duration: None,
            context: None,
        }
    }
}

impl GitCommand {
    /// Creates a new Git command builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the working directory for Git command execution.
    ///
    /// The directory is passed with `-C`, so the command does not depend on
    /// the process working directory.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Adds a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable for this invocation only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Set a timeout for the command (None for no timeout)
    pub const fn with_timeout(mut self, duration: Option<Duration>) -> Self {
        self.timeout_duration = duration;
        self
    }

    /// Set a context for logging (e.g. "PR #42")
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn full_args(&self) -> Vec<String> {
        let mut full_args = Vec::with_capacity(self.args.len() + 2);
        if let Some(ref dir) = self.current_dir {
            full_args.push("-C".to_string());
            full_args.push(dir.display().to_string());
        }
        full_args.extend(self.args.iter().cloned());
        full_args
    }

    /// The git subcommand, skipping a leading `-C <dir>`.
    fn operation(&self) -> String {
        self.args.first().cloned().unwrap_or_else(|| "unknown".to_string())
    }

    /// Execute the command and return its output regardless of exit status.
    ///
    /// Fails only when `git` cannot be spawned or the timeout elapses.
    pub async fn execute_allow_failure(self) -> Result<GitCommandOutput> {
        let start = std::time::Instant::now();
        let git_command = get_git_command();
        let full_args = self.full_args();

        let mut cmd = Command::new(git_command);
        cmd.args(&full_args);
        // Keep tool messages parseable regardless of the user's locale.
        cmd.env("LC_ALL", "C");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        for (key, value) in &self.env_vars {
            tracing::trace!(target: "git", "Setting env var: {}={}", key, value);
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        match self.context {
            Some(ref ctx) => tracing::debug!(
                target: "git",
                "({}) Executing command: {} {}",
                ctx,
                git_command,
                full_args.join(" ")
            ),
            None => tracing::debug!(
                target: "git",
                "Executing command: {} {}",
                git_command,
                full_args.join(" ")
            ),
        }

        let output_future = cmd.output();
        let spawned = if let Some(duration) = self.timeout_duration {
            if let Ok(result) = timeout(duration, output_future).await {
                result
            } else {
                tracing::warn!(
                    target: "git",
                    "Command timed out after {} seconds: git {}",
                    duration.as_secs(),
                    full_args.join(" ")
                );
                return Err(UpdaterError::GitCommandError {
                    operation: self.operation(),
                    stderr: format!(
                        "Git command timed out after {} seconds: git {}",
                        duration.as_secs(),
                        full_args.join(" ")
                    ),
                }
                .into());
            }
        } else {
            output_future.await
        };

        let output = match spawned {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UpdaterError::GitNotFound.into());
            }
            Err(e) => {
                return Err(e).context(format!("Failed to execute git {}", full_args.join(" ")));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let success = output.status.success();

        if !success {
            tracing::debug!(
                target: "git",
                "Command failed with exit code: {:?}",
                output.status.code()
            );
        }
        if !stdout.is_empty() {
            tracing::debug!(target: "git", "{}", stdout.trim());
        }
        if !stderr.is_empty() {
            tracing::debug!(target: "git", "{}", stderr.trim());
        }

        let elapsed = start.elapsed();
        if elapsed.as_secs() > 1 {
            tracing::info!(
                target: "git::perf",
                "Git {} took {:.2}s",
                self.operation(),
                elapsed.as_secs_f64()
            );
        } else if elapsed.as_millis() > 100 {
            tracing::debug!(
                target: "git::perf",
                "Git {} took {}ms",
                self.operation(),
                elapsed.as_millis()
            );
        }

        Ok(GitCommandOutput {
            stdout,
            stderr,
            success,
        })
    }

    /// Execute the command, treating a non-zero exit as an error.
    pub async fn execute(self) -> Result<GitCommandOutput> {
        let operation = self.operation();
        let output = self.execute_allow_failure().await?;
        if !output.success {
            return Err(UpdaterError::GitCommandError {
                operation,
                stderr: if output.stderr.trim().is_empty() {
                    output.stdout
                } else {
                    output.stderr
                },
            }
            .into());
        }
        Ok(output)
    }

    /// Execute the command and return only stdout as a trimmed string
    pub async fn execute_stdout(self) -> Result<String> {
        let output = self.execute().await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Execute the command and check for success
    pub async fn execute_success(self) -> Result<()> {
        self.execute().await?;
        Ok(())
    }

    /// Execute the command and report only whether it exited successfully.
    pub async fn succeeds(self) -> Result<bool> {
        Ok(self.execute_allow_failure().await?.success)
    }
}

/// Output from a Git command
#[derive(Debug, Clone, Default)]
pub struct GitCommandOutput {
    /// Standard output from the Git command
    pub stdout: String,
    /// Standard error output from the Git command
    pub stderr: String,
    /// Whether the command exited with status zero
    pub success: bool,
}

impl GitCommandOutput {
    /// Stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, _) => self.stderr.trim_end().to_string(),
        }
    }
}

// Convenience builders for the subcommands the engine relies on

impl GitCommand {
    /// `git --version`
    pub fn version() -> Self {
        Self::new().arg("--version")
    }

    /// `git clone <url> <target>`
    pub fn clone(url: &str, target: impl AsRef<Path>) -> Self {
        Self::new().args(["clone".to_string(), url.to_string(), target.as_ref().display().to_string()])
    }

    /// `git remote get-url <remote>`
    pub fn remote_get_url(remote: &str) -> Self {
        Self::new().args(["remote", "get-url", remote])
    }

    /// `git remote add <remote> <url>`
    pub fn remote_add(remote: &str, url: &str) -> Self {
        Self::new().args(["remote", "add", remote, url])
    }

    /// `git remote set-url <remote> <url>`
    pub fn remote_set_url(remote: &str, url: &str) -> Self {
        Self::new().args(["remote", "set-url", remote, url])
    }

    /// `git fetch <remote> [<ref>]`
    pub fn fetch(remote: &str, reference: Option<&str>) -> Self {
        let cmd = Self::new().args(["fetch", remote]);
        match reference {
            Some(r) => cmd.arg(r),
            None => cmd,
        }
    }

    /// `git rev-list --left-right --count <left>...<right>`
    pub fn rev_list_left_right(left: &str, right: &str) -> Self {
        Self::new().args(["rev-list", "--left-right", "--count"]).arg(format!("{left}...{right}"))
    }

    /// `git log --pretty=format:%H|%ci|%s <range> -n <limit>`
    pub fn log_pretty(range: &str, limit: usize) -> Self {
        Self::new()
            .args(["log", "--pretty=format:%H|%ci|%s", range, "-n"])
            .arg(limit.to_string())
    }

    /// `git status --porcelain`
    pub fn status_porcelain() -> Self {
        Self::new().args(["status", "--porcelain"])
    }

    /// `git stash push -u -m <label>`
    pub fn stash_push(label: &str) -> Self {
        Self::new().args(["stash", "push", "-u", "-m", label])
    }

    /// `git stash pop`
    pub fn stash_pop() -> Self {
        Self::new().args(["stash", "pop"])
    }

    /// `git stash drop`
    pub fn stash_drop() -> Self {
        Self::new().args(["stash", "drop"])
    }

    /// `git merge --no-edit <ref>`
    pub fn merge(reference: &str) -> Self {
        Self::new().args(["merge", "--no-edit", reference])
    }

    /// `git merge --abort`
    pub fn merge_abort() -> Self {
        Self::new().args(["merge", "--abort"])
    }

    /// `git reset --hard <ref>`
    pub fn reset_hard(reference: &str) -> Self {
        Self::new().args(["reset", "--hard", reference])
    }

    /// `git clean -fd`
    pub fn clean() -> Self {
        Self::new().args(["clean", "-fd"])
    }

    /// `git rev-parse <ref>`
    pub fn rev_parse(reference: &str) -> Self {
        Self::new().args(["rev-parse", reference])
    }

    /// `git rev-parse --abbrev-ref HEAD`
    pub fn current_branch() -> Self {
        Self::new().args(["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// `git cat-file -e <ref>^{commit}`
    pub fn commit_exists(reference: &str) -> Self {
        Self::new().args(["cat-file", "-e"]).arg(format!("{reference}^{{commit}}"))
    }

    /// `git cherry-pick <sha>`
    pub fn cherry_pick(sha: &str) -> Self {
        Self::new().args(["cherry-pick", sha])
    }

    /// `git cherry-pick --skip`
    pub fn cherry_pick_skip() -> Self {
        Self::new().args(["cherry-pick", "--skip"])
    }

    /// `git cherry-pick --abort`
    pub fn cherry_pick_abort() -> Self {
        Self::new().args(["cherry-pick", "--abort"])
    }

    /// `git revert --no-edit <sha>`
    pub fn revert(sha: &str) -> Self {
        Self::new().args(["revert", "--no-edit", sha])
    }

    /// `git revert --skip`
    pub fn revert_skip() -> Self {
        Self::new().args(["revert", "--skip"])
    }

    /// `git revert --abort`
    pub fn revert_abort() -> Self {
        Self::new().args(["revert", "--abort"])
    }

    /// `git show -s --format=<format> <sha>`
    pub fn show_format(format: &str, sha: &str) -> Self {
        Self::new().args(["show", "-s"]).arg(format!("--format={format}")).arg(sha)
    }

    /// `git ls-files -u`
    pub fn unmerged_files() -> Self {
        Self::new().args(["ls-files", "-u"])
    }
}
