//! Git test helper utilities
//!
//! Synchronous wrappers around the `git` binary for arranging repository
//! state in tests. Engine code under test uses the async
//! [`GitCommand`](crate::git::command_builder::GitCommand) instead.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::UpdaterConfig;

/// Git command runner for tests
///
/// Use this instead of raw `std::process::Command` so failures surface with
/// git's stderr attached.
pub struct TestGit {
    repo_path: PathBuf,
}

impl TestGit {
    fn run_git_command(&self, args: &[&str], action: &str) -> Result<std::process::Output> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .env("LC_ALL", "C")
            .output()
            .with_context(|| action.to_string())?;

        if !output.status.success() {
            bail!("{} failed: {}", action, String::from_utf8_lossy(&output.stderr));
        }

        Ok(output)
    }

    /// Create a new TestGit instance for the given repository path
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    /// Return the repository path
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Run arbitrary git arguments and return trimmed stdout
    pub fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.run_git_command(args, &format!("git {}", args.join(" ")))?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Initialize a repository whose first branch is `main`
    pub fn init(&self) -> Result<()> {
        self.run_git_command(&["init"], "Failed to initialize git repository")?;
        self.set_head("main")
    }

    /// Initialize a bare repository whose default branch is `main`
    pub fn init_bare(&self) -> Result<()> {
        self.run_git_command(&["init", "--bare"], "Failed to initialize bare git repository")?;
        self.set_head("main")
    }

    /// Configure git user for tests
    pub fn config_user(&self) -> Result<()> {
        self.run_git_command(
            &["config", "user.email", "test@reforge.example"],
            "Failed to configure git user email",
        )?;
        self.run_git_command(
            &["config", "user.name", "Test User"],
            "Failed to configure git user name",
        )?;
        self.run_git_command(
            &["config", "commit.gpgsign", "false"],
            "Failed to disable commit signing",
        )?;
        Ok(())
    }

    /// Add all files to staging
    pub fn add_all(&self) -> Result<()> {
        self.run_git_command(&["add", "-A"], "Failed to add files to git")?;
        Ok(())
    }

    /// Create a commit with the given message
    pub fn commit(&self, message: &str) -> Result<()> {
        self.run_git_command(&["commit", "-m", message], "Failed to create git commit")?;
        Ok(())
    }

    /// Write `content` to `file`, stage everything and commit. Returns the new HEAD.
    pub fn commit_file(&self, file: &str, content: &str, message: &str) -> Result<String> {
        let path = self.repo_path.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content).with_context(|| format!("Failed to write {file}"))?;
        self.add_all()?;
        self.commit(message)?;
        self.rev_parse_head()
    }

    /// Add a remote repository
    pub fn remote_add(&self, name: &str, url: &str) -> Result<()> {
        self.run_git_command(
            &["remote", "add", name, url],
            &format!("Failed to add remote: {name}"),
        )?;
        Ok(())
    }

    /// Push `refspec` to `remote`
    pub fn push(&self, remote: &str, refspec: &str) -> Result<()> {
        self.run_git_command(
            &["push", "--force", remote, refspec],
            &format!("Failed to push {refspec} to {remote}"),
        )?;
        Ok(())
    }

    /// Get current commit SHA
    pub fn rev_parse_head(&self) -> Result<String> {
        self.run(&["rev-parse", "HEAD"])
    }

    /// Checkout a branch or commit
    pub fn checkout(&self, ref_name: &str) -> Result<()> {
        self.run_git_command(&["checkout", ref_name], &format!("Failed to checkout: {ref_name}"))?;
        Ok(())
    }

    /// Create and checkout a branch
    pub fn create_branch(&self, branch_name: &str) -> Result<()> {
        self.run_git_command(
            &["checkout", "-b", branch_name],
            &format!("Failed to create branch: {branch_name}"),
        )?;
        Ok(())
    }

    /// Get porcelain status output
    pub fn status_porcelain(&self) -> Result<String> {
        let output =
            self.run_git_command(&["status", "--porcelain"], "Failed to get git status")?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Number of stash entries
    pub fn stash_count(&self) -> Result<usize> {
        Ok(self.run(&["stash", "list"])?.lines().filter(|l| !l.is_empty()).count())
    }

    /// Set HEAD to point to a branch (making it default branch)
    pub fn set_head(&self, branch_name: &str) -> Result<()> {
        self.run_git_command(
            &["symbolic-ref", "HEAD", &format!("refs/heads/{branch_name}")],
            &format!("Failed to set HEAD to branch: {branch_name}"),
        )?;
        Ok(())
    }
}

/// A bare upstream, an authoring clone that publishes to it, and the
/// service's own source checkout.
///
/// ```text
/// <root>/upstream.git   bare, default branch main
/// <root>/author         pushes commits and pull/<n>/head refs
/// <root>/local          clone of upstream.git; the engine's repo_dir
/// ```
pub struct UpstreamFixture {
    root: PathBuf,
    upstream: PathBuf,
    author: TestGit,
    local: TestGit,
}

impl UpstreamFixture {
    /// Builds the three repositories with one shared initial commit.
    pub fn new(root: &Path) -> Result<Self> {
        let upstream = root.join("upstream.git");
        std::fs::create_dir_all(&upstream)?;
        TestGit::new(&upstream).init_bare()?;

        let author_dir = root.join("author");
        std::fs::create_dir_all(&author_dir)?;
        let author = TestGit::new(&author_dir);
        author.init()?;
        author.config_user()?;
        author.commit_file("README.md", "# service\n", "Initial commit")?;
        author.remote_add("origin", &upstream.display().to_string())?;
        author.push("origin", "main")?;

        let local_dir = root.join("local");
        let output = Command::new("git")
            .args(["clone", &upstream.display().to_string(), &local_dir.display().to_string()])
            .output()
            .context("Failed to clone fixture upstream")?;
        if !output.status.success() {
            bail!("clone failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        let local = TestGit::new(&local_dir);
        local.config_user()?;

        Ok(Self {
            root: root.to_path_buf(),
            upstream,
            author,
            local,
        })
    }

    /// Fixture root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the bare upstream repository
    pub fn upstream_path(&self) -> &Path {
        &self.upstream
    }

    /// The authoring clone
    pub fn author(&self) -> &TestGit {
        &self.author
    }

    /// The service's source checkout
    pub fn local(&self) -> &TestGit {
        &self.local
    }

    /// Engine configuration pointing `upstream` at the bare repository.
    pub fn config(&self) -> UpdaterConfig {
        let mut config = UpdaterConfig::default();
        config.upstream.url = self.upstream.display().to_string();
        config.upstream.url_match = Some("upstream.git".to_string());
        config
    }

    /// Commits one file on upstream `main`. Returns the commit hash.
    pub fn publish(&self, file: &str, content: &str, message: &str) -> Result<String> {
        let hash = self.author.commit_file(file, content, message)?;
        self.author.push("origin", "main")?;
        Ok(hash)
    }

    /// Publishes commits branching from upstream `main` as `refs/pull/<n>/head`,
    /// leaving `main` untouched. Returns the commit hashes in order.
    pub fn publish_pr(&self, number: u64, changes: &[(&str, &str, &str)]) -> Result<Vec<String>> {
        let branch = format!("pr-{number}");
        self.author.checkout("main")?;
        self.author.create_branch(&branch)?;

        let mut hashes = Vec::with_capacity(changes.len());
        for (file, content, message) in changes {
            hashes.push(self.author.commit_file(file, content, message)?);
        }
        self.author.push("origin", &format!("{branch}:refs/pull/{number}/head"))?;
        self.author.checkout("main")?;
        Ok(hashes)
    }
}
