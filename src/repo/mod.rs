//! Locating and provisioning the service's source repository
//!
//! The engine needs a git checkout of the service to update, patch and build.
//! [`RepositoryContext::resolve`] finds one in this order:
//!
//! 1. the working directory or any parent containing `.git`
//! 2. `<work_dir>/<source_dir_name>` containing `.git`
//! 3. a fresh clone of the configured upstream into that directory
//!
//! Step 3 only runs when the directory is absent or empty, and a failed clone
//! never leaves a partial checkout behind.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::UpdaterConfig;
use crate::core::UpdaterError;
use crate::git::{self, GitRepo};

/// Where the engine operates for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryContext {
    /// Root of the source checkout
    pub repo_dir: PathBuf,
    /// Directory containing the running executable
    pub install_dir: PathBuf,
    /// Process working directory at resolution time
    pub work_dir: PathBuf,
}

impl RepositoryContext {
    /// Resolves the context from the process working directory, cloning when
    /// no checkout exists.
    pub async fn resolve(config: &UpdaterConfig) -> Result<Self> {
        let work_dir = current_work_dir()?;
        Self::resolve_in(config, &work_dir, &install_dir()).await
    }

    /// Like [`resolve`](Self::resolve) with explicit directories.
    ///
    /// # Errors
    ///
    /// - [`UpdaterError::NotInstalled`] when the managed directory exists and
    ///   is not an empty directory, or when a clone is needed and git is missing
    /// - the clone failure, after removing whatever the clone created
    pub async fn resolve_in(
        config: &UpdaterConfig,
        work_dir: &Path,
        install_dir: &Path,
    ) -> Result<Self> {
        let context = |repo_dir: PathBuf| Self {
            repo_dir,
            install_dir: install_dir.to_path_buf(),
            work_dir: work_dir.to_path_buf(),
        };

        if let Some(repo_dir) = locate_existing_in(config, work_dir) {
            tracing::debug!("Using source repository at {}", repo_dir.display());
            return Ok(context(repo_dir));
        }

        let repo_dir = work_dir.join(&config.paths.source_dir_name);
        let existed = ensure_clone_dir_available(&repo_dir)?;
        require_git_for_clone(git::is_git_installed())?;

        tracing::info!("Cloning {} into {}", config.clone_url(), repo_dir.display());
        if let Err(e) = GitRepo::clone(config.clone_url(), &repo_dir).await {
            discard_partial_clone(&repo_dir, existed);
            return Err(e).context("Failed to clone upstream repository");
        }

        Ok(context(repo_dir))
    }
}

fn require_git_for_clone(installed: bool) -> Result<()> {
    if installed {
        return Ok(());
    }
    Err(UpdaterError::NotInstalled {
        reason: "git is not installed, so the source repository cannot be cloned".to_string(),
    }
    .into())
}

/// Finds an existing checkout from the process working directory without
/// ever cloning.
pub fn locate_existing(config: &UpdaterConfig) -> Result<Option<PathBuf>> {
    let work_dir = current_work_dir()?;
    Ok(locate_existing_in(config, &work_dir))
}

/// Steps 1 and 2 of the lookup, rooted at `work_dir`.
#[must_use]
pub fn locate_existing_in(config: &UpdaterConfig, work_dir: &Path) -> Option<PathBuf> {
    if let Some(root) = find_git_root(work_dir) {
        return Some(root);
    }
    let managed = work_dir.join(&config.paths.source_dir_name);
    git::is_valid_git_repo(&managed).then_some(managed)
}

/// Walks from `start` up through its parents looking for a `.git` entry.
#[must_use]
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    start.ancestors().find(|dir| git::is_valid_git_repo(dir)).map(Path::to_path_buf)
}

/// Directory containing the running executable, else the working directory.
#[must_use]
pub fn install_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn current_work_dir() -> Result<PathBuf> {
    std::env::current_dir().context("Failed to get current working directory")
}

/// Returns whether the directory already existed (empty).
fn ensure_clone_dir_available(dir: &Path) -> Result<bool> {
    let metadata = match std::fs::metadata(dir) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to access {}", dir.display()));
        }
    };

    if !metadata.is_dir() {
        return Err(UpdaterError::NotInstalled {
            reason: format!("source path exists and is not a directory: {}", dir.display()),
        }
        .into());
    }

    let mut entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    if entries.next().is_some() {
        return Err(UpdaterError::NotInstalled {
            reason: format!("source directory is not empty: {}", dir.display()),
        }
        .into());
    }

    Ok(true)
}

fn discard_partial_clone(dir: &Path, existed: bool) {
    if let Err(e) = crate::utils::fs::remove_dir_all(dir) {
        tracing::warn!("Failed to remove partial clone at {}: {e:#}", dir.display());
        return;
    }
    if existed {
        let _ = std::fs::create_dir_all(dir);
    }
}
