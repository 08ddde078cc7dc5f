//! Upstream update checks and fetch/merge updates

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::UpdaterConfig;
use crate::constants::{UPDATE_CHECK_LOG_LIMIT, UPDATE_STASH_LABEL};
use crate::core::UpdaterError;
use crate::git::command_builder::GitCommand;
use crate::git::{self, CommitInfo, GitRepo};
use crate::patch::ensure_upstream_remote;
use crate::repo::RepositoryContext;
use crate::status::ProgressSink;
use crate::version::{self, VersionInfo};

/// How the checkout relates to upstream mainline. Nothing is modified to
/// compute it beyond fetching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckResult {
    /// `commits_behind > 0`
    pub has_updates: bool,
    /// Local commits not upstream
    pub commits_ahead: u32,
    /// Upstream commits not local
    pub commits_behind: u32,
    /// Up to 10 of the local-only commits
    pub ahead_commits: Vec<CommitInfo>,
    /// Up to 10 of the upstream-only commits, only when behind
    pub new_commits: Vec<CommitInfo>,
    pub current_version: Option<VersionInfo>,
}

/// What [`perform_update`] did with local edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    /// The tree was dirty and got stashed before merging
    pub stashed: bool,
    /// Conflicts forced the local edits to be thrown away
    pub local_changes_discarded: bool,
}

/// Resolves the checkout and compares it with upstream mainline.
pub async fn check_for_updates(config: &UpdaterConfig) -> Result<UpdateCheckResult> {
    git::ensure_git_available()?;
    let ctx = RepositoryContext::resolve(config).await?;
    check_for_updates_in(&ctx, config, version::embedded_version()).await
}

/// Compares `ctx` with upstream. `embedded` is the identity baked into the
/// running binary; when its commit exists locally it is the comparison base
/// instead of `HEAD`.
pub async fn check_for_updates_in(
    ctx: &RepositoryContext,
    config: &UpdaterConfig,
    embedded: Option<VersionInfo>,
) -> Result<UpdateCheckResult> {
    let repo = GitRepo::new(&ctx.repo_dir);

    let current_version = match embedded {
        Some(v) => Some(v),
        None => version::repository_version(&ctx.repo_dir)
            .await
            .context("Failed to get current version")?,
    };

    ensure_upstream_remote(&repo, config).await?;
    repo.fetch(&config.upstream.remote, Some(&config.upstream.mainline)).await?;

    let upstream_ref = config.upstream_ref();
    let base = comparison_base(&repo, current_version.as_ref()).await?;
    let (commits_ahead, commits_behind) = repo
        .ahead_behind(&base, &upstream_ref)
        .await
        .context("Failed to compare with upstream")?;

    let mut result = UpdateCheckResult {
        has_updates: commits_behind > 0,
        commits_ahead,
        commits_behind,
        ahead_commits: Vec::new(),
        new_commits: Vec::new(),
        current_version,
    };

    if commits_ahead > 0 {
        match repo.log(&format!("{upstream_ref}..{base}"), UPDATE_CHECK_LOG_LIMIT).await {
            Ok(commits) => result.ahead_commits = commits,
            Err(e) => warn!("Failed to list local-only commits: {e:#}"),
        }
    }

    if result.has_updates {
        match repo.log(&format!("{base}..{upstream_ref}"), UPDATE_CHECK_LOG_LIMIT).await {
            Ok(commits) => result.new_commits = commits,
            Err(e) => warn!("Failed to list upstream commits: {e:#}"),
        }
    }

    Ok(result)
}

async fn comparison_base(repo: &GitRepo, current: Option<&VersionInfo>) -> Result<String> {
    let Some(full_hash) = current.map(VersionInfo::full_hash).filter(|h| !h.is_empty()) else {
        return Ok("HEAD".to_string());
    };
    if repo.commit_exists(full_hash).await? {
        Ok(full_hash.to_string())
    } else {
        debug!("Build commit {} not in repository; comparing from HEAD", full_hash);
        Ok("HEAD".to_string())
    }
}

/// Fetches upstream mainline and merges it into the current branch.
///
/// A dirty tree is stashed first and restored after a clean merge. When the
/// merge conflicts, upstream wins: the merge is aborted, the checkout is hard
/// reset to upstream, untracked files are removed and the stash is dropped.
/// When restoring the stash conflicts, the merge is kept and the stash is
/// dropped the same way.
///
/// # Errors
///
/// - [`UpdaterError::GitNotFound`] when git is unavailable
/// - [`UpdaterError::DetachedHead`] when `HEAD` is not a branch
/// - [`UpdaterError::GitCommandError`] for a non-conflict merge or pop failure
pub async fn perform_update(
    ctx: &RepositoryContext,
    config: &UpdaterConfig,
    progress: &dyn ProgressSink,
) -> Result<UpdateOutcome> {
    let repo = GitRepo::new(&ctx.repo_dir);
    let upstream_ref = config.upstream_ref();

    progress.step(10, "Checking Git installation...");
    git::ensure_git_available()?;
    ensure_upstream_remote(&repo, config).await?;

    progress.step(20, "Verifying current branch...");
    let branch = repo.current_branch().await.context("Failed to determine current branch")?;
    if branch.is_empty() || branch == "HEAD" {
        return Err(UpdaterError::DetachedHead.into());
    }
    if branch != config.upstream.mainline {
        progress.log(&format!("Current branch is {branch:?}; updating against {upstream_ref}..."));
    }

    progress.step(30, "Checking local changes...");
    let dirty = repo.is_dirty().await.context("Failed to check working tree")?;

    let mut outcome = UpdateOutcome {
        stashed: false,
        local_changes_discarded: false,
    };
    if dirty {
        progress.step(35, "Stashing local changes...");
        outcome.stashed = repo.stash_push(UPDATE_STASH_LABEL).await?;
    }

    progress.step(45, &format!("Fetching latest changes from {upstream_ref}..."));
    repo.fetch(&config.upstream.remote, Some(&config.upstream.mainline)).await?;

    progress.step(60, &format!("Merging {upstream_ref}..."));
    let merge = repo.run(GitCommand::merge(&upstream_ref)).execute_allow_failure().await?;
    if !merge.success {
        let output = merge.combined();
        if git::is_merge_conflict_output(&output) || repo.has_unmerged_paths().await? {
            progress.step(
                70,
                "Merge conflict detected; discarding local changes and keeping upstream updates...",
            );
            let _ = repo.run(GitCommand::merge_abort()).execute_allow_failure().await;
            repo.hard_reset_clean(&upstream_ref)
                .await
                .context("Failed to reset to upstream after merge conflict")?;
            if outcome.stashed {
                repo.stash_drop_quiet().await;
            }
            outcome.local_changes_discarded = true;
            progress.step(90, "Git update completed (local changes discarded due to conflicts)");
            return Ok(outcome);
        }

        return Err(UpdaterError::GitCommandError {
            operation: "merge".to_string(),
            stderr: output,
        }
        .into());
    }

    if outcome.stashed {
        progress.step(80, "Restoring local changes...");
        let pop = repo.run(GitCommand::stash_pop()).execute_allow_failure().await?;
        if !pop.success {
            let output = pop.combined();
            if git::is_merge_conflict_output(&output) || repo.has_unmerged_paths().await? {
                progress.log(
                    "Conflicts restoring local changes; discarding them and keeping upstream updates...",
                );
                if let Err(e) = repo.hard_reset_clean("HEAD").await {
                    warn!("Cleanup after stash conflict failed: {e:#}");
                }
                repo.stash_drop_quiet().await;
                outcome.local_changes_discarded = true;
                progress.step(90, "Git update completed (local changes discarded due to conflicts)");
                return Ok(outcome);
            }

            let kept = format!(
                "Local changes could not be restored and are kept in stash@{{0}} ({UPDATE_STASH_LABEL}); \
                 resolve the clash and run `git stash pop`"
            );
            progress.log(&kept);
            return Err(anyhow::Error::from(UpdaterError::GitCommandError {
                operation: "stash".to_string(),
                stderr: output,
            })
            .context(kept));
        }
    }

    progress.step(90, "Git update completed successfully");
    Ok(outcome)
}
