//! Patch engine: upstream updates, PR cherry-picks and PR reverts
//!
//! All three flows run against the source checkout resolved by
//! [`RepositoryContext`] and talk to the `upstream` remote that
//! [`ensure_upstream_remote`] maintains.
//!
//! | Flow | Module | Conflict policy |
//! |------|--------|-----------------|
//! | fetch + merge | [`update`] | upstream wins, local edits are discarded |
//! | cherry-pick | [`cherry_pick`] | abort, report hashes, ledger untouched |
//! | revert | [`revert`] | abort, `Conflict` error, ledger untouched |

pub mod cherry_pick;
pub mod revert;
pub mod update;

pub use cherry_pick::{BatchError, CherryPickResult, cherry_pick_multiple_prs, cherry_pick_pr};
pub use revert::{PartialRevert, RevertResult, revert_pr};
pub use update::{UpdateCheckResult, UpdateOutcome, check_for_updates, perform_update};

use anyhow::{Context, Result};

use crate::config::UpdaterConfig;
use crate::core::UpdaterError;
use crate::git::{self, CommitInfo, GitRepo};
use crate::repo::RepositoryContext;

const DEFAULT_COMMIT_LIMIT: usize = 10;
const MAX_COMMIT_LIMIT: usize = 50;

/// Makes sure the configured upstream remote exists and points at the
/// configured repository. Safe to call repeatedly.
pub async fn ensure_upstream_remote(repo: &GitRepo, config: &UpdaterConfig) -> Result<()> {
    let remote = &config.upstream.remote;
    match repo.remote_url(remote).await? {
        None => {
            tracing::info!("Adding {} remote {}", remote, config.upstream.url);
            repo.add_remote(remote, &config.upstream.url)
                .await
                .with_context(|| format!("Failed to add {remote} remote"))
        }
        Some(url) if !url.contains(&config.upstream_match()) => {
            tracing::info!("Repointing {} remote from {} to {}", remote, url, config.upstream.url);
            repo.set_remote_url(remote, &config.upstream.url)
                .await
                .with_context(|| format!("Failed to update {remote} remote URL"))
        }
        Some(_) => Ok(()),
    }
}

/// Most recent commits reachable from `HEAD`. A `limit` outside 1..=50 becomes 10.
pub async fn current_commits(ctx: &RepositoryContext, limit: usize) -> Result<Vec<CommitInfo>> {
    git::ensure_git_available()?;
    let limit = if (1..=MAX_COMMIT_LIMIT).contains(&limit) { limit } else { DEFAULT_COMMIT_LIMIT };
    GitRepo::new(&ctx.repo_dir).log("HEAD", limit).await
}

/// Rejects non-positive PR numbers before anything is touched.
pub(crate) fn validate_pr_number(number: i64) -> Result<u64> {
    u64::try_from(number)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| UpdaterError::InvalidPrNumber {
            number,
        }
        .into())
}

/// First line of a commit message, cut to 60 characters.
pub(crate) fn summary_line(message: &str) -> String {
    let first = message.lines().next().unwrap_or_default();
    if first.chars().count() > 60 {
        let cut: String = first.chars().take(60).collect();
        format!("{cut}...")
    } else {
        first.to_string()
    }
}
