//! Undoing a previously applied pull request

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::config::UpdaterConfig;
use crate::constants::REVERT_STASH_LABEL;
use crate::core::{ErrorKind, UpdaterError};
use crate::git::command_builder::GitCommand;
use crate::git::{self, GitRepo, short_hash};
use crate::ledger::Ledger;
use crate::patch::validate_pr_number;
use crate::repo::RepositoryContext;
use crate::status::ProgressSink;

/// Outcome of reverting one PR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevertResult {
    pub pr_number: u64,
    pub success: bool,
    pub error: Option<String>,
    /// Short hashes of the local commits that were reverted
    pub reverted: Vec<String>,
    pub conflicted: Vec<String>,
    pub failure: Option<ErrorKind>,
}

/// Reverts the commits the ledger recorded for PR `number`, newest first.
///
/// Local edits are stashed for the duration and restored afterwards on every
/// path, including failures. On success the ledger entry is deleted; on any
/// failure it is left untouched.
///
/// # Errors
///
/// - [`UpdaterError::InvalidPrNumber`] for `number <= 0`
/// - [`UpdaterError::NoAppliedCommits`] when the ledger has nothing for the PR
/// - [`UpdaterError::Conflict`] with the conflicting hash; the revert is aborted.
///   Commits reverted before it are reported through a [`PartialRevert`]
///   context on the error.
/// - [`UpdaterError::GitCommandError`] for other revert failures
///
/// A failure to restore the stash is attached to the returned error, or is the
/// error when the revert itself succeeded.
pub async fn revert_pr(
    ctx: &RepositoryContext,
    config: &UpdaterConfig,
    number: i64,
    progress: &dyn ProgressSink,
) -> Result<RevertResult> {
    let number = validate_pr_number(number)?;
    git::ensure_git_available()?;

    let ledger = Ledger::new(config.ledger_path(&ctx.install_dir));
    let commits = ledger
        .get(number)?
        .map(|record| record.commits)
        .filter(|commits| !commits.is_empty())
        .ok_or(UpdaterError::NoAppliedCommits {
            number,
        })?;

    let repo = GitRepo::new(&ctx.repo_dir);
    progress.step(10, &format!("Reverting PR #{number} ({} commit(s))...", commits.len()));

    let stashed = if repo.is_dirty().await? {
        progress.log("Stashing local changes...");
        repo.stash_push(REVERT_STASH_LABEL).await?
    } else {
        false
    };

    let outcome = revert_commits(&repo, number, &commits, progress).await;
    let restored = if stashed {
        restore_stash(&repo, progress).await
    } else {
        Ok(())
    };

    let result = match (outcome, restored) {
        (Ok(result), Ok(())) => result,
        (Ok(_), Err(pop)) => return Err(pop),
        (Err(e), Ok(())) => return Err(e),
        (Err(e), Err(pop)) => {
            return Err(e.context(format!("Also failed to restore local changes: {pop:#}")));
        }
    };

    ledger
        .remove(number)
        .with_context(|| format!("Reverted PR #{number} but failed to update the ledger"))?;
    progress.step(95, &format!("PR #{number} reverted ({} commit(s))", result.reverted.len()));
    Ok(result)
}

async fn revert_commits(
    repo: &GitRepo,
    number: u64,
    commits: &[String],
    progress: &dyn ProgressSink,
) -> Result<RevertResult> {
    let mut result = RevertResult {
        pr_number: number,
        ..RevertResult::default()
    };
    let total = commits.len();

    for (index, sha) in commits.iter().rev().enumerate() {
        let short = short_hash(sha);
        progress.step(
            20 + (index * 70 / total) as u8,
            &format!("Reverting {}/{}: {}", index + 1, total, short),
        );

        let output = repo.run(GitCommand::revert(sha)).execute_allow_failure().await?;
        if output.success {
            result.reverted.push(short);
            continue;
        }

        let text = output.combined();
        if git::is_merge_commit_output(&text) {
            abort_revert(repo).await;
            progress.log(&format!("Skipping merge commit {short}; it cannot be reverted without a parent"));
            continue;
        }
        if git::is_empty_revert_output(&text) {
            let skip = repo.run(GitCommand::revert_skip()).execute_allow_failure().await?;
            if !skip.success {
                abort_revert(repo).await;
            }
            progress.log(&format!("Skipping {short}: already reverted"));
            continue;
        }

        abort_revert(repo).await;
        if git::is_conflict_output(&text) {
            progress.log(&format!("Conflict reverting {short}; revert aborted"));
            result.conflicted.push(short.clone());
            result.failure = Some(ErrorKind::Conflict);
            result.error = Some(format!("Conflict reverting {short}"));
            let error = UpdaterError::Conflict {
                operation: "revert".to_string(),
                hashes: vec![short],
            };
            return Err(stopped(error.into(), result));
        }
        result.failure = Some(ErrorKind::Tool);
        result.error = Some(format!("Failed to revert {short}"));
        let error = anyhow::Error::from(UpdaterError::GitCommandError {
            operation: "revert".to_string(),
            stderr: text,
        })
        .context(format!("Failed to revert {short}"));
        return Err(stopped(error, result));
    }

    result.success = true;
    Ok(result)
}

/// Commits reverted before a revert stopped. They stay on the branch and the
/// ledger entry is kept, so the PR can be reverted again after resolving.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "Reverted {} commit(s) of PR #{} before stopping; they remain on the branch",
    result.reverted.len(),
    result.pr_number
)]
pub struct PartialRevert {
    pub result: RevertResult,
}

/// Attaches the partial result when some commits were already reverted.
fn stopped(error: anyhow::Error, result: RevertResult) -> anyhow::Error {
    if result.reverted.is_empty() {
        error
    } else {
        error.context(PartialRevert {
            result,
        })
    }
}

async fn abort_revert(repo: &GitRepo) {
    if let Err(e) = repo.run(GitCommand::revert_abort()).execute_allow_failure().await {
        warn!("revert --abort failed: {e:#}");
    }
}

async fn restore_stash(repo: &GitRepo, progress: &dyn ProgressSink) -> Result<()> {
    progress.log("Restoring local changes...");
    let output = repo.run(GitCommand::stash_pop()).execute_allow_failure().await?;
    if output.success {
        return Ok(());
    }
    Err(UpdaterError::GitCommandError {
        operation: "stash".to_string(),
        stderr: output.combined(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_kind;
    use crate::patch::cherry_pick::cherry_pick_pr;
    use crate::patch::cherry_pick::tests::{StubSource, context};
    use crate::test_utils::UpstreamFixture;
    use tempfile::TempDir;

    fn quiet() -> impl Fn(&str) + Send + Sync {
        |_: &str| {}
    }

    #[tokio::test]
    async fn test_apply_then_revert_restores_content() {
        let temp = TempDir::new().unwrap();
        let fixture = UpstreamFixture::new(temp.path()).unwrap();
        let hashes = fixture
            .publish_pr(
                21,
                &[("README.md", "# service v2\n", "Readme v2"), ("new.txt", "n\n", "New file")],
            )
            .unwrap();
        let source = StubSource::default().with_pr(21, &hashes);
        let ctx = context(&fixture);
        let config = fixture.config();
        let readme = fixture.local().repo_path().join("README.md");

        cherry_pick_pr(&ctx, &config, &source, 21, &quiet()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&readme).unwrap(), "# service v2\n");

        std::fs::write(fixture.local().repo_path().join("notes.txt"), "keep me\n").unwrap();
        let result = revert_pr(&ctx, &config, 21, &quiet()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.reverted.len(), 2);
        assert_eq!(std::fs::read_to_string(&readme).unwrap(), "# service\n");
        assert!(!fixture.local().repo_path().join("new.txt").exists());
        assert_eq!(
            std::fs::read_to_string(fixture.local().repo_path().join("notes.txt")).unwrap(),
            "keep me\n"
        );
        assert_eq!(fixture.local().stash_count().unwrap(), 0);
        assert!(Ledger::new(config.ledger_path(&ctx.install_dir)).get(21).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conflict_keeps_ledger_entry() {
        let temp = TempDir::new().unwrap();
        let fixture = UpstreamFixture::new(temp.path()).unwrap();
        let hashes = fixture.publish_pr(8, &[("a.txt", "pr\n", "Add a")]).unwrap();
        let source = StubSource::default().with_pr(8, &hashes);
        let ctx = context(&fixture);
        let config = fixture.config();
        let ledger = Ledger::new(config.ledger_path(&ctx.install_dir));

        cherry_pick_pr(&ctx, &config, &source, 8, &quiet()).await.unwrap();
        fixture.local().commit_file("a.txt", "edited locally\n", "Edit a").unwrap();
        let before = ledger.get(8).unwrap();

        let err = revert_pr(&ctx, &config, 8, &quiet()).await.unwrap_err();

        assert_eq!(error_kind(&err), ErrorKind::Conflict);
        let conflict = err.downcast_ref::<UpdaterError>().unwrap();
        assert_eq!(conflict.conflict_hashes().len(), 1);
        assert_eq!(ledger.get(8).unwrap(), before);
        assert!(fixture.local().status_porcelain().unwrap().trim().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_after_first_revert_reports_partial_result() {
        let temp = TempDir::new().unwrap();
        let fixture = UpstreamFixture::new(temp.path()).unwrap();
        let hashes = fixture
            .publish_pr(9, &[("a.txt", "pr\n", "Add a"), ("b.txt", "pr\n", "Add b")])
            .unwrap();
        let source = StubSource::default().with_pr(9, &hashes);
        let ctx = context(&fixture);
        let config = fixture.config();
        let ledger = Ledger::new(config.ledger_path(&ctx.install_dir));

        cherry_pick_pr(&ctx, &config, &source, 9, &quiet()).await.unwrap();
        fixture.local().commit_file("a.txt", "edited locally\n", "Edit a").unwrap();
        let before = ledger.get(9).unwrap();

        let err = revert_pr(&ctx, &config, 9, &quiet()).await.unwrap_err();

        assert_eq!(error_kind(&err), ErrorKind::Conflict);
        let partial = err.downcast_ref::<PartialRevert>().unwrap();
        assert_eq!(partial.result.reverted.len(), 1);
        assert_eq!(partial.result.conflicted.len(), 1);
        assert_eq!(partial.result.failure, Some(ErrorKind::Conflict));
        assert!(!partial.result.success);
        assert!(!fixture.local().repo_path().join("b.txt").exists());
        assert_eq!(ledger.get(9).unwrap(), before);
    }

    #[tokio::test]
    async fn test_unknown_pr_is_validation_error() {
        let temp = TempDir::new().unwrap();
        let fixture = UpstreamFixture::new(temp.path()).unwrap();
        let ctx = context(&fixture);

        let err = revert_pr(&ctx, &fixture.config(), 99, &quiet()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdaterError>(),
            Some(UpdaterError::NoAppliedCommits { number: 99 })
        ));

        let err = revert_pr(&ctx, &fixture.config(), -1, &quiet()).await.unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::Validation);
    }
}
