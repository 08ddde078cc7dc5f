//! Applying upstream pull requests commit by commit

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::config::UpdaterConfig;
use crate::core::{ErrorKind, error_kind};
use crate::git::command_builder::GitCommand;
use crate::git::{self, GitRepo, short_hash};
use crate::github::{PrCommit, PullRequestSource};
use crate::ledger::Ledger;
use crate::patch::{ensure_upstream_remote, summary_line, validate_pr_number};
use crate::repo::RepositoryContext;
use crate::status::ProgressSink;

/// Outcome of applying one PR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CherryPickResult {
    pub pr_number: u64,
    pub success: bool,
    pub error: Option<String>,
    /// Short upstream hashes that produced a local commit
    pub applied: Vec<String>,
    /// Short hash of the commit that stopped the PR
    pub conflicted: Vec<String>,
    pub failure: Option<ErrorKind>,
}

impl CherryPickResult {
    fn new(pr_number: u64) -> Self {
        Self {
            pr_number,
            ..Self::default()
        }
    }

    fn fail(&mut self, kind: ErrorKind, error: String) {
        self.success = false;
        self.failure = Some(kind);
        self.error = Some(error);
    }
}

/// A batch stopped by an unexpected error.
#[derive(Debug, thiserror::Error)]
#[error("Cherry-pick batch stopped after {} PR(s): {error:#}", completed.len())]
pub struct BatchError {
    /// Results of the PRs processed before the failure
    pub completed: Vec<CherryPickResult>,
    /// What stopped the batch
    pub error: anyhow::Error,
}

enum PickOutcome {
    Applied(String),
    Skipped,
    Stopped,
}

/// Cherry-picks every commit of PR `number` onto the current branch.
///
/// A conflict or an unexpected git failure aborts the pick in progress and
/// is reported in the returned result, which then has `success == false`.
/// Commits after the failing one are not attempted. The ledger is written
/// only when the PR completed and at least one commit was created.
///
/// # Errors
///
/// `Err` is reserved for problems that say nothing about the PR itself: an
/// invalid number, git missing, fetch or API failures.
pub async fn cherry_pick_pr(
    ctx: &RepositoryContext,
    config: &UpdaterConfig,
    source: &dyn PullRequestSource,
    number: i64,
    progress: &dyn ProgressSink,
) -> Result<CherryPickResult> {
    let number = validate_pr_number(number)?;
    let repo = GitRepo::new(&ctx.repo_dir);
    let remote = &config.upstream.remote;

    progress.step(5, &format!("Preparing cherry-pick of PR #{number}..."));
    git::ensure_git_available()?;
    ensure_upstream_remote(&repo, config).await?;

    if repo.is_dirty().await? {
        progress.log("Warning: working tree has local changes; overlapping files will fail to apply");
    }

    progress.step(15, &format!("Fetching {remote}..."));
    repo.fetch(remote, None).await?;
    progress.step(25, &format!("Fetching PR #{number} head..."));
    repo.fetch(remote, Some(&format!("pull/{number}/head"))).await?;

    progress.step(35, &format!("Loading commits of PR #{number}..."));
    let commits = source
        .pull_request_commits(number)
        .await
        .with_context(|| format!("Failed to load commits for PR #{number}"))?;
    if commits.is_empty() {
        anyhow::bail!("PR #{number} has no commits");
    }

    let mut result = CherryPickResult::new(number);
    let mut created = Vec::new();
    let total = commits.len();

    for (index, commit) in commits.iter().enumerate() {
        let percent = 40 + (index * 50 / total) as u8;
        let short = short_hash(&commit.sha);
        progress.step(
            percent,
            &format!(
                "Applying {}/{}: {} {}",
                index + 1,
                total,
                short,
                summary_line(&commit.commit.message)
            ),
        );

        match pick_commit(&repo, commit, &mut result, progress).await? {
            PickOutcome::Applied(local) => {
                result.applied.push(short);
                created.push(local);
            }
            PickOutcome::Skipped => {}
            PickOutcome::Stopped => return Ok(result),
        }
    }

    result.success = true;
    if created.is_empty() {
        progress.log(&format!("PR #{number}: nothing new to apply"));
    } else {
        let ledger = Ledger::new(config.ledger_path(&ctx.install_dir));
        if let Err(e) = ledger.mark_applied(number, &created) {
            warn!("Failed to record PR #{} in ledger: {:#}", number, e);
            progress.log(&format!("Warning: failed to record PR #{number}: {e:#}"));
        }
    }

    progress.step(
        95,
        &format!("PR #{number} applied ({} commit(s))", result.applied.len()),
    );
    Ok(result)
}

async fn pick_commit(
    repo: &GitRepo,
    commit: &PrCommit,
    result: &mut CherryPickResult,
    progress: &dyn ProgressSink,
) -> Result<PickOutcome> {
    let short = short_hash(&commit.sha);
    let output = repo.run(GitCommand::cherry_pick(&commit.sha)).execute_allow_failure().await?;

    if output.success {
        let local = match repo.try_rev_parse("HEAD").await? {
            Some(hash) => hash,
            None => commit.sha.clone(),
        };
        return Ok(PickOutcome::Applied(local));
    }

    let text = output.combined();
    if git::is_merge_commit_output(&text) {
        abort_pick(repo).await;
        progress.log(&format!("Skipping merge commit {short}"));
        return Ok(PickOutcome::Skipped);
    }

    if git::is_empty_pick_output(&text) {
        let skip = repo.run(GitCommand::cherry_pick_skip()).execute_allow_failure().await?;
        if !skip.success {
            abort_pick(repo).await;
        }
        progress.log(&format!("Skipping {short}: changes already present"));
        return Ok(PickOutcome::Skipped);
    }

    abort_pick(repo).await;
    if git::is_conflict_output(&text) {
        result.conflicted.push(short.clone());
        result.fail(
            ErrorKind::Conflict,
            format!("Conflict on commit {short}: {}", summary_line(&commit.commit.message)),
        );
        progress.log(&format!("Conflict on {short}; cherry-pick aborted"));
    } else {
        result.fail(ErrorKind::Tool, format!("Cherry-pick of {short} failed: {}", text.trim()));
        progress.log(&format!("Cherry-pick of {short} failed; aborted"));
    }
    Ok(PickOutcome::Stopped)
}

async fn abort_pick(repo: &GitRepo) {
    if let Err(e) = repo.run(GitCommand::cherry_pick_abort()).execute_allow_failure().await {
        warn!("cherry-pick --abort failed: {e:#}");
    }
}

/// Applies several PRs in the order given.
///
/// PRs that conflict or fail are reported in their result and the batch moves
/// on. Any `Err` from [`cherry_pick_pr`] stops the batch; the results so far
/// travel with it in [`BatchError`]. Numbers are validated before anything
/// runs.
pub async fn cherry_pick_multiple_prs(
    ctx: &RepositoryContext,
    config: &UpdaterConfig,
    source: &dyn PullRequestSource,
    numbers: &[i64],
    progress: &dyn ProgressSink,
) -> Result<Vec<CherryPickResult>, BatchError> {
    for &number in numbers {
        if let Err(error) = validate_pr_number(number) {
            return Err(BatchError {
                completed: Vec::new(),
                error,
            });
        }
    }

    let mut results = Vec::with_capacity(numbers.len());
    for (index, &number) in numbers.iter().enumerate() {
        progress.log(&format!("PR {}/{}: #{}", index + 1, numbers.len(), number));
        match cherry_pick_pr(ctx, config, source, number, progress).await {
            Ok(result) => {
                if let Some(error) = &result.error {
                    progress.log(&format!("PR #{number} not applied: {error}"));
                }
                results.push(result);
            }
            Err(error) => {
                warn!(
                    "Cherry-pick batch stopped at PR #{} ({}): {:#}",
                    number,
                    error_kind(&error),
                    error
                );
                return Err(BatchError {
                    completed: results,
                    error,
                });
            }
        }
    }
    Ok(results)
}
