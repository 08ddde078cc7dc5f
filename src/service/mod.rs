//! The engine's front door
//!
//! [`UpdaterService`] owns everything that outlives a single operation: the
//! status tracker, the operation guard, the last built executable and the
//! hooks a host installs. The five mutating operations (update, build,
//! rollback, cherry-pick, revert) run as spawned tasks; `start_*` returns an
//! [`OperationHandle`] right away or [`UpdaterError::Busy`] while another
//! operation holds the guard.
//!
//! ```rust,no_run
//! use reforge::config::UpdaterConfig;
//! use reforge::service::UpdaterService;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = UpdaterService::builder(UpdaterConfig::default()).build()?;
//! let handle = service.start_update(false)?;
//! let report = handle.wait().await?;
//! println!("stashed local edits: {}", report.update.stashed);
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::backup::{BackupManager, BackupReport, BackupVersion, running_executable};
use crate::build::{self, BuildArtifact};
use crate::config::UpdaterConfig;
use crate::constants::restart_grace_period;
use crate::core::UpdaterError;
use crate::git::CommitInfo;
use crate::github::{GitHubClient, PullRequest, PullRequestSource, normalize_listing};
use crate::ledger::Ledger;
use crate::patch::{self, CherryPickResult, RevertResult, UpdateCheckResult, UpdateOutcome};
use crate::relaunch::{
    BackupTag, LauncherScript, ProcessExit, Relauncher, RollbackOutcome, platform_launcher,
};
use crate::repo::{self, RepositoryContext};
use crate::status::{
    LogCallback, OperationEvent, OperationGuard, OperationKind, ProgressSink, ScaledProgress,
    StatusReporter, StatusTracker, UpdaterState, UpdaterStatus,
};
use crate::version::{self, VersionInfo};

/// Runs before the process is replaced; errors are logged, never fatal.
pub type PreRestartHook = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// What happened to the running executable after a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum RestartAction {
    /// The launcher script was started and the exit hook called
    Restarted {
        script: PathBuf,
    },
    /// The running image will be moved to the backup directory on exit
    MoveOnExit {
        script: Option<PathBuf>,
    },
}

/// Result of a build, standalone or as part of an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub artifact: BuildArtifact,
    pub backups: BackupReport,
    pub restart: RestartAction,
}

/// Result of a full update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    pub update: UpdateOutcome,
    pub build: BuildReport,
}

/// A running operation.
#[derive(Debug)]
pub struct OperationHandle<T> {
    kind: OperationKind,
    events: broadcast::Receiver<OperationEvent>,
    task: JoinHandle<Result<T>>,
}

impl<T> OperationHandle<T> {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Log and progress events, in the order they were emitted. The receiver
    /// was subscribed before the operation started, so nothing is missed
    /// unless the receiver lags.
    pub fn events(&mut self) -> &mut broadcast::Receiver<OperationEvent> {
        &mut self.events
    }

    /// Waits for the operation to finish.
    ///
    /// # Errors
    ///
    /// The operation's own error, or a panic in the task.
    pub async fn wait(self) -> Result<T> {
        self.task.await.with_context(|| format!("{} task did not complete", self.kind))?
    }

    /// Splits the handle so events can be drained while the task runs.
    pub fn into_parts(self) -> (broadcast::Receiver<OperationEvent>, JoinHandle<Result<T>>) {
        (self.events, self.task)
    }
}

struct Inner {
    config: UpdaterConfig,
    install_dir: PathBuf,
    work_dir: Option<PathBuf>,
    running: Option<PathBuf>,
    status: Arc<StatusTracker>,
    guard: OperationGuard,
    last_built: Mutex<Option<PathBuf>>,
    pre_restart: Mutex<Option<PreRestartHook>>,
    prs: Arc<dyn PullRequestSource>,
    relauncher: Relauncher,
    grace: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Inner {
    async fn context(&self) -> Result<RepositoryContext> {
        let work_dir = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to get working directory")?,
        };
        RepositoryContext::resolve_in(&self.config, &work_dir, &self.install_dir).await
    }

    fn backups(&self) -> BackupManager {
        BackupManager::new(&self.config, &self.install_dir).with_running(self.running.clone())
    }

    fn last_built(&self) -> Option<PathBuf> {
        lock(&self.last_built).clone()
    }

    async fn run_pre_restart(&self, progress: &dyn ProgressSink) {
        let Some(hook) = lock(&self.pre_restart).clone() else {
            return;
        };
        progress.log("Requesting graceful shutdown before restart...");
        match hook().await {
            Ok(()) => progress.log("Graceful shutdown completed."),
            Err(e) => progress.log(&format!("Graceful shutdown failed: {e:#}")),
        }
    }

    fn reporter(self: &Arc<Self>, state: UpdaterState) -> StatusReporter {
        StatusReporter::new(self.status.clone(), state)
    }
}

/// Builder for [`UpdaterService`].
pub struct ServiceBuilder {
    config: UpdaterConfig,
    install_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    running: Option<Option<PathBuf>>,
    pid: Option<u32>,
    prs: Option<Arc<dyn PullRequestSource>>,
    launcher: Option<Box<dyn LauncherScript>>,
    exit: Option<Arc<dyn ProcessExit>>,
    grace: Duration,
}

impl ServiceBuilder {
    /// Directory holding the service executable. Defaults to the directory of
    /// this process's executable.
    #[must_use]
    pub fn install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = Some(dir.into());
        self
    }

    /// Directory the source checkout is looked up from. Defaults to the
    /// process working directory at the time of each operation.
    #[must_use]
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// The executable treated as running; `None` means there is none.
    #[must_use]
    pub fn running_executable(mut self, path: Option<PathBuf>) -> Self {
        self.running = Some(path);
        self
    }

    /// Process id of the running service. Defaults to this process.
    #[must_use]
    pub const fn service_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// PR metadata source. Defaults to [`GitHubClient`].
    #[must_use]
    pub fn pull_requests(mut self, source: Arc<dyn PullRequestSource>) -> Self {
        self.prs = Some(source);
        self
    }

    #[must_use]
    pub fn launcher(mut self, launcher: Box<dyn LauncherScript>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    #[must_use]
    pub fn process_exit(mut self, exit: Arc<dyn ProcessExit>) -> Self {
        self.exit = Some(exit);
        self
    }

    /// Pause between a successful build and an automatic restart.
    #[must_use]
    pub const fn grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// # Errors
    ///
    /// Fails when the default HTTP client cannot be constructed.
    pub fn build(self) -> Result<UpdaterService> {
        let install_dir = self.install_dir.unwrap_or_else(repo::install_dir);
        let running = self.running.unwrap_or_else(running_executable);
        let prs = match self.prs {
            Some(prs) => prs,
            None => Arc::new(GitHubClient::new(self.config.github.clone())?),
        };

        let mut relauncher = Relauncher::new(&self.config, &install_dir)
            .with_running(running.clone())
            .with_launcher(self.launcher.unwrap_or_else(platform_launcher));
        if let Some(exit) = self.exit {
            relauncher = relauncher.with_exit(exit);
        }
        if let Some(pid) = self.pid {
            relauncher = relauncher.with_pid(pid);
        }

        Ok(UpdaterService {
            inner: Arc::new(Inner {
                config: self.config,
                install_dir,
                work_dir: self.work_dir,
                running,
                status: Arc::new(StatusTracker::new()),
                guard: OperationGuard::new(),
                last_built: Mutex::new(None),
                pre_restart: Mutex::new(None),
                prs,
                relauncher,
                grace: self.grace,
            }),
        })
    }
}

/// Serializes and runs the updater's operations. Cloning shares state.
#[derive(Clone)]
pub struct UpdaterService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for UpdaterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdaterService")
            .field("install_dir", &self.inner.install_dir)
            .field("running_operation", &self.inner.guard.current())
            .finish_non_exhaustive()
    }
}

impl UpdaterService {
    #[must_use]
    pub fn builder(config: UpdaterConfig) -> ServiceBuilder {
        ServiceBuilder {
            config,
            install_dir: None,
            work_dir: None,
            running: None,
            pid: None,
            prs: None,
            launcher: None,
            exit: None,
            grace: restart_grace_period(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &UpdaterConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn install_dir(&self) -> &Path {
        &self.inner.install_dir
    }

    #[must_use]
    pub fn status(&self) -> UpdaterStatus {
        self.inner.status.snapshot()
    }

    /// The operation holding the guard, if any.
    #[must_use]
    /// The executable treated as the running service.
    #[must_use]
    pub fn running_executable(&self) -> Option<&Path> {
        self.inner.running.as_deref()
    }

    /// Process the launcher scripts wait for.
    #[must_use]
    pub fn service_pid(&self) -> u32 {
        self.inner.relauncher.pid()
    }

    pub fn running_operation(&self) -> Option<OperationKind> {
        self.inner.guard.current()
    }

    pub fn set_log_callback(&self, callback: Option<LogCallback>) {
        self.inner.status.set_log_callback(callback);
    }

    pub fn set_pre_restart_hook(&self, hook: Option<PreRestartHook>) {
        *lock(&self.inner.pre_restart) = hook;
    }

    /// Executable produced by the most recent successful build.
    #[must_use]
    pub fn last_built(&self) -> Option<PathBuf> {
        self.inner.last_built()
    }

    fn spawn<T, Fut>(
        &self,
        kind: OperationKind,
        state: UpdaterState,
        operation: impl FnOnce(Arc<Inner>) -> Fut,
    ) -> Result<OperationHandle<T>, UpdaterError>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let guard = &self.inner.guard;
        let permit = guard.try_start(kind).ok_or_else(|| UpdaterError::Busy {
            running: guard.current().map_or("another operation", OperationKind::as_str).to_string(),
        })?;

        let events = self.inner.status.subscribe();
        self.inner.status.reset(state);

        let inner = self.inner.clone();
        let future = operation(self.inner.clone());
        let task = tokio::spawn(async move {
            let result = future.await;
            if let Err(e) = &result {
                inner.status.set_error(&format!("{e:#}"));
            }
            drop(permit);
            result
        });

        Ok(OperationHandle {
            kind,
            events,
            task,
        })
    }

    /// Fetch and merge upstream, back up, rebuild, then restart or schedule
    /// the move of the running executable.
    pub fn start_update(&self, auto_restart: bool) -> Result<OperationHandle<UpdateReport>, UpdaterError> {
        self.spawn(OperationKind::Update, UpdaterState::Updating, move |inner| async move {
            let progress = inner.reporter(UpdaterState::Updating);
            progress.step(10, "[1/5] Preparing update...");
            let ctx = inner.context().await?;

            progress.step(20, "[2/5] Updating repository...");
            let update = patch::perform_update(&ctx, &inner.config, &ScaledProgress::new(&progress, 20, 40)).await?;

            progress.step(40, "[3/5] Backing up old executables...");
            let backups = inner
                .backups()
                .backup_old_executables(BackupTag::Update.as_str(), &|line: &str| progress.log(line))?;

            progress.step(50, "[4/5] Building new version (this may take 1-2 minutes)...");
            let artifact = run_build(&inner, &ctx).await?;

            let done = inner.reporter(UpdaterState::Done);
            done.step(90, "[5/5] Update completed successfully!");
            let restart = finish(&inner, BackupTag::Update, auto_restart, &done).await?;
            done.step(100, "Update complete! Please restart the application.");

            Ok(UpdateReport {
                update,
                build: BuildReport {
                    artifact,
                    backups,
                    restart,
                },
            })
        })
    }

    /// Rebuild from the checkout as it is. `tag` names the backups.
    pub fn start_build(&self, auto_restart: bool, tag: BackupTag) -> Result<OperationHandle<BuildReport>, UpdaterError> {
        self.spawn(OperationKind::Build, UpdaterState::Building, move |inner| async move {
            let progress = inner.reporter(UpdaterState::Building);
            progress.step(10, "[1/3] Preparing build...");
            let ctx = inner.context().await?;

            progress.step(35, "[2/3] Backing up old executables...");
            let backups = inner.backups().backup_old_executables(tag.as_str(), &|line: &str| progress.log(line))?;

            progress.step(60, "[3/3] Building new version (this may take 1-2 minutes)...");
            let artifact = run_build(&inner, &ctx).await?;

            let done = inner.reporter(UpdaterState::Done);
            done.step(90, "Build completed successfully!");
            let restart = finish(&inner, tag, auto_restart, &done).await?;
            done.step(100, "Build complete! Please restart the application.");

            Ok(BuildReport {
                artifact,
                backups,
                restart,
            })
        })
    }

    /// Swap in a backup from the backup directory.
    pub fn start_rollback(&self, backup: impl Into<PathBuf>) -> Result<OperationHandle<RollbackOutcome>, UpdaterError> {
        let backup = backup.into();
        self.spawn(OperationKind::Rollback, UpdaterState::Rollback, move |inner| async move {
            let progress = inner.reporter(UpdaterState::Rollback);
            let outcome = inner.relauncher.rollback_to(&backup, &progress)?;
            if outcome == RollbackOutcome::AlreadyCurrent {
                inner.reporter(UpdaterState::Done).step(100, "Rollback skipped");
            }
            Ok(outcome)
        })
    }

    /// Cherry-pick PRs in order. A batch stopped by an unexpected error
    /// fails with a [`crate::patch::BatchError`] in the chain.
    pub fn start_cherry_pick(&self, numbers: Vec<i64>) -> Result<OperationHandle<Vec<CherryPickResult>>, UpdaterError> {
        self.spawn(OperationKind::CherryPick, UpdaterState::CherryPick, move |inner| async move {
            let progress = inner.reporter(UpdaterState::CherryPick);
            let ctx = inner.context().await?;
            let results =
                patch::cherry_pick_multiple_prs(&ctx, &inner.config, inner.prs.as_ref(), &numbers, &progress).await?;

            let applied = results.iter().filter(|r| r.success).count();
            inner
                .reporter(UpdaterState::Done)
                .step(100, &format!("Cherry-pick finished: {applied}/{} PR(s) applied", results.len()));
            Ok(results)
        })
    }

    /// Revert the commits the ledger recorded for a PR.
    pub fn start_revert(&self, number: i64) -> Result<OperationHandle<RevertResult>, UpdaterError> {
        self.spawn(OperationKind::Revert, UpdaterState::Revert, move |inner| async move {
            let progress = inner.reporter(UpdaterState::Revert);
            let ctx = inner.context().await?;
            let result = patch::revert_pr(&ctx, &inner.config, number, &progress).await?;
            inner.reporter(UpdaterState::Done).step(100, &format!("Reverted PR #{}", result.pr_number));
            Ok(result)
        })
    }

    /// Current build identity. With `no_clone` a missing checkout yields
    /// `Ok(None)` instead of a clone.
    pub async fn current_version(&self, no_clone: bool) -> Result<Option<VersionInfo>> {
        if let Some(embedded) = version::embedded_version() {
            return Ok(Some(embedded));
        }
        if no_clone {
            let work_dir = match &self.inner.work_dir {
                Some(dir) => dir.clone(),
                None => std::env::current_dir().context("Failed to get working directory")?,
            };
            return match repo::locate_existing_in(&self.inner.config, &work_dir) {
                Some(repo_dir) => version::repository_version(&repo_dir).await,
                None => Ok(None),
            };
        }
        let ctx = self.inner.context().await?;
        version::repository_version(&ctx.repo_dir).await
    }

    pub async fn check_for_updates(&self) -> Result<UpdateCheckResult> {
        crate::git::ensure_git_available()?;
        let ctx = self.inner.context().await?;
        patch::update::check_for_updates_in(&ctx, &self.inner.config, version::embedded_version()).await
    }

    pub async fn current_commits(&self, limit: usize) -> Result<Vec<CommitInfo>> {
        let ctx = self.inner.context().await?;
        patch::current_commits(&ctx, limit).await
    }

    pub fn list_backups(&self, limit: usize) -> Result<Vec<BackupVersion>> {
        self.inner.backups().list_backups(limit)
    }

    pub fn current_executable(&self) -> Result<Option<BackupVersion>> {
        self.inner.backups().current_executable()
    }

    /// PRs from the remote source with `applied` and `can_revert` taken from
    /// the ledger.
    pub async fn list_prs(&self, state: &str, limit: u32) -> Result<Vec<PullRequest>> {
        let (state, limit) = normalize_listing(state, limit);
        let mut prs = self.inner.prs.list_pull_requests(state, limit).await?;
        let ledger = Ledger::new(self.inner.config.ledger_path(&self.inner.install_dir)).load()?;
        for pr in &mut prs {
            pr.join_ledger(ledger.get(&pr.number));
        }
        Ok(prs)
    }
}

async fn run_build(inner: &Arc<Inner>, ctx: &RepositoryContext) -> Result<BuildArtifact> {
    let artifact = build::build(ctx, &inner.config, &inner.reporter(UpdaterState::Building)).await?;
    *lock(&inner.last_built) = Some(artifact.executable.clone());
    Ok(artifact)
}

async fn finish(
    inner: &Arc<Inner>,
    tag: BackupTag,
    auto_restart: bool,
    done: &StatusReporter,
) -> Result<RestartAction> {
    if !auto_restart {
        let script = inner.relauncher.schedule_move_on_exit(tag, done)?;
        return Ok(RestartAction::MoveOnExit {
            script,
        });
    }

    done.step(95, "Preparing to restart...");
    tokio::time::sleep(inner.grace).await;
    inner.run_pre_restart(done).await;
    let last_built = inner.last_built();
    let script = inner.relauncher.restart(tag, last_built.as_deref(), done)?;
    Ok(RestartAction::Restarted {
        script,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::PrCommit;
    use crate::relaunch::tests::InertLauncher;
    use crate::test_utils::UpstreamFixture;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Holds every commit-list request until released.
    struct GatedSource {
        commits: Vec<PrCommit>,
        gate: Arc<Notify>,
    }

    impl PullRequestSource for GatedSource {
        fn list_pull_requests<'a>(
            &'a self,
            _state: &'a str,
            _per_page: u32,
        ) -> BoxFuture<'a, Result<Vec<PullRequest>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn pull_request_commits(&self, _number: u64) -> BoxFuture<'_, Result<Vec<PrCommit>>> {
            Box::pin(async move {
                self.gate.notified().await;
                Ok(self.commits.clone())
            })
        }
    }

    struct RecordingExit(AtomicI32);

    impl ProcessExit for RecordingExit {
        fn exit(&self, code: i32) {
            self.0.store(code, Ordering::SeqCst);
        }
    }

    fn service(temp: &TempDir, source: Arc<dyn PullRequestSource>) -> UpdaterService {
        let install = temp.path().join("install");
        std::fs::create_dir_all(&install).unwrap();
        UpdaterService::builder(UpdaterConfig::default())
            .install_dir(install)
            .work_dir(temp.path())
            .running_executable(None)
            .pull_requests(source)
            .launcher(Box::new(InertLauncher))
            .process_exit(Arc::new(RecordingExit(AtomicI32::new(-1))))
            .grace_period(Duration::ZERO)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_operation_records_error_and_frees_guard() {
        let temp = TempDir::new().unwrap();
        let gate = Arc::new(Notify::new());
        let service = service(&temp, Arc::new(GatedSource {
            commits: Vec::new(),
            gate,
        }));

        let outside = temp.path().join("elsewhere");
        std::fs::write(&outside, "build").unwrap();
        let handle = service.start_rollback(&outside).unwrap();
        assert_eq!(handle.kind(), OperationKind::Rollback);

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdaterError>(),
            Some(UpdaterError::PathOutsideBackupDir { .. })
        ));

        let status = service.status();
        assert_eq!(status.state, UpdaterState::Error);
        assert!(status.error.unwrap().contains("must be inside"));
        assert!(service.running_operation().is_none());
        assert!(service.start_rollback(&outside).is_ok());
    }

    #[tokio::test]
    async fn test_second_operation_is_busy_while_first_runs() {
        let temp = TempDir::new().unwrap();
        let fixture = UpstreamFixture::new(&temp.path().join("git")).unwrap();
        let hashes = fixture.publish_pr(5, &[("pr5.txt", "five\n", "Add five")]).unwrap();

        let gate = Arc::new(Notify::new());
        let source = GatedSource {
            commits: vec![PrCommit::new(hashes[0].clone(), "Add five")],
            gate: gate.clone(),
        };
        let install = temp.path().join("install");
        std::fs::create_dir_all(&install).unwrap();
        let service = UpdaterService::builder(fixture.config())
            .install_dir(&install)
            .work_dir(fixture.local().repo_path())
            .running_executable(None)
            .pull_requests(Arc::new(source))
            .launcher(Box::new(InertLauncher))
            .build()
            .unwrap();

        let handle = service.start_cherry_pick(vec![5]).unwrap();
        match service.start_revert(5) {
            Err(UpdaterError::Busy {
                running,
            }) => assert_eq!(running, "cherry-pick"),
            other => panic!("expected Busy, got {other:?}"),
        }

        // Engine milestones reach the status while the pick is parked.
        let mut mid = service.status();
        for _ in 0..500 {
            if mid.current_step.starts_with("Loading commits") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            mid = service.status();
        }
        assert_eq!(mid.state, UpdaterState::CherryPick);
        assert_eq!(mid.progress, 35);
        assert_eq!(mid.current_step, "Loading commits of PR #5...");

        gate.notify_one();
        let results = handle.wait().await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(service.status().state, UpdaterState::Done);
        assert!(service.running_operation().is_none());

        let record = Ledger::new(install.join("applied_prs.json")).get(5).unwrap();
        assert_eq!(record.map(|r| r.commits.len()), Some(1));
    }

    #[tokio::test]
    async fn test_events_stream_progress_in_order() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, Arc::new(GatedSource {
            commits: Vec::new(),
            gate: Arc::new(Notify::new()),
        }));

        let backup_dir = temp.path().join("install/old_versions");
        std::fs::create_dir_all(&backup_dir).unwrap();
        std::fs::write(backup_dir.join("older"), "older build").unwrap();

        let handle = service.start_rollback(backup_dir.join("older")).unwrap();
        let (mut events, task) = handle.into_parts();
        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, RollbackOutcome::Scheduled { .. }));

        let mut lines = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let OperationEvent::Log(line) = event {
                lines.push(line);
            }
        }
        assert_eq!(lines.first().map(String::as_str), Some("Starting rollback to: older"));
    }

    #[tokio::test]
    async fn test_pre_restart_hook_runs_and_failures_are_logged() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, Arc::new(GatedSource {
            commits: Vec::new(),
            gate: Arc::new(Notify::new()),
        }));
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        service.set_pre_restart_hook(Some(Arc::new(move || -> BoxFuture<'static, Result<()>> {
            flag.store(true, Ordering::SeqCst);
            Box::pin(async { Err(anyhow::anyhow!("bots still running")) })
        })));

        let reporter = service.inner.reporter(UpdaterState::Done);
        service.inner.run_pre_restart(&reporter).await;

        assert!(called.load(Ordering::SeqCst));
        let logs = service.status().logs;
        assert_eq!(logs[0], "Requesting graceful shutdown before restart...");
        assert_eq!(logs[1], "Graceful shutdown failed: bots still running");
    }

    #[tokio::test]
    async fn test_list_prs_joins_ledger() {
        struct Listing;

        impl PullRequestSource for Listing {
            fn list_pull_requests<'a>(
                &'a self,
                state: &'a str,
                per_page: u32,
            ) -> BoxFuture<'a, Result<Vec<PullRequest>>> {
                Box::pin(async move {
                    assert_eq!((state, per_page), ("open", 30));
                    let raw = serde_json::json!([
                        {"number": 3, "title": "a", "state": "open",
                         "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-02T00:00:00Z",
                         "user": {"login": "dev"}, "head": {"sha": "abc"}},
                        {"number": 4, "title": "b", "state": "open",
                         "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-02T00:00:00Z",
                         "user": {"login": "dev"}, "head": {"sha": "def"}}
                    ]);
                    serde_json::from_value::<Vec<PullRequest>>(raw).map_err(anyhow::Error::from)
                })
            }

            fn pull_request_commits(&self, _number: u64) -> BoxFuture<'_, Result<Vec<PrCommit>>> {
                Box::pin(async { Ok(Vec::new()) })
            }
        }

        let temp = TempDir::new().unwrap();
        let service = service(&temp, Arc::new(Listing));
        Ledger::new(temp.path().join("install/applied_prs.json"))
            .mark_applied(4, &["0123456789abcdef".to_string()])
            .unwrap();

        let prs = service.list_prs("", 0).await.unwrap();
        assert!(!prs[0].applied);
        assert!(prs[1].applied);
        assert!(prs[1].can_revert);
    }
}
