//! Restarting into a new executable and rolling back to a backup
//!
//! The running process cannot replace its own image, so both operations hand
//! the swap to a detached launcher script (see [`script`]) and then exit.
//! Exiting goes through [`ProcessExit`]; the default implementation calls
//! [`std::process::exit`].

pub mod script;

pub use script::{
    LauncherScript, PosixShell, RelaunchDescriptor, WindowsBatch, platform_launcher, start_script,
    write_script,
};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::backup::{BackupManager, backup_name, rollback_backup_name};
use crate::config::UpdaterConfig;
use crate::core::UpdaterError;
use crate::status::ProgressSink;
use crate::utils::{files_same_content, paths_equal};
use crate::utils::platform::canonical_or_self;

/// Ends the process once the launcher script is running.
pub trait ProcessExit: Send + Sync {
    fn exit(&self, code: i32);
}

/// [`ProcessExit`] that really exits.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdProcessExit;

impl ProcessExit for StdProcessExit {
    fn exit(&self, code: i32) {
        // Let the detached launcher get going before the parent disappears.
        std::thread::sleep(std::time::Duration::from_secs(1));
        std::process::exit(code);
    }
}

/// Which operation superseded the running executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupTag {
    Update,
    Build,
    PullRequest,
}

impl BackupTag {
    /// Parses a caller-supplied tag; anything unknown is `Update`.
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "build" => Self::Build,
            "pr" => Self::PullRequest,
            _ => Self::Update,
        }
    }

    /// Name fragment used in backup file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Build => "build",
            Self::PullRequest => "PR",
        }
    }
}

/// What [`Relauncher::rollback_to`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum RollbackOutcome {
    /// The backup is the running executable; nothing was swapped
    AlreadyCurrent,
    /// The launcher script was started
    Scheduled {
        script: PathBuf,
    },
}

/// Builds and starts launcher scripts for one installation.
pub struct Relauncher {
    install_dir: PathBuf,
    backup_dir: PathBuf,
    port: u16,
    pid: u32,
    backups: BackupManager,
    launcher: Box<dyn LauncherScript>,
    exit: Arc<dyn ProcessExit>,
}

impl std::fmt::Debug for Relauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relauncher")
            .field("install_dir", &self.install_dir)
            .field("backup_dir", &self.backup_dir)
            .field("port", &self.port)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl Relauncher {
    /// Host launcher, real process exit, this process as the running service.
    #[must_use]
    pub fn new(config: &UpdaterConfig, install_dir: &Path) -> Self {
        Self {
            install_dir: install_dir.to_path_buf(),
            backup_dir: config.backup_dir(install_dir),
            port: config.service.port,
            pid: std::process::id(),
            backups: BackupManager::new(config, install_dir),
            launcher: platform_launcher(),
            exit: Arc::new(StdProcessExit),
        }
    }

    /// Overrides the running executable.
    #[must_use]
    pub fn with_running(mut self, running: Option<PathBuf>) -> Self {
        self.backups = self.backups.with_running(running);
        self
    }

    /// Process the launcher waits for before swapping executables.
    #[must_use]
    pub const fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn with_launcher(mut self, launcher: Box<dyn LauncherScript>) -> Self {
        self.launcher = launcher;
        self
    }

    #[must_use]
    pub fn with_exit(mut self, exit: Arc<dyn ProcessExit>) -> Self {
        self.exit = exit;
        self
    }

    fn running(&self) -> Option<PathBuf> {
        self.backups.running().map(Path::to_path_buf)
    }

    fn launch(&self, prefix: &str, descriptor: &RelaunchDescriptor) -> Result<PathBuf> {
        let content = self.launcher.render(descriptor);
        let script =
            write_script(&self.install_dir, prefix, self.launcher.extension(), &content)?;
        info!("Starting launcher script {}", script.display());
        start_script(self.launcher.as_ref(), &script)?;
        Ok(script)
    }

    /// Starts the newest executable once this process is gone and exits.
    ///
    /// `last_built` wins when it still exists; otherwise the newest
    /// executable in the install directory is started. The running image is
    /// moved to `pre_<tag>_<timestamp>_<name>` in the backup directory.
    ///
    /// # Errors
    ///
    /// [`UpdaterError::ExecutableNotFound`] when there is nothing to start;
    /// script write or spawn failures.
    pub fn restart(
        &self,
        tag: BackupTag,
        last_built: Option<&Path>,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf> {
        let new_exe = match last_built.filter(|p| p.is_file()) {
            Some(path) => canonical_or_self(path),
            None => self.backups.newest_executable()?.ok_or_else(|| {
                UpdaterError::ExecutableNotFound {
                    reason: format!("no executable in {}", self.install_dir.display()),
                }
            })?,
        };
        progress.log(&format!("Restarting with: {}", new_exe.display()));

        let old_exe = self.running().filter(|running| !paths_equal(running, &new_exe));
        let descriptor = RelaunchDescriptor {
            install_dir: self.install_dir.clone(),
            backup_dir: self.backup_dir.clone(),
            backup_dest: old_exe.as_deref().map(|old| self.backup_dest(tag, old)),
            old_exe,
            new_exe: Some(new_exe),
            pid: self.pid,
            port: self.port,
            copy_new: false,
        };

        let script = self.launch("restart_reforge_", &descriptor)?;
        self.exit.exit(0);
        Ok(script)
    }

    /// Arranges for the running executable to be moved into the backup
    /// directory after this process exits, without starting anything.
    /// Returns `None` when the running image is unknown.
    pub fn schedule_move_on_exit(&self, tag: BackupTag, progress: &dyn ProgressSink) -> Result<Option<PathBuf>> {
        let Some(old_exe) = self.running() else {
            return Ok(None);
        };
        progress.log(&format!("{} will be moved to the backup directory on exit", old_exe.display()));

        let descriptor = RelaunchDescriptor {
            install_dir: self.install_dir.clone(),
            backup_dir: self.backup_dir.clone(),
            backup_dest: Some(self.backup_dest(tag, &old_exe)),
            old_exe: Some(old_exe),
            new_exe: None,
            pid: self.pid,
            port: self.port,
            copy_new: false,
        };
        self.launch("move_reforge_", &descriptor).map(Some)
    }

    fn backup_dest(&self, tag: BackupTag, old_exe: &Path) -> PathBuf {
        let name = old_exe.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        self.backup_dir.join(backup_name(tag.as_str(), &name, Local::now()))
    }

    /// Swaps in `backup` after this process exits and exits.
    ///
    /// The path is checked to lie strictly inside the backup directory before
    /// anything touches the filesystem. A backup with the same content as the
    /// running executable is a successful no-op.
    ///
    /// # Errors
    ///
    /// - [`UpdaterError::PathOutsideBackupDir`] for paths escaping the backup directory
    /// - [`UpdaterError::BackupNotFound`] when the file does not exist
    /// - script write or spawn failures
    pub fn rollback_to(&self, backup: &Path, progress: &dyn ProgressSink) -> Result<RollbackOutcome> {
        let backup_dir = normalize(&std::path::absolute(&self.backup_dir).with_context(|| {
            format!("Failed to resolve {}", self.backup_dir.display())
        })?);
        let target = normalize(
            &std::path::absolute(backup)
                .with_context(|| format!("Failed to resolve {}", backup.display()))?,
        );

        let outside = || UpdaterError::PathOutsideBackupDir {
            path: backup.display().to_string(),
            backup_dir: self.backup_dir.display().to_string(),
        };
        if !is_strictly_within(&backup_dir, &target) {
            return Err(outside().into());
        }
        if !target.is_file() {
            return Err(UpdaterError::BackupNotFound {
                path: backup.display().to_string(),
            }
            .into());
        }
        // Symlinks inside the backup directory must not lead out of it.
        if !is_strictly_within(&canonical_or_self(&backup_dir), &canonical_or_self(&target)) {
            return Err(outside().into());
        }

        progress.log(&format!("Starting rollback to: {}", file_name(&target)));
        let running = self.running();
        if let Some(running) = running.as_deref() {
            if files_same_content(running, &target).unwrap_or(false) {
                progress.log("Selected version matches current executable; rollback skipped.");
                return Ok(RollbackOutcome::AlreadyCurrent);
            }
        }

        let descriptor = RelaunchDescriptor {
            install_dir: self.install_dir.clone(),
            backup_dir: backup_dir.clone(),
            backup_dest: running.as_ref().map(|_| backup_dir.join(rollback_backup_name(Local::now()))),
            old_exe: running,
            new_exe: Some(target),
            pid: self.pid,
            port: self.port,
            copy_new: true,
        };
        if let Some(dest) = descriptor.launch_path() {
            progress.log(&format!("Restoring backup to: {}", dest.display()));
        }

        let script = self.launch("restart_reforge_rollback_", &descriptor)?;
        if let Err(e) = self.backups.prune(progress) {
            progress.log(&format!("Backup cleanup skipped: {e:#}"));
        }
        self.exit.exit(0);
        Ok(RollbackOutcome::Scheduled {
            script,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Resolves `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `target` is below `dir` and is not `dir` itself. Case-insensitive on Windows.
fn is_strictly_within(dir: &Path, target: &Path) -> bool {
    if cfg!(windows) {
        let dir = dir.to_string_lossy().to_lowercase();
        let target = target.to_string_lossy().to_lowercase();
        let dir = dir.trim_end_matches(['\\', '/']);
        target.len() > dir.len() + 1
            && target.starts_with(dir)
            && target[dir.len()..].starts_with(['\\', '/'])
    } else {
        target != dir && target.starts_with(dir)
    }
}
