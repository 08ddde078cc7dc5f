//! Retained copies of superseded executables
//!
//! Every build drops a new `<build_id>` executable into the install
//! directory. Before that happens the previous executables are moved into
//! `<install_dir>/old_versions`, where [`BackupManager::prune`] keeps at most
//! 20 content-unique files:
//!
//! ```text
//! install/
//! ├── 3f2a...-....exe          new build
//! └── old_versions/
//!     ├── 9d41...-....exe      moved with its build id name
//!     └── pre_update_20240301_101500_service.exe
//! ```
//!
//! The running executable cannot be moved while it is mapped, so it is
//! reported back to the caller, which hands it to the relaunch script.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::config::UpdaterConfig;
use crate::status::ProgressSink;
use crate::utils::platform::{canonical_or_self, exe_suffix, is_service_executable, paths_equal};
use crate::utils::{calculate_checksum, ensure_dir, files_same_content, move_file};

/// One executable, in the backup directory or the install directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupVersion {
    pub filename: String,
    pub file_path: PathBuf,
    /// Modification time
    pub created_at: DateTime<Utc>,
    pub size: u64,
    /// Same content as the running executable
    pub is_current: bool,
}

/// What [`BackupManager::backup_old_executables`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    /// Destinations of the executables that were moved
    pub moved: Vec<PathBuf>,
    /// The running executable, left in place for the relaunch script
    pub deferred: Option<PathBuf>,
}

/// `pre_<tag>_<YYYYMMDD_HHMMSS>_<exe_name>`
#[must_use]
pub fn backup_name(tag: &str, exe_name: &str, now: DateTime<Local>) -> String {
    format!("pre_{}_{}_{}", tag, now.format("%Y%m%d_%H%M%S"), exe_name)
}

/// `pre_rollback_<YYYYMMDD_HHMMSS><exe_suffix>`
#[must_use]
pub fn rollback_backup_name(now: DateTime<Local>) -> String {
    format!("pre_rollback_{}{}", now.format("%Y%m%d_%H%M%S"), exe_suffix())
}

/// The executable image of this process, canonicalized.
#[must_use]
pub fn running_executable() -> Option<PathBuf> {
    std::env::current_exe().ok().map(|p| canonical_or_self(&p))
}

/// Moves, prunes and lists executables for one installation.
#[derive(Debug, Clone)]
pub struct BackupManager {
    install_dir: PathBuf,
    backup_dir: PathBuf,
    max_backups: usize,
    running: Option<PathBuf>,
}

impl BackupManager {
    /// A manager for `install_dir` using the configured backup directory and cap.
    #[must_use]
    pub fn new(config: &UpdaterConfig, install_dir: &Path) -> Self {
        Self {
            install_dir: install_dir.to_path_buf(),
            backup_dir: config.backup_dir(install_dir),
            max_backups: config.backup.max_backups,
            running: running_executable(),
        }
    }

    /// Treats `path` as the running executable instead of this process's image.
    #[must_use]
    pub fn with_running(mut self, path: Option<PathBuf>) -> Self {
        self.running = path.map(|p| canonical_or_self(&p));
        self
    }

    #[must_use]
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    #[must_use]
    pub fn running(&self) -> Option<&Path> {
        self.running.as_deref()
    }

    fn is_running(&self, path: &Path) -> bool {
        self.running.as_deref().is_some_and(|running| paths_equal(&canonical_or_self(path), running))
    }

    /// Moves every executable in the install directory except the running one
    /// into the backup directory, then prunes.
    ///
    /// A file that cannot be renamed (locked, other filesystem) is copied
    /// instead. A missing install directory or one without executables is a
    /// no-op.
    pub fn backup_old_executables(&self, tag: &str, progress: &dyn ProgressSink) -> Result<BackupReport> {
        let mut report = BackupReport::default();
        if !self.install_dir.is_dir() {
            return Ok(report);
        }

        let candidates = executables_in(&self.install_dir)?;
        if candidates.is_empty() {
            return Ok(report);
        }

        ensure_dir(&self.backup_dir)?;
        let now = Local::now();
        for path in candidates {
            if self.is_running(&path) {
                debug!("Deferring running executable {}", path.display());
                report.deferred = Some(path);
                continue;
            }

            let name = file_name(&path);
            let mut dest = self.backup_dir.join(&name);
            if dest.exists() {
                dest = self.backup_dir.join(backup_name(tag, &name, now));
            }

            match move_file(&path, &dest) {
                Ok(()) => {
                    progress.log(&format!("Backed up {name}"));
                    report.moved.push(dest);
                }
                Err(e) => {
                    warn!("Failed to move {}: {:#}", path.display(), e);
                    std::fs::copy(&path, &dest).with_context(|| {
                        format!("Failed to back up {} to {}", path.display(), dest.display())
                    })?;
                    progress.log(&format!("Copied {name} (original still in use)"));
                    report.moved.push(dest);
                }
            }
        }

        self.prune(progress)?;
        Ok(report)
    }

    /// Removes duplicate backups, then all but the newest `max_backups`.
    ///
    /// Files are ranked newest first by modification time; of two files with
    /// the same SHA-256 the older one goes. Files that cannot be hashed are
    /// kept and do not count toward the cap. Returns how many were removed.
    pub fn prune(&self, progress: &dyn ProgressSink) -> Result<usize> {
        if !self.backup_dir.is_dir() {
            return Ok(0);
        }

        let mut seen = HashSet::new();
        let mut kept = 0usize;
        let mut removed = 0usize;
        for path in executables_in(&self.backup_dir)? {
            let checksum = match calculate_checksum(&path) {
                Ok(checksum) => checksum,
                Err(e) => {
                    debug!("Keeping unhashable backup {}: {:#}", path.display(), e);
                    continue;
                }
            };

            let reason = if !seen.insert(checksum) {
                "duplicate"
            } else if kept >= self.max_backups {
                "over limit"
            } else {
                kept += 1;
                continue;
            };

            match std::fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    progress.log(&format!("Removed {} backup {}", reason, file_name(&path)));
                }
                Err(e) => warn!("Failed to remove backup {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("Pruned {} backup(s) in {}", removed, self.backup_dir.display());
        }
        Ok(removed)
    }

    /// Backups newest first after pruning. `limit == 0` lists all.
    pub fn list_backups(&self, limit: usize) -> Result<Vec<BackupVersion>> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }
        self.prune(&|line: &str| debug!("{}", line))?;

        let mut paths = executables_in(&self.backup_dir)?;
        if limit > 0 {
            paths.truncate(limit);
        }
        paths.iter().map(|p| self.describe(p)).collect()
    }

    /// The running executable, or the newest executable in the install
    /// directory when the running image is elsewhere or gone.
    pub fn current_executable(&self) -> Result<Option<BackupVersion>> {
        if let Some(running) = self.running.as_deref().filter(|p| p.is_file()) {
            let mut version = self.describe(running)?;
            version.is_current = true;
            return Ok(Some(version));
        }

        if !self.install_dir.is_dir() {
            return Ok(None);
        }
        match executables_in(&self.install_dir)?.first() {
            Some(path) => {
                let mut version = self.describe(path)?;
                version.is_current = true;
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }

    /// Newest executable in the install directory.
    pub fn newest_executable(&self) -> Result<Option<PathBuf>> {
        if !self.install_dir.is_dir() {
            return Ok(None);
        }
        Ok(executables_in(&self.install_dir)?.into_iter().next())
    }

    fn describe(&self, path: &Path) -> Result<BackupVersion> {
        let metadata =
            std::fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let is_current = self
            .running
            .as_deref()
            .is_some_and(|running| files_same_content(path, running).unwrap_or(false));

        Ok(BackupVersion {
            filename: file_name(path),
            file_path: path.to_path_buf(),
            created_at: DateTime::<Utc>::from(modified),
            size: metadata.len(),
            is_current,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Service executables directly inside `dir`, newest first.
fn executables_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;

    let mut found: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_service_executable(path))
        .map(|path| {
            let modified = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();

    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_exe(path: &Path, content: &str, age_secs: u64) {
        std::fs::write(path, content).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        std::fs::File::options().write(true).open(path).unwrap().set_modified(mtime).unwrap();
    }

    fn exe(name: &str) -> String {
        format!("{name}{}", exe_suffix())
    }

    fn manager(install: &Path) -> BackupManager {
        BackupManager::new(&UpdaterConfig::default(), install).with_running(None)
    }

    #[test]
    fn test_backup_names() {
        let now = Local.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(backup_name("update", "svc.exe", now), "pre_update_20240301_101500_svc.exe");
        assert_eq!(rollback_backup_name(now), format!("pre_rollback_20240301_101500{}", exe_suffix()));
    }

    #[test]
    fn test_prune_dedups_and_caps() {
        let temp = TempDir::new().unwrap();
        let manager = manager(temp.path());
        std::fs::create_dir_all(manager.backup_dir()).unwrap();

        for i in 0..25u64 {
            write_exe(&manager.backup_dir().join(exe(&format!("build-{i:02}"))), &format!("v{i}"), 100 + i);
        }
        // Newest file, same content as build-03.
        write_exe(&manager.backup_dir().join(exe("copy-of-03")), "v3", 1);

        let removed = manager.prune(&|_: &str| {}).unwrap();
        assert_eq!(removed, 6);

        let left = executables_in(manager.backup_dir()).unwrap();
        assert_eq!(left.len(), 20);
        let checksums: HashSet<_> = left.iter().map(|p| calculate_checksum(p).unwrap()).collect();
        assert_eq!(checksums.len(), 20);
        assert!(manager.backup_dir().join(exe("copy-of-03")).exists());
        assert!(!manager.backup_dir().join(exe("build-03")).exists());
        assert!(manager.backup_dir().join(exe("build-00")).exists());
        assert!(!manager.backup_dir().join(exe("build-24")).exists());
    }

    #[test]
    fn test_backup_skips_running_executable() {
        let temp = TempDir::new().unwrap();
        let running = temp.path().join(exe("current"));
        write_exe(&running, "running", 50);
        write_exe(&temp.path().join(exe("older")), "older", 100);
        std::fs::write(temp.path().join("Settings.json"), "{}").unwrap();

        let manager = manager(temp.path()).with_running(Some(running.clone()));
        let report = manager.backup_old_executables("update", &|_: &str| {}).unwrap();

        assert_eq!(report.deferred.as_deref().map(canonical_or_self), Some(canonical_or_self(&running)));
        assert_eq!(report.moved, vec![manager.backup_dir().join(exe("older"))]);
        assert!(running.exists());
        assert!(temp.path().join("Settings.json").exists());
        assert!(!temp.path().join(exe("older")).exists());
    }

    #[test]
    fn test_backup_renames_on_name_clash() {
        let temp = TempDir::new().unwrap();
        let manager = manager(temp.path());
        std::fs::create_dir_all(manager.backup_dir()).unwrap();
        write_exe(&manager.backup_dir().join(exe("svc")), "first", 100);
        write_exe(&temp.path().join(exe("svc")), "second", 10);

        let report = manager.backup_old_executables("build", &|_: &str| {}).unwrap();

        assert_eq!(report.moved.len(), 1);
        let name = file_name(&report.moved[0]);
        assert!(name.starts_with("pre_build_"), "{name}");
        assert!(name.ends_with(&exe("svc")));
    }

    #[test]
    fn test_missing_install_dir_is_noop() {
        let temp = TempDir::new().unwrap();
        let report = manager(&temp.path().join("absent"))
            .backup_old_executables("update", &|_: &str| {})
            .unwrap();
        assert_eq!(report, BackupReport::default());
    }

    #[test]
    fn test_list_backups_marks_current() {
        let temp = TempDir::new().unwrap();
        let running = temp.path().join(exe("running"));
        write_exe(&running, "same", 5);
        let manager = manager(temp.path()).with_running(Some(running));
        std::fs::create_dir_all(manager.backup_dir()).unwrap();
        write_exe(&manager.backup_dir().join(exe("a")), "same", 30);
        write_exe(&manager.backup_dir().join(exe("b")), "other", 10);

        let all = manager.list_backups(0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].filename, exe("b"));
        assert!(!all[0].is_current);
        assert!(all[1].is_current);

        assert_eq!(manager.list_backups(1).unwrap().len(), 1);

        let current = manager.current_executable().unwrap().unwrap();
        assert_eq!(current.filename, exe("running"));
        assert!(current.is_current);
    }
}
