//! Constants shared across the engine.
//!
//! File names, limits and timeouts that more than one module depends on.

use std::time::Duration;

/// Default managed clone directory, relative to the working directory.
pub const SOURCE_DIR_NAME: &str = ".reforge-src";

/// Default backup directory, relative to the install directory.
pub const BACKUP_DIR_NAME: &str = "old_versions";

/// Ledger file name, stored in the install directory.
pub const LEDGER_FILE_NAME: &str = "applied_prs.json";

/// Configuration file name, looked up in the install directory.
pub const CONFIG_FILE_NAME: &str = "reforge.toml";

/// Environment variable overriding the configuration path.
pub const CONFIG_PATH_ENV: &str = "REFORGE_CONFIG_PATH";

/// Maximum number of content-unique backups kept after a prune pass.
pub const MAX_BACKUPS: usize = 20;

/// Number of log lines retained in [`crate::status::UpdaterStatus`].
pub const STATUS_LOG_CAPACITY: usize = 100;

/// Commits returned in each direction by an update check.
pub const UPDATE_CHECK_LOG_LIMIT: usize = 10;

/// Default port the managed service listens on.
pub const DEFAULT_SERVICE_PORT: u16 = 8087;

/// Seconds the relaunch script waits for the service port to close.
pub const PORT_RELEASE_WAIT_SECS: u32 = 60;

/// Stash label used by `perform_update`.
pub const UPDATE_STASH_LABEL: &str = "reforge-updater";

/// Stash label used by `revert_pr`.
pub const REVERT_STASH_LABEL: &str = "reforge-updater-revert";

/// Timeout for remote patch-metadata requests (15 seconds).
pub fn api_timeout() -> Duration {
    Duration::from_secs(15)
}

/// Pause before an automatic restart so the final status reaches pollers.
pub fn restart_grace_period() -> Duration {
    Duration::from_secs(2)
}
