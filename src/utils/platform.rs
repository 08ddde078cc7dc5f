//! Platform-specific helpers
//!
//! The service ships as `<name>.exe` on Windows and as an extension-less
//! executable elsewhere; path comparisons are case-insensitive on Windows.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Checks if running on Windows.
#[must_use]
pub const fn is_windows() -> bool {
    cfg!(windows)
}

/// The platform-appropriate git binary name.
#[must_use]
pub const fn get_git_command() -> &'static str {
    if cfg!(windows) {
        "git.exe"
    } else {
        "git"
    }
}

/// Suffix appended to built executables (`.exe` on Windows, empty elsewhere).
#[must_use]
pub const fn exe_suffix() -> &'static str {
    std::env::consts::EXE_SUFFIX
}

/// Whether `cmd` resolves on PATH.
#[must_use]
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Compares two paths the way the host filesystem does.
///
/// Windows compares case-insensitively; other platforms compare exactly.
#[must_use]
pub fn paths_equal(a: &Path, b: &Path) -> bool {
    if cfg!(windows) {
        a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
    } else {
        a == b
    }
}

/// Canonicalizes `path`, falling back to the path itself when it cannot be
/// resolved (for example because it does not exist yet).
#[must_use]
pub fn canonical_or_self(path: &Path) -> PathBuf {
    canonicalize_stripped(path).unwrap_or_else(|_| path.to_path_buf())
}

fn canonicalize_stripped(path: &Path) -> Result<PathBuf> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("Failed to canonicalize {}", path.display()))?;
    // Strip the verbatim prefix Windows adds so comparisons with user input work.
    #[cfg(windows)]
    {
        let raw = canonical.to_string_lossy();
        if let Some(stripped) = raw.strip_prefix(r"\\?\") {
            return Ok(PathBuf::from(stripped));
        }
    }
    Ok(canonical)
}

/// Whether `path` is an executable the service may have produced.
///
/// On Windows this is any `.exe`. On Unix it is a regular file with an
/// execute bit that is not a launcher script.
#[must_use]
pub fn is_service_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(windows)]
    {
        path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
    }

    #[cfg(not(windows))]
    {
        use std::os::unix::fs::PermissionsExt;

        if metadata.permissions().mode() & 0o111 == 0 {
            return false;
        }
        !matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("sh" | "bat" | "cmd" | "ps1" | "py")
        )
    }
}
