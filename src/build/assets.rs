//! Staging runtime files next to a fresh build

use anyhow::{Context, Result};
use std::path::Path;
use tracing::warn;

use crate::config::AssetEntry;
use crate::status::ProgressSink;
use crate::utils::{copy_dir, ensure_dir};
use crate::utils::fs::copy_dir_missing;

/// Summary of one staging pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedAssets {
    /// Entries copied, fully or partly
    pub copied: usize,
    /// Entries left alone because the destination already existed
    pub kept: usize,
    /// Failures of optional entries
    pub warnings: Vec<String>,
}

/// Copies each entry from `repo_dir` into `install_dir`.
///
/// Entries without `overwrite` only fill in what is missing, so configuration
/// the user already edited survives. A failing optional entry is a warning.
pub fn stage_assets(
    repo_dir: &Path,
    install_dir: &Path,
    entries: &[AssetEntry],
    progress: &dyn ProgressSink,
) -> Result<StagedAssets> {
    let mut staged = StagedAssets::default();

    for entry in entries {
        let source = repo_dir.join(&entry.source);
        let dest = install_dir.join(&entry.dest);

        match stage_entry(&source, &dest, entry.overwrite) {
            Ok(true) => {
                progress.log(&format!("Copied {}", entry.dest));
                staged.copied += 1;
            }
            Ok(false) => {
                progress.log(&format!("Keeping existing {}", entry.dest));
                staged.kept += 1;
            }
            Err(e) if entry.optional => {
                let message = format!("Warning: failed to copy {}: {:#}", entry.source, e);
                warn!("{}", message);
                progress.log(&message);
                staged.warnings.push(message);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to copy {}", entry.source));
            }
        }
    }

    Ok(staged)
}

fn stage_entry(source: &Path, dest: &Path, overwrite: bool) -> Result<bool> {
    if source.is_dir() {
        if overwrite {
            copy_dir(source, dest)?;
            return Ok(true);
        }
        return Ok(copy_dir_missing(source, dest)? > 0 || !dest.exists());
    }

    if !source.is_file() {
        anyhow::bail!("Source not found: {}", source.display());
    }
    if !overwrite && dest.exists() {
        return Ok(false);
    }
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    std::fs::copy(source, dest).with_context(|| {
        format!("Failed to copy {} to {}", source.display(), dest.display())
    })?;
    Ok(true)
}
