//! File system utilities
//!
//! Writes that other processes may read concurrently (the ledger) go through
//! [`atomic_write`]. Executables are compared with [`files_same_content`] and
//! fingerprinted with [`calculate_checksum`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use reforge::utils::fs::{atomic_write, calculate_checksum};
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! atomic_write(Path::new("applied_prs.json"), b"{}")?;
//! let checksum = calculate_checksum(Path::new("applied_prs.json"))?;
//! println!("sha256: {checksum}");
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;
use walkdir::WalkDir;

/// Creates `path` and its parents if missing.
///
/// Fails when `path` exists but is not a directory.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("Path exists but is not a directory: {}", path.display());
        }
        return Ok(());
    }
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

/// Writes `content` to `path` atomically.
///
/// Content goes to a sibling `.tmp` file which is synced and renamed over the
/// target, so readers see either the old or the new file, never a partial one.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }

    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

        file.write_all(content)
            .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;

        file.sync_all().with_context(|| "Failed to sync file to disk")?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("Failed to rename temp file to: {}", path.display()));
    }

    Ok(())
}

/// Recursively copies `src` into `dst`, overwriting existing files.
///
/// Symlinks and special files are skipped.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    copy_tree(src, dst, true).map(|_| ())
}

/// Recursively copies `src` into `dst`, leaving files that already exist in
/// `dst` untouched. Returns the number of files copied.
pub fn copy_dir_missing(src: &Path, dst: &Path) -> Result<usize> {
    copy_tree(src, dst, false)
}

fn copy_tree(src: &Path, dst: &Path, overwrite: bool) -> Result<usize> {
    ensure_dir(dst)?;
    let mut copied = 0;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry =
            entry.with_context(|| format!("Failed to read directory: {}", src.display()))?;
        let relative = entry.path().strip_prefix(src).with_context(|| {
            format!("{} is not under {}", entry.path().display(), src.display())
        })?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else if entry.file_type().is_file() {
            if !overwrite && target.exists() {
                continue;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy file from {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Removes a directory tree; a missing directory is not an error.
pub fn remove_dir_all(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Moves `src` to `dst`, copying and deleting when a rename is not possible
/// (for example across filesystems).
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    fs::copy(src, dst).with_context(|| {
        format!("Failed to copy {} to {}", src.display(), dst.display())
    })?;
    fs::remove_file(src).with_context(|| format!("Failed to remove {}", src.display()))?;
    Ok(())
}

/// Hex-encoded SHA-256 of a file's contents.
///
/// The file is streamed, so large executables are not loaded into memory.
pub fn calculate_checksum(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to read file for checksum: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read file for checksum: {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Whether two files have identical contents: sizes first, then SHA-256.
pub fn files_same_content(a: &Path, b: &Path) -> Result<bool> {
    let size_a = fs::metadata(a).with_context(|| format!("Failed to stat {}", a.display()))?.len();
    let size_b = fs::metadata(b).with_context(|| format!("Failed to stat {}", b.display()))?.len();
    if size_a != size_b {
        return Ok(false);
    }
    Ok(calculate_checksum(a)? == calculate_checksum(b)?)
}
