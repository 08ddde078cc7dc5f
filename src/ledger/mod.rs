//! Durable record of applied PRs
//!
//! `applied_prs.json` in the install directory maps each applied PR to the
//! local commits its cherry-picks created, so a later revert knows exactly
//! what to undo:
//!
//! ```json
//! {"applied":[12,40],"prs":{"12":{"commits":["9f1c..."]},"40":{"commits":["77ab..."]}}}
//! ```
//!
//! `applied` is kept for older readers. When `prs` is absent or empty the
//! ledger falls back to it, yielding entries with no recorded commits. Writes
//! replace the file atomically.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::UpdaterError;
use crate::utils::fs::atomic_write;

/// Commits a cherry-pick created for one PR, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPrRecord {
    /// Full local commit identifiers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    applied: Vec<i64>,
    #[serde(default)]
    prs: BTreeMap<String, AppliedPrRecord>,
}

#[derive(Serialize)]
struct LedgerFileOut<'a> {
    applied: Vec<u64>,
    prs: &'a BTreeMap<u64, AppliedPrRecord>,
}

/// Handle on the ledger file. Every call rereads the file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// A ledger stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }

    /// File location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries keyed by PR number. A missing file is an empty ledger.
    pub fn load(&self) -> Result<BTreeMap<u64, AppliedPrRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read ledger {}", self.path.display()));
            }
        };

        let file: LedgerFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse ledger {}", self.path.display()))?;

        let mut entries: BTreeMap<u64, AppliedPrRecord> = file
            .prs
            .into_iter()
            .filter_map(|(key, record)| match key.parse::<u64>() {
                Ok(n) if n > 0 => Some((n, record)),
                _ => None,
            })
            .collect();

        if entries.is_empty() {
            entries = file
                .applied
                .into_iter()
                .filter_map(|n| u64::try_from(n).ok().filter(|n| *n > 0))
                .map(|n| (n, AppliedPrRecord::default()))
                .collect();
        }

        Ok(entries)
    }

    /// The entry for `number`, if recorded.
    pub fn get(&self, number: u64) -> Result<Option<AppliedPrRecord>> {
        Ok(self.load()?.remove(&number))
    }

    /// Records `number` as applied. A non-empty `commits` replaces the stored
    /// list; an empty one keeps whatever was recorded before.
    pub fn mark_applied(&self, number: u64, commits: &[String]) -> Result<()> {
        validate_number(number)?;
        let mut entries = self.load()?;
        let entry = entries.entry(number).or_default();
        if !commits.is_empty() {
            entry.commits = commits.to_vec();
        }
        self.save(&entries)
    }

    /// Deletes the entry for `number`. Removing an absent entry is a no-op.
    pub fn remove(&self, number: u64) -> Result<()> {
        validate_number(number)?;
        let mut entries = self.load()?;
        if entries.remove(&number).is_none() {
            return Ok(());
        }
        self.save(&entries)
    }

    fn save(&self, entries: &BTreeMap<u64, AppliedPrRecord>) -> Result<()> {
        let out = LedgerFileOut {
            applied: entries.keys().copied().collect(),
            prs: entries,
        };
        let payload = serde_json::to_vec(&out).context("Failed to serialize ledger")?;
        atomic_write(&self.path, &payload)
            .with_context(|| format!("Failed to write ledger {}", self.path.display()))
    }
}

fn validate_number(number: u64) -> Result<()> {
    if number == 0 {
        return Err(UpdaterError::InvalidPrNumber {
            number: 0,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger(temp: &TempDir) -> Ledger {
        Ledger::new(temp.path().join("applied_prs.json"))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(ledger(&temp).load().unwrap().is_empty());
    }

    #[test]
    fn test_mark_and_remove() {
        let temp = TempDir::new().unwrap();
        let ledger = ledger(&temp);

        ledger.mark_applied(40, &["bbb".to_string()]).unwrap();
        ledger.mark_applied(12, &["aaa".to_string(), "ccc".to_string()]).unwrap();

        let raw = std::fs::read_to_string(ledger.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["applied"], serde_json::json!([12, 40]));
        assert_eq!(value["prs"]["12"]["commits"], serde_json::json!(["aaa", "ccc"]));

        ledger.remove(12).unwrap();
        let entries = ledger.load().unwrap();
        assert_eq!(entries.keys().copied().collect::<Vec<_>>(), vec![40]);

        ledger.remove(999).unwrap();
        assert_eq!(ledger.load().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_commits_keep_previous_list() {
        let temp = TempDir::new().unwrap();
        let ledger = ledger(&temp);
        ledger.mark_applied(5, &["abc".to_string()]).unwrap();
        ledger.mark_applied(5, &[]).unwrap();
        assert_eq!(ledger.get(5).unwrap().unwrap().commits, vec!["abc".to_string()]);
    }

    #[test]
    fn test_falls_back_to_applied_list() {
        let temp = TempDir::new().unwrap();
        let ledger = ledger(&temp);
        std::fs::write(ledger.path(), r#"{"applied":[3,-1,7]}"#).unwrap();

        let entries = ledger.load().unwrap();
        assert_eq!(entries.keys().copied().collect::<Vec<_>>(), vec![3, 7]);
        assert!(entries[&3].commits.is_empty());
    }

    #[test]
    fn test_ignores_bad_keys() {
        let temp = TempDir::new().unwrap();
        let ledger = ledger(&temp);
        std::fs::write(
            ledger.path(),
            r#"{"prs":{"abc":{"commits":["x"]},"0":{"commits":["y"]},"9":{"commits":["z"]}}}"#,
        )
        .unwrap();

        let entries = ledger.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[&9].commits, vec!["z".to_string()]);
    }

    #[test]
    fn test_zero_is_rejected() {
        let temp = TempDir::new().unwrap();
        let err = ledger(&temp).mark_applied(0, &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdaterError>(),
            Some(UpdaterError::InvalidPrNumber { .. })
        ));
    }
}
