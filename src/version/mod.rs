//! Build identity of the running service
//!
//! A binary produced by the build pipeline carries its source commit as
//! compile-time constants (`REFORGE_BUILD_COMMIT`, `REFORGE_BUILD_COMMIT_TIME`).
//! Without them the identity is read from the source repository.

use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::path::Path;

use crate::config::UpdaterConfig;
use crate::git::{GitRepo, short_hash};
use crate::repo::{self, RepositoryContext};

const EMBEDDED_COMMIT: Option<&str> = option_env!("REFORGE_BUILD_COMMIT");
const EMBEDDED_COMMIT_TIME: Option<&str> = option_env!("REFORGE_BUILD_COMMIT_TIME");

/// Identity of a build or checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Abbreviated commit hash
    pub commit_hash: String,
    /// Commit date, when known
    pub commit_date: Option<DateTime<FixedOffset>>,
    /// Subject line; empty for embedded identities
    pub commit_message: String,
    /// Branch name; `unknown` for embedded identities, `HEAD` when detached
    pub branch: String,
    #[serde(skip)]
    full_hash: String,
}

impl VersionInfo {
    /// Full commit identifier.
    #[must_use]
    pub fn full_hash(&self) -> &str {
        if self.full_hash.is_empty() {
            &self.commit_hash
        } else {
            &self.full_hash
        }
    }

    /// Builds an identity from compile-time values. A blank commit yields `None`.
    #[must_use]
    pub fn from_embedded(commit: &str, commit_time: Option<&str>) -> Option<Self> {
        let commit = commit.trim();
        if commit.is_empty() {
            return None;
        }
        let commit_date = commit_time
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok());

        Some(Self {
            commit_hash: short_hash(commit),
            commit_date,
            commit_message: String::new(),
            branch: "unknown".to_string(),
            full_hash: commit.to_string(),
        })
    }
}

/// The identity baked into this binary, if any.
#[must_use]
pub fn embedded_version() -> Option<VersionInfo> {
    VersionInfo::from_embedded(EMBEDDED_COMMIT?, EMBEDDED_COMMIT_TIME)
}

/// Current identity: embedded first, then the source repository (which may
/// be cloned).
pub async fn current_version(config: &UpdaterConfig) -> Result<Option<VersionInfo>> {
    if let Some(embedded) = embedded_version() {
        return Ok(Some(embedded));
    }
    let ctx = RepositoryContext::resolve(config).await?;
    repository_version(&ctx.repo_dir).await
}

/// Current identity without provisioning a repository.
pub async fn current_version_no_clone(config: &UpdaterConfig) -> Result<Option<VersionInfo>> {
    if let Some(embedded) = embedded_version() {
        return Ok(Some(embedded));
    }
    match repo::locate_existing(config)? {
        Some(repo_dir) => repository_version(&repo_dir).await,
        None => Ok(None),
    }
}

/// Identity of the checkout at `repo_dir`: `HEAD`, else `main`, else
/// `origin/main`. `Ok(None)` when none resolves.
pub async fn repository_version(repo_dir: &Path) -> Result<Option<VersionInfo>> {
    let repo = GitRepo::new(repo_dir);

    let mut full_hash = None;
    for reference in ["HEAD", "main", "origin/main"] {
        if let Some(hash) = repo.try_rev_parse(reference).await? {
            full_hash = Some(hash);
            break;
        }
    }
    let Some(full_hash) = full_hash else {
        return Ok(None);
    };

    let (commit_date, commit_message) = repo.date_and_subject(&full_hash).await?;
    let branch = repo.current_branch().await?;

    Ok(Some(VersionInfo {
        commit_hash: short_hash(&full_hash),
        commit_date,
        commit_message,
        branch,
        full_hash,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestGit;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_from_embedded() {
        let info = VersionInfo::from_embedded(
            "0123456789abcdef0123456789abcdef01234567",
            Some("2024-05-01T12:00:00+02:00"),
        )
        .unwrap();
        assert_eq!(info.commit_hash, "0123456");
        assert_eq!(info.full_hash(), "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(info.branch, "unknown");
        assert!(info.commit_message.is_empty());
        assert!(info.commit_date.is_some());
    }

    #[test]
    fn test_from_embedded_bad_time() {
        let info = VersionInfo::from_embedded("abc", Some("yesterday")).unwrap();
        assert!(info.commit_date.is_none());
        assert!(VersionInfo::from_embedded("  ", None).is_none());
    }

    #[tokio::test]
    async fn test_repository_version() {
        let temp = TempDir::new().unwrap();
        let git = TestGit::new(temp.path());
        git.init().unwrap();
        git.config_user().unwrap();
        let head = git.commit_file("a.txt", "a\n", "Add a").unwrap();

        let info = repository_version(temp.path()).await.unwrap().unwrap();
        assert_eq!(info.full_hash(), head);
        assert_eq!(info.commit_hash.len(), 7);
        assert_eq!(info.commit_message, "Add a");
        assert_eq!(info.branch, "main");
        assert!(info.commit_date.is_some());
    }

    #[tokio::test]
    #[serial]
    async fn test_lookup_from_working_directory() {
        let temp = TempDir::new().unwrap();
        let checkout = temp.path().join("svc");
        let nested = checkout.join("cmd");
        std::fs::create_dir_all(&nested).unwrap();
        let git = TestGit::new(&checkout);
        git.init().unwrap();
        git.config_user().unwrap();
        let head = git.commit_file("a.txt", "a\n", "Add a").unwrap();
        let bare = temp.path().join("bare");
        std::fs::create_dir_all(&bare).unwrap();

        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(&nested).unwrap();
        let found = current_version_no_clone(&UpdaterConfig::default()).await;
        let resolved = current_version(&UpdaterConfig::default()).await;
        std::env::set_current_dir(&bare).unwrap();
        let missing = current_version_no_clone(&UpdaterConfig::default()).await;
        std::env::set_current_dir(previous).unwrap();

        assert_eq!(found.unwrap().unwrap().full_hash(), head);
        assert_eq!(resolved.unwrap().unwrap().full_hash(), head);
        assert!(missing.unwrap().is_none());
        assert!(!bare.join(".reforge-src").exists());
    }

    #[tokio::test]
    async fn test_repository_version_empty_repo() {
        let temp = TempDir::new().unwrap();
        TestGit::new(temp.path()).init().unwrap();
        assert!(repository_version(temp.path()).await.unwrap().is_none());
    }
}
