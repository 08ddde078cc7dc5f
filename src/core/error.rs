//! Error handling for reforge
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** so callers can branch on what went wrong
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Architecture
//!
//! - [`UpdaterError`] - enumerated failure cases of the update engine
//! - [`ErrorKind`] - the coarse taxonomy every [`UpdaterError`] maps onto
//! - [`ErrorContext`] - wrapper that adds a suggestion and details for display
//!
//! # Error Kinds
//!
//! | Kind          | Meaning                                                        |
//! |---------------|----------------------------------------------------------------|
//! | `Environment` | missing tool, missing network, missing file; nothing committed |
//! | `Conflict`    | version-control conflict handled by the operation's policy     |
//! | `Validation`  | request rejected before any mutation                           |
//! | `Tool`        | an external tool ran and failed                                |
//!
//! Engine functions return `anyhow::Result` and attach context with
//! [`anyhow::Context`]. Use [`error_kind`] to recover the kind from an
//! `anyhow::Error` and [`user_friendly_error`] to render it.

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// Coarse classification of engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// A prerequisite is missing (tool, network, file, installation).
    Environment,
    /// A version-control conflict stopped the operation.
    Conflict,
    /// The request was rejected before anything was touched.
    Validation,
    /// An external tool ran and reported failure.
    Tool,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Environment => "environment",
            Self::Conflict => "conflict",
            Self::Validation => "validation",
            Self::Tool => "tool",
        };
        f.write_str(name)
    }
}

/// Failure cases of the update engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdaterError {
    /// Git executable not found in PATH
    #[error("Git is not installed or not found in PATH")]
    GitNotFound,

    /// A required build tool is missing
    #[error("{tool} is not installed or not found in PATH")]
    ToolNotFound {
        /// Tool name as invoked
        tool: String,
        /// How to install it
        hint: String,
    },

    /// The installation has no usable source repository
    #[error("Source repository is not installed: {reason}")]
    NotInstalled {
        /// Why the repository could not be located or provisioned
        reason: String,
    },

    /// HEAD does not point at a branch
    #[error("Detached HEAD state detected; switch to the mainline branch before updating")]
    DetachedHead,

    /// A git command returned a non-zero exit code
    #[error("Git operation failed: {operation}")]
    GitCommandError {
        /// The git subcommand that failed (e.g. "merge", "stash")
        operation: String,
        /// Captured error output
        stderr: String,
    },

    /// A conflict stopped a merge, cherry-pick or revert
    #[error("Conflict during {operation} on {}", hashes.join(", "))]
    Conflict {
        /// The operation that conflicted
        operation: String,
        /// Short hashes of the commits that conflicted
        hashes: Vec<String>,
    },

    /// PR numbers must be positive
    #[error("Invalid PR number: {number}")]
    InvalidPrNumber {
        /// The rejected number
        number: i64,
    },

    /// Nothing in the ledger to revert
    #[error("No applied commits recorded for PR #{number}")]
    NoAppliedCommits {
        /// The PR that has no ledger entry
        number: u64,
    },

    /// Rollback target escapes the backup directory
    #[error("Backup file must be inside {backup_dir}: {path}")]
    PathOutsideBackupDir {
        /// Requested path
        path: String,
        /// Backup directory it must live in
        backup_dir: String,
    },

    /// Rollback target does not exist
    #[error("Backup file not found: {path}")]
    BackupNotFound {
        /// Requested path
        path: String,
    },

    /// The compiler exited with an error
    #[error("Build failed")]
    BuildFailed {
        /// Combined compiler output
        output: String,
    },

    /// No executable could be found to launch
    #[error("No executable found: {reason}")]
    ExecutableNotFound {
        /// What was searched
        reason: String,
    },

    /// A remote API request failed before a response arrived
    #[error("Network error: {operation}")]
    Network {
        /// The request that failed
        operation: String,
        /// Transport error text
        reason: String,
    },

    /// The remote API answered with a non-success status
    #[error("GitHub API returned status {status}")]
    ApiStatus {
        /// HTTP status code
        status: u16,
        /// First bytes of the response body
        body: String,
    },

    /// Another operation holds the updater
    #[error("Updater is already running another operation: {running}")]
    Busy {
        /// Name of the running operation
        running: String,
    },

    /// Configuration file could not be parsed
    #[error("Invalid configuration in {file}: {reason}")]
    ConfigParse {
        /// Configuration path
        file: String,
        /// Parser message
        reason: String,
    },
}

impl UpdaterError {
    /// The taxonomy bucket this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::GitNotFound
            | Self::ToolNotFound { .. }
            | Self::NotInstalled { .. }
            | Self::DetachedHead
            | Self::ExecutableNotFound { .. }
            | Self::Network { .. }
            | Self::ApiStatus { .. }
            | Self::ConfigParse { .. } => ErrorKind::Environment,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InvalidPrNumber { .. }
            | Self::NoAppliedCommits { .. }
            | Self::PathOutsideBackupDir { .. }
            | Self::BackupNotFound { .. }
            | Self::Busy { .. } => ErrorKind::Validation,
            Self::GitCommandError { .. } | Self::BuildFailed { .. } => ErrorKind::Tool,
        }
    }

    /// Conflicted short hashes, if this is a conflict.
    #[must_use]
    pub fn conflict_hashes(&self) -> &[String] {
        match self {
            Self::Conflict { hashes, .. } => hashes,
            _ => &[],
        }
    }
}

/// Classify any error produced by the engine.
///
/// Errors that did not originate as an [`UpdaterError`] (I/O, JSON, ...) are
/// treated as environment failures.
#[must_use]
pub fn error_kind(error: &anyhow::Error) -> ErrorKind {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<UpdaterError>())
        .map_or(ErrorKind::Environment, UpdaterError::kind)
}

/// A failure rendered for the terminal, with optional guidance.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// The full error chain, outermost context first
    pub message: String,
    /// Taxonomy bucket of the underlying error
    pub kind: ErrorKind,
    /// What the user can do about it
    pub suggestion: Option<String>,
    /// Extra information, usually captured tool output
    pub details: Option<String>,
}

impl ErrorContext {
    /// Wrap a message without guidance.
    pub fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
            suggestion: None,
            details: None,
        }
    }

    /// Attach a suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print to stderr with colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = self.details.as_deref().filter(|d| !d.is_empty()) {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

/// Convert any error into an [`ErrorContext`] suitable for the terminal.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let message = format!("{error:#}");
    if let Some(updater_error) = error.chain().find_map(|c| c.downcast_ref::<UpdaterError>()) {
        return with_guidance(ErrorContext::new(message, updater_error.kind()), updater_error);
    }

    let ctx = ErrorContext::new(message, ErrorKind::Environment);
    let permission_denied = error
        .chain()
        .filter_map(|c| c.downcast_ref::<std::io::Error>())
        .any(|e| e.kind() == std::io::ErrorKind::PermissionDenied);
    if permission_denied {
        return ctx.with_suggestion("Check that the install directory is writable by the current user");
    }
    ctx
}

fn with_guidance(ctx: ErrorContext, error: &UpdaterError) -> ErrorContext {
    match error {
        UpdaterError::GitNotFound => {
            ctx.with_suggestion("Install git from https://git-scm.com/ and make sure it is on PATH")
        }
        UpdaterError::ToolNotFound {
            hint,
            ..
        } => ctx.with_suggestion(hint.clone()),
        UpdaterError::NotInstalled {
            ..
        } => ctx.with_suggestion(
            "Run from inside the source checkout, or empty the managed source directory so it can be cloned",
        ),
        UpdaterError::DetachedHead => ctx.with_suggestion("Run `git switch main` in the source repository"),
        UpdaterError::GitCommandError {
            stderr,
            ..
        } => ctx.with_details(stderr.trim()),
        UpdaterError::Conflict {
            ..
        } => ctx.with_suggestion(
            "The patch set no longer applies cleanly; update to the latest upstream first",
        ),
        UpdaterError::BuildFailed {
            output,
        } => ctx.with_details(output.trim()),
        UpdaterError::ApiStatus {
            status,
            body,
        } => {
            let ctx = ctx.with_details(body.clone());
            if *status == 403 {
                ctx.with_suggestion("GitHub rate limit reached; set github.token in reforge.toml")
            } else {
                ctx
            }
        }
        UpdaterError::Busy {
            ..
        } => ctx.with_suggestion("Wait for the running operation to finish"),
        _ => ctx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(UpdaterError::GitNotFound.kind(), ErrorKind::Environment);
        assert_eq!(
            UpdaterError::Conflict {
                operation: "revert".into(),
                hashes: vec!["abc1234".into()],
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            UpdaterError::PathOutsideBackupDir {
                path: "/etc/passwd".into(),
                backup_dir: "/opt/app/old_versions".into(),
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            UpdaterError::BuildFailed {
                output: String::new(),
            }
            .kind(),
            ErrorKind::Tool
        );
    }

    #[test]
    fn test_error_kind_through_context() {
        use anyhow::Context;

        let result: anyhow::Result<()> = Err(UpdaterError::Conflict {
            operation: "cherry-pick".into(),
            hashes: vec!["deadbee".into()],
        }
        .into());
        let err = result.context("Applying PR #12").unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::Conflict);
    }

    #[test]
    fn test_foreign_errors_are_environment() {
        let err = anyhow::Error::from(std::io::Error::other("disk gone"));
        assert_eq!(error_kind(&err), ErrorKind::Environment);
    }

    #[test]
    fn test_conflict_message_lists_hashes() {
        let err = UpdaterError::Conflict {
            operation: "revert".into(),
            hashes: vec!["aaaaaaa".into(), "bbbbbbb".into()],
        };
        assert_eq!(err.to_string(), "Conflict during revert on aaaaaaa, bbbbbbb");
        assert_eq!(err.conflict_hashes().len(), 2);
    }

    #[test]
    fn test_user_friendly_git_not_found() {
        let ctx = user_friendly_error(UpdaterError::GitNotFound.into());
        assert_eq!(ctx.kind, ErrorKind::Environment);
        assert!(ctx.suggestion.unwrap().contains("git-scm.com"));
    }

    #[test]
    fn test_user_friendly_keeps_outer_context() {
        use anyhow::Context;

        let result: anyhow::Result<()> = Err(UpdaterError::BuildFailed {
            output: "  undefined: thing\n".into(),
        }
        .into());
        let ctx = user_friendly_error(result.context("Rebuilding after update").unwrap_err());
        assert_eq!(ctx.message, "Rebuilding after update: Build failed");
        assert_eq!(ctx.kind, ErrorKind::Tool);
        assert_eq!(ctx.details.as_deref(), Some("undefined: thing"));

        let plain = user_friendly_error(anyhow::anyhow!("2 of 3 PR(s) could not be applied"));
        assert_eq!(plain.message, "2 of 3 PR(s) could not be applied");
        assert!(plain.suggestion.is_none());
    }
}
