//! reforge: self-update engine for a long-running service
//!
//! The engine keeps an installed service current with an upstream git
//! repository. It can merge upstream changes, apply or revert individual pull
//! requests, rebuild the executable with an external toolchain and swap the
//! running binary through a detached launcher script, keeping retained
//! backups for rollback.
//!
//! # Layout
//!
//! ```text
//! service   UpdaterService: guard, status, spawned operations
//!   ├── patch      update / cherry-pick / revert against the checkout
//!   ├── build      external toolchain + runtime assets
//!   ├── backup     retained executables, prune, listings
//!   └── relaunch   launcher scripts, restart, rollback
//! repo · version · ledger · github · git · status · config · core · utils
//! ```
//!
//! Operations report through [`status::ProgressSink`]; errors are
//! [`anyhow::Error`] chains carrying a [`core::UpdaterError`] whose
//! [`core::ErrorKind`] tells callers how to react.
//!
//! # Example
//!
//! ```rust,no_run
//! use reforge::config::UpdaterConfig;
//! use reforge::service::UpdaterService;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = UpdaterService::builder(UpdaterConfig::default()).build()?;
//! let check = service.check_for_updates().await?;
//! if check.has_updates {
//!     service.start_update(true)?.wait().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod build;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod git;
pub mod github;
pub mod ledger;
pub mod patch;
pub mod relaunch;
pub mod repo;
pub mod service;
pub mod status;
pub mod utils;
pub mod version;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
