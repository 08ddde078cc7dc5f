//! Test utilities for reforge
//!
//! Helpers for building throwaway git topologies (a bare "upstream", an
//! authoring clone and the service's source checkout) and for initializing
//! logging once per test binary.
//!
//! # Example
//!
//! ```rust,no_run
//! use reforge::test_utils::UpstreamFixture;
//!
//! # fn example() -> anyhow::Result<()> {
//! let temp = tempfile::TempDir::new()?;
//! let fixture = UpstreamFixture::new(temp.path())?;
//! fixture.publish("notes.txt", "hello\n", "Add notes")?;
//! # Ok(())
//! # }
//! ```

pub mod git_helper;

pub use git_helper::{TestGit, UpstreamFixture};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests, once per process.
///
/// Uses `level` when given, otherwise `RUST_LOG`; with neither, logging stays
/// off.
///
/// ```bash
/// RUST_LOG=git=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
