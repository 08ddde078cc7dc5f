//! Single-operation guard
//!
//! At most one update, build, rollback, cherry-pick or revert runs at a time.
//! [`OperationGuard::try_start`] hands out an [`OperationPermit`]; dropping
//! the permit frees the slot, so a panicking operation cannot wedge the guard.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// The mutating operations the guard serializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Update,
    Build,
    Rollback,
    CherryPick,
    Revert,
}

impl OperationKind {
    /// Human-readable name used in `Busy` errors and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Build => "build",
            Self::Rollback => "rollback",
            Self::CherryPick => "cherry-pick",
            Self::Revert => "revert",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared slot for the running operation. Cloning shares the slot.
#[derive(Debug, Clone, Default)]
pub struct OperationGuard {
    current: Arc<Mutex<Option<OperationKind>>>,
}

impl OperationGuard {
    /// An empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<OperationKind>> {
        // The slot holds plain data, so a poisoned lock is still consistent.
        self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Claims the slot for `kind`, or returns `None` while another operation runs.
    #[must_use]
    pub fn try_start(&self, kind: OperationKind) -> Option<OperationPermit> {
        let mut slot = self.slot();
        if slot.is_some() {
            return None;
        }
        *slot = Some(kind);
        tracing::debug!("Operation {} started", kind);
        Some(OperationPermit {
            guard: self.clone(),
            kind,
            released: false,
        })
    }

    /// The running operation, if any.
    #[must_use]
    pub fn current(&self) -> Option<OperationKind> {
        *self.slot()
    }
}

/// Proof of holding the guard. Releases the slot on drop.
#[derive(Debug)]
pub struct OperationPermit {
    guard: OperationGuard,
    kind: OperationKind,
    released: bool,
}

impl OperationPermit {
    /// The operation this permit was issued for.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Releases the slot now instead of at drop.
    pub fn release(mut self) {
        self.release_slot();
    }

    fn release_slot(&mut self) {
        if !self.released {
            *self.guard.slot() = None;
            self.released = true;
            tracing::debug!("Operation {} finished", self.kind);
        }
    }
}

impl Drop for OperationPermit {
    fn drop(&mut self) {
        self.release_slot();
    }
}
