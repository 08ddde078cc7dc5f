//! Core types for reforge
//!
//! This module holds the error taxonomy shared by every engine component.
//!
//! ## `error` - Error Handling
//!
//! - [`UpdaterError`] - enumerated failure cases of the update engine
//! - [`ErrorKind`] - environment / conflict / validation / tool classification
//! - [`ErrorContext`] - user-facing wrapper with suggestions and details
//! - [`user_friendly_error`] - convert any error to the user-facing form

pub mod error;

pub use error::{ErrorContext, ErrorKind, UpdaterError, error_kind, user_friendly_error};
