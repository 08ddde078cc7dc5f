//! Cross-platform utilities and helpers
//!
//! # Modules
//!
//! - [`fs`] - atomic writes, checksums, copy and move helpers
//! - [`platform`] - executable naming, tool lookup and path comparison

pub mod fs;
pub mod platform;

pub use fs::{atomic_write, calculate_checksum, copy_dir, ensure_dir, files_same_content, move_file};
pub use platform::{command_exists, exe_suffix, get_git_command, is_windows, paths_equal};
