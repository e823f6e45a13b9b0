//! sync-scanner: walks a repository directory and turns it into file
//! records with content block hashes.
//!
//! The walker makes two passes: one to load ignore patterns, one to hash.
//! Hooks let the caller plug in the surrounding machinery without this
//! crate knowing about it:
//! - [`TempNamer`] recognises (and names) in-flight temporary files
//! - [`CurrentFiler`] serves the record from the previous scan so unchanged
//!   files are not re-hashed
//! - [`Suppressor`] rate-limits files that change too often

pub mod blocks;
pub mod config;
pub mod ignore;
pub mod temp;
pub mod walk;

pub use blocks::blocks;
pub use config::ScanConfig;
pub use ignore::IgnorePatterns;
pub use temp::{DefaultTempNamer, TempNamer};
pub use walk::{CurrentFiler, Suppressor, WalkError, Walker};
