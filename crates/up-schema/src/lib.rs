//! Shared types for Crossplane package dependencies and function builds.
//!
//! This crate is deliberately free of I/O. It holds the vocabulary that the
//! dependency engine, the function builders and the CLI all speak:
//!
//! - [`Dependency`] and [`PackageType`]: what a package depends on.
//! - [`Version`] and [`Constraint`]: lenient semver as used by registry tags.
//! - [`Platform`]: the `os/arch` pair an image is built for.
//! - [`Event`]: progress signals emitted by long-running operations.
//! - [`xpkg`]: annotation keys and file names of the xpkg image format.

pub mod event;
pub mod platform;
pub mod types;
pub mod version;
pub mod xpkg;

// Re-exports
pub use event::*;
pub use platform::*;
pub use types::*;
pub use version::{Constraint, Version, VersionError};
