pub mod archive;
pub mod config;
pub mod dep;
pub mod error;
pub mod functions;
pub mod oci;
pub mod paths;
pub mod project;
pub mod rewrite;
pub mod tree;

pub mod reporter;

pub use config::Config;
pub use error::{BuildError, BuildStage, Error, RegistryError, Result};
pub use paths::*;
pub use reporter::{NullReporter, Reporter};

/// User Agent string for registry requests
pub const USER_AGENT: &str = concat!("up-core/", env!("CARGO_PKG_VERSION"));
