//! Error taxonomy for the dependency engine and the function builders.
//!
//! Library code returns [`Error`]; the CLI converts it into `anyhow` at the
//! edge. Each layer wraps what it propagates with the operation and the
//! coordinate it was working on through [`ResultExt::with_context`].

use std::fmt;

use thiserror::Error;
use up_schema::VersionError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid package reference: {0}")]
    InvalidReference(String),

    #[error("invalid dependency constraint: {0}")]
    InvalidConstraint(#[from] VersionError),

    /// No cache entry, or no locally cached version satisfies a constraint.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("no suitable builder found")]
    NoBuilder,

    #[error("invalid image: {0}")]
    Image(String),

    #[error("invalid package: {0}")]
    Package(String),

    /// An external compiler exited unsuccessfully.
    #[error("toolchain failed: {0}")]
    Toolchain(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// True for the "not yet fetched" condition, looking through context
    /// wrappers.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// The innermost error beneath any context wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Registry transport faults and version resolution failures.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    /// HTTP 404 for a manifest, blob or repository.
    #[error("manifest unknown: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("no manifest for platform {0}")]
    PlatformNotFound(String),

    #[error("supplied tag does not exist in the registry")]
    TagDoesNotExist,

    #[error(
        "supplied version does not match an existing version. Latest available versions: [{}]",
        .available.join(" ")
    )]
    NoMatchingVersion { available: Vec<String> },
}

/// Step of a function image build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Parse,
    Pull,
    Strip,
    Layer,
    Append,
    Config,
    Compile,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parse => "parse",
            Self::Pull => "pull",
            Self::Strip => "strip",
            Self::Layer => "layer",
            Self::Append => "append",
            Self::Config => "config",
            Self::Compile => "compile",
        };
        f.write_str(s)
    }
}

/// A build failure naming the stage and architecture it happened in.
#[derive(Error, Debug)]
#[error("{stage} failed for architecture {arch}: {source}")]
pub struct BuildError {
    pub stage: BuildStage,
    pub arch: String,
    #[source]
    pub source: Box<Error>,
}

/// Context helpers for [`Result`].
pub trait ResultExt<T> {
    /// Wrap the error with a description of the operation.
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;

    /// Attribute the error to a build stage for `arch`.
    fn stage(self, stage: BuildStage, arch: &str) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| Error::Context {
            context: f().into(),
            source: Box::new(e.into()),
        })
    }

    fn stage(self, stage: BuildStage, arch: &str) -> Result<T> {
        self.map_err(|e| {
            Error::Build(BuildError {
                stage,
                arch: arch.to_string(),
                source: Box::new(e.into()),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_through_context() {
        let res: Result<()> = Err(Error::NotFound("acme/fn".into()));
        let err = res.with_context(|| "failed to resolve acme/fn").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "failed to resolve acme/fn: not found: acme/fn");

        let other = Error::Image("bad".into());
        assert!(!other.is_not_found());
    }

    #[test]
    fn test_no_matching_version_message() {
        let err = RegistryError::NoMatchingVersion {
            available: vec!["v1.0.0".into(), "v2.0.0".into(), "v3.0.0".into()],
        };
        assert_eq!(
            err.to_string(),
            "supplied version does not match an existing version. Latest available versions: [v1.0.0 v2.0.0 v3.0.0]"
        );
    }

    #[test]
    fn test_build_error_names_stage_and_arch() {
        let res: Result<()> = Err(Error::Image("boom".into()));
        let err = res.stage(BuildStage::Pull, "arm64").unwrap_err();
        assert_eq!(
            err.to_string(),
            "pull failed for architecture arm64: invalid image: boom"
        );
    }
}
