//! up - Crossplane package dependencies and function image builds
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! # Directory Layout
//!
//! ```text
//! ~/.up/
//! ├── config.toml   # Optional settings (registry, base images, rewrites)
//! └── cache/        # Decoded packages by <package>/<type>/<version>
//!
//! <project>/
//! ├── upbound.yaml  # Project file; spec.dependsOn is kept up to date
//! ├── .up/          # Language schemas of every cached dependency
//! └── functions/    # One directory per embedded function
//! ```

pub mod cmd;
pub mod ops;
pub mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "up")]
#[command(author, version, about = "Manage Crossplane package dependencies and build functions")]
pub struct Cli {
    /// Directory used for caching package images
    #[arg(long, global = true, env = "UP_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage the dependencies of the current project
    #[command(alias = "dep")]
    Dependency {
        #[command(subcommand)]
        command: DependencyCommands,
    },
    /// Identify and build embedded functions
    #[command(alias = "fn")]
    Function {
        #[command(subcommand)]
        command: FunctionCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum DependencyCommands {
    /// Add a dependency to the current project
    Add {
        /// Package to add: source, source:version or source@constraint
        package: String,
        /// Package kind, when the coordinate is ambiguous
        #[arg(long = "type")]
        package_type: Option<String>,
        /// Path to project definition file
        #[arg(short = 'f', long, default_value = "upbound.yaml")]
        project_file: PathBuf,
    },
    /// Update the dependency cache for the current project
    UpdateCache {
        /// Path to project definition file
        #[arg(short = 'f', long, default_value = "upbound.yaml")]
        project_file: PathBuf,
    },
    /// Clean the dependency cache
    CleanCache,
}

#[derive(Debug, Subcommand)]
pub enum FunctionCommands {
    /// Print the language a function directory is written in
    Identify {
        /// Function source directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Build function images into OCI layouts
    Build {
        /// Functions to build (all functions of the project if empty)
        names: Vec<String>,
        /// Path to project definition file
        #[arg(short = 'f', long, default_value = "upbound.yaml")]
        project_file: PathBuf,
        /// Architectures to build for (defaults to the project's)
        #[arg(long = "arch", value_delimiter = ',')]
        architectures: Vec<String>,
        /// Output directory for image layouts
        #[arg(short, long, default_value = "_output/functions")]
        output_dir: PathBuf,
    },
}

/// Whether a package argument names a version. A bare coordinate resolves
/// to the latest release but is not pinned in the project file.
///
/// ```
/// use up_cli::has_version;
///
/// assert!(has_version("xpkg.upbound.io/upbound/provider-aws-s3:v1.2.0"));
/// assert!(has_version("crossplane-contrib/function-auto-ready@>=v0.2.0"));
/// assert!(!has_version("localhost:5000/upbound/provider-aws-s3"));
/// ```
pub fn has_version(package: &str) -> bool {
    let last = package.rsplit('/').next().unwrap_or(package);
    last.contains(['@', ':'])
}
