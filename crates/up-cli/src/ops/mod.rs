//! Command plumbing shared across subcommands.

pub mod context;

use std::path::Path;

use anyhow::{Result, anyhow};
use up_core::project::Project;

pub use context::{Context, MODELS_DIR};

/// Load the project file. Its directory is the project root.
pub fn open_project(project_file: &Path) -> Result<Project> {
    let path = std::path::absolute(project_file)?;
    Project::load(&path).map_err(|e| {
        tracing::debug!(path = %path.display(), error = %e, "failed to load project file");
        anyhow!("this is not a project directory")
    })
}
