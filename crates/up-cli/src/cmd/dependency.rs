//! `up dependency` commands

use std::path::Path;

use anyhow::{Context as _, Result};
use up_core::dep::Cache;
use up_schema::Dependency;

use crate::has_version;
use crate::ops::{Context, open_project};

/// Fetch `package` with its dependencies into the cache and record it in the
/// project file.
pub async fn add(ctx: &Context, package: &str, package_type: Option<&str>, project_file: &Path) -> Result<()> {
    let mut project = open_project(project_file)?;
    let requested = match package_type {
        Some(kind) => Dependency::with_type(package, kind),
        None => Dependency::parse(package),
    };

    let manager = ctx.manager(project.root())?;
    let (mut resolved, _) = manager
        .add_all(&requested)
        .await
        .with_context(|| format!("in {package}"))?;
    ctx.sync();
    ctx.output
        .success(&format!("{}:{} added to cache", resolved.package, resolved.constraints));

    // Pin what the user asked for; a bare coordinate pins the resolved tag.
    if has_version(package) {
        resolved.constraints = requested.constraints;
    }
    project.upsert_dependency(&resolved)?;
    project.save()?;
    ctx.output.success(&format!(
        "{}:{} added to project dependency",
        resolved.package, resolved.constraints
    ));
    Ok(())
}

/// Fetch every dependency listed in the project file.
pub async fn update_cache(ctx: &Context, project_file: &Path) -> Result<()> {
    let project = open_project(project_file)?;
    let deps = project.dependencies();
    let manager = ctx.manager(project.root())?;

    ctx.output.info(&format!("Updating {} dependencies...", deps.len()));
    let mut resolved = Vec::with_capacity(deps.len());
    for dep in &deps {
        let (pinned, _) = manager.add_all(dep).await?;
        resolved.push(pinned);
    }
    ctx.sync();

    if resolved.is_empty() {
        ctx.output.warning("No dependencies specified.");
        return Ok(());
    }
    ctx.output.success("Dependencies added to cache:");
    for dep in &resolved {
        ctx.output.success(&format!("- {} ({})", dep.package, dep.constraints));
    }
    Ok(())
}

/// Empty the package cache.
pub fn clean_cache(ctx: &Context) -> Result<()> {
    ctx.cache()?.clean()?;
    ctx.output.plain("xpkg cache cleaned");
    Ok(())
}
