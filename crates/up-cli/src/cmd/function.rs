//! `up function` commands

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use futures::stream::{self, StreamExt};
use up_core::functions::{DefaultIdentifier, Identifier};
use up_core::oci::layout::write_layout;
use up_core::tree::{DirTree, SourceTree};

use crate::ops::{Context, open_project};

/// Print the builder that would build the function in `path`.
pub fn identify(ctx: &Context, path: &Path) -> Result<()> {
    let identifier = DefaultIdentifier::new(ctx.builder_config(&[]));
    let builder = identifier
        .identify(&DirTree::new(path))
        .with_context(|| format!("failed to identify function in {}", path.display()))?;
    ctx.output.plain(builder.name());
    Ok(())
}

/// Function directories under `dir`, sorted by name.
fn discover(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Build each named function (every function of the project when `names` is
/// empty) and write one OCI image layout per function to
/// `<output_dir>/<name>`.
pub async fn build(
    ctx: &Context,
    project_file: &Path,
    names: &[String],
    architectures: &[String],
    output_dir: &Path,
) -> Result<()> {
    let project = open_project(project_file)?;
    let functions_dir = project.functions_dir();
    let names = if names.is_empty() {
        discover(&functions_dir)?
    } else {
        names.to_vec()
    };
    if names.is_empty() {
        ctx.output.warning("No functions found.");
        return Ok(());
    }

    let architectures = if architectures.is_empty() {
        project.architectures()
    } else {
        architectures.to_vec()
    };
    let output_dir = if output_dir.is_absolute() {
        output_dir.to_path_buf()
    } else {
        project.root().join(output_dir)
    };

    let identifier = DefaultIdentifier::new(ctx.builder_config(project.image_configs()));
    let concurrency = ctx.config.build_concurrency.max(1);

    let results: Vec<Result<(String, &'static str, String)>> = stream::iter(names)
        .map(|name| {
            let dir = functions_dir.join(&name);
            let out = output_dir.join(&name);
            let identifier = &identifier;
            let architectures = &architectures;
            async move {
                let (language, digest) = build_one(identifier, dir, architectures, &out)
                    .await
                    .with_context(|| format!("failed to build function {name}"))?;
                Ok((name, language, digest))
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    ctx.sync();

    let mut failed = 0;
    for result in results {
        match result {
            Ok((name, language, digest)) => ctx.output.success(&format!(
                "{name} ({language}) built for {}: {digest}",
                architectures.join(", ")
            )),
            Err(e) => {
                failed += 1;
                ctx.output.warning(&format!("{e:#}"));
            }
        }
    }
    if failed > 0 {
        bail!("{failed} function(s) failed to build");
    }
    Ok(())
}

async fn build_one(
    identifier: &DefaultIdentifier,
    dir: PathBuf,
    architectures: &[String],
    out: &Path,
) -> Result<(&'static str, String)> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let tree: Arc<dyn SourceTree> = Arc::new(DirTree::new(&dir));
    let builder = identifier.identify(tree.as_ref())?;
    tracing::info!(function = %dir.display(), builder = builder.name(), "building");

    let images = builder.build(tree, architectures, Some(dir)).await?;
    if out.exists() {
        std::fs::remove_dir_all(out)?;
    }
    let digest = write_layout(out, &images)?;
    Ok((builder.name(), digest))
}
