//! Shared pieces of the layering builders: pulling a runtime base, packing
//! the source tree and fanning out one task per architecture.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use up_schema::{Platform, xpkg};

use super::ImageSource;
use crate::archive::{PackOptions, pack_tree};
use crate::error::{BuildStage, Error, Result, ResultExt};
use crate::oci::{Image, Layer, Reference};
use crate::reporter::{Reporter, track};
use crate::rewrite::{ImageConfig, rewrite_image};
use crate::tree::SourceTree;

/// Owner of function pods' processes.
pub(crate) const FUNCTION_RUNNER_UID: u64 = 2000;
pub(crate) const FUNCTION_RUNNER_GID: u64 = 2000;

/// Layers of a package image that are not part of the runtime.
const NON_RUNTIME_ANNOTATIONS: [&str; 4] = [
    xpkg::PACKAGE_ANNOTATION,
    xpkg::EXAMPLES_ANNOTATION,
    xpkg::SCHEMA_KCL_ANNOTATION,
    xpkg::SCHEMA_PYTHON_ANNOTATION,
];

/// How a language lays its source onto a base image.
#[derive(Debug)]
pub(crate) struct Recipe {
    pub(crate) language: &'static str,
    /// Where the tree lands in the image.
    pub(crate) mount: &'static str,
    pub(crate) owner: Option<(u64, u64)>,
    /// Check the base architecture and drop package layers.
    pub(crate) strip: bool,
    pub(crate) env: &'static [(&'static str, &'static str)],
}

/// A base image plus a [`Recipe`], shared by the per-arch tasks.
pub(crate) struct Layered {
    pub(crate) recipe: &'static Recipe,
    pub(crate) base_image: String,
    pub(crate) image_configs: Vec<ImageConfig>,
    pub(crate) source: Arc<dyn ImageSource>,
    pub(crate) reporter: Option<Arc<dyn Reporter>>,
}

impl std::fmt::Debug for Layered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layered")
            .field("language", &self.recipe.language)
            .field("base_image", &self.base_image)
            .finish_non_exhaustive()
    }
}

impl Layered {
    /// The base image reference after mirror rewrites.
    pub(crate) fn base_reference(&self) -> Result<Reference> {
        let image = rewrite_image(&self.base_image, &self.image_configs);
        Reference::parse(&image)
            .with_context(|| format!("failed to parse {} base image tag", self.recipe.language))
    }

    pub(crate) async fn build(
        self: Arc<Self>,
        tree: Arc<dyn SourceTree>,
        architectures: &[String],
        mount_base: Option<PathBuf>,
    ) -> Result<Vec<Image>> {
        per_arch(architectures, |arch| {
            let this = self.clone();
            let tree = tree.clone();
            let mount_base = mount_base.clone();
            async move { this.build_arch(tree.as_ref(), &arch, mount_base.as_deref()).await }
        })
        .await
    }

    async fn build_arch(&self, tree: &dyn SourceTree, arch: &str, mount_base: Option<&Path>) -> Result<Image> {
        let recipe = self.recipe;
        let text = format!("Building {} function for {arch}", recipe.language);

        track(self.reporter.as_ref(), &text, async {
            let reference = self.base_reference().stage(BuildStage::Parse, arch)?;
            let mut image = if recipe.strip {
                runtime_base(self.source.as_ref(), &reference, arch).await?
            } else {
                self.source
                    .image(&reference, &Platform::linux(arch))
                    .await
                    .with_context(|| format!("failed to fetch {} base image", recipe.language))
                    .stage(BuildStage::Pull, arch)?
            };

            let mut opts = PackOptions::default();
            if let Some(base) = mount_base.or(tree.os_root()) {
                opts = opts.with_symlink_base(base);
            }
            if let Some((uid, gid)) = recipe.owner {
                opts = opts.with_owner(uid, gid);
            }
            let layer = code_layer(tree, recipe.mount, &opts).stage(BuildStage::Layer, arch)?;

            append_code(&mut image, layer).stage(BuildStage::Append, arch)?;
            for (key, value) in recipe.env {
                image.set_env(key, value);
            }

            let digest = image.digest().stage(BuildStage::Config, arch)?;
            tracing::debug!(language = recipe.language, arch, %digest, "built function image");
            Ok::<_, Error>(image)
        })
        .await
    }
}

/// Pull `reference` for `arch` and drop the package, examples and schema
/// layers.
pub(crate) async fn runtime_base(source: &dyn ImageSource, reference: &Reference, arch: &str) -> Result<Image> {
    let mut image = source
        .image(reference, &Platform::linux(arch))
        .await
        .with_context(|| format!("failed to pull image {reference}"))
        .stage(BuildStage::Pull, arch)?;

    if image.config().architecture != arch {
        return Err(Error::Image(format!("image not available for architecture {arch:?}")))
            .stage(BuildStage::Pull, arch);
    }

    let before = image.layers().len();
    let listed = image.config().rootfs.diff_ids.len();
    if listed != before {
        return Err(Error::Image(format!(
            "failed to get layer from image: rootfs lists {listed} layers, manifest has {before}"
        )))
        .stage(BuildStage::Strip, arch);
    }
    image.retain_layers(|_, annotation| !annotation.is_some_and(|a| NON_RUNTIME_ANNOTATIONS.contains(&a)));
    tracing::debug!(%reference, arch, removed = before - image.layers().len(), "stripped base image");
    Ok(image)
}

/// Pack `tree` under `mount` into a gzipped layer.
pub(crate) fn code_layer(tree: &dyn SourceTree, mount: &str, opts: &PackOptions) -> Result<Layer> {
    let tar = pack_tree(tree, mount, opts).with_context(|| "failed to tar layer contents")?;
    Layer::from_tar(&tar).with_context(|| "failed to create code layer")
}

fn append_code(image: &mut Image, layer: Layer) -> Result<()> {
    if image.config().rootfs.diff_ids.len() != image.layers().len() {
        return Err(Error::Image(
            "failed to add code to image: base rootfs does not match its layers".into(),
        ));
    }
    image.append_layer(layer);
    Ok(())
}

/// Run `task` once per architecture and collect the images in request
/// order. The first failure is returned; dropping the set aborts the rest.
pub(crate) async fn per_arch<F, Fut>(architectures: &[String], mut task: F) -> Result<Vec<Image>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Image>> + Send + 'static,
{
    let mut slots: Vec<Option<Image>> = architectures.iter().map(|_| None).collect();
    let mut set = JoinSet::new();
    for (i, arch) in architectures.iter().enumerate() {
        let fut = task(arch.clone());
        set.spawn(async move { (i, fut.await) });
    }

    while let Some(joined) = set.join_next().await {
        let (i, res) = joined.map_err(|e| Error::Image(format!("build task failed: {e}")))?;
        slots[i] = Some(res?);
    }

    slots
        .into_iter()
        .zip(architectures)
        .map(|(slot, arch)| slot.ok_or_else(|| Error::Image(format!("no image built for {arch}"))))
        .collect()
}
