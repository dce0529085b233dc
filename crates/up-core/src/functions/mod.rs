//! Function image builders.
//!
//! A function's source tree is sniffed for one of four languages, in fixed
//! precedence: KCL, Python, Go, then go-templating. The matching builder
//! turns the tree into one runtime image per requested architecture. These
//! images carry no package metadata; assembling them into an xpkg is the
//! caller's job.

mod base;
pub mod go;
pub mod go_templating;
pub mod kcl;
pub mod python;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use up_schema::Platform;

pub use go::{GoBuilder, GoCommand, GoToolchain};
pub use go_templating::GoTemplatingBuilder;
pub use kcl::KclBuilder;
pub use python::PythonBuilder;

use crate::config::{BaseImages, Config};
use crate::error::{Error, Result, ResultExt};
use crate::oci::{Image, ImageIndex, Reference, RegistryClient};
use crate::reporter::Reporter;
use crate::rewrite::ImageConfig;
use crate::tree::SourceTree;

/// Where builders pull base images from.
#[async_trait]
pub trait ImageSource: Send + Sync + fmt::Debug {
    /// The image for `platform`, resolving an index if needed.
    async fn image(&self, reference: &Reference, platform: &Platform) -> Result<Image>;

    /// Every platform image of `reference`.
    async fn index(&self, reference: &Reference) -> Result<ImageIndex>;
}

#[async_trait]
impl ImageSource for RegistryClient {
    async fn image(&self, reference: &Reference, platform: &Platform) -> Result<Image> {
        RegistryClient::image(self, reference, platform).await
    }

    async fn index(&self, reference: &Reference) -> Result<ImageIndex> {
        RegistryClient::index(self, reference).await
    }
}

/// Everything a builder needs from its environment.
#[derive(Clone)]
pub struct BuilderConfig {
    pub base_images: BaseImages,
    /// Mirror rewrites applied to base image references.
    pub image_configs: Vec<ImageConfig>,
    pub source: Arc<dyn ImageSource>,
    pub toolchain: Arc<dyn GoToolchain>,
    pub reporter: Option<Arc<dyn Reporter>>,
}

impl fmt::Debug for BuilderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderConfig")
            .field("base_images", &self.base_images)
            .field("image_configs", &self.image_configs)
            .field("source", &self.source)
            .field("toolchain", &self.toolchain)
            .finish_non_exhaustive()
    }
}

impl BuilderConfig {
    /// Default base images, no rewrite rules and the `go` toolchain on
    /// `PATH`.
    pub fn new(source: Arc<dyn ImageSource>) -> Self {
        Self {
            base_images: BaseImages::default(),
            image_configs: Vec::new(),
            source,
            toolchain: Arc::new(GoCommand::default()),
            reporter: None,
        }
    }

    /// Base images and rewrite rules from the user's configuration.
    pub fn from_config(config: &Config, source: Arc<dyn ImageSource>) -> Self {
        Self {
            base_images: config.base_images.clone(),
            image_configs: config.image_configs.clone(),
            ..Self::new(source)
        }
    }

    /// Append rewrite rules after the existing ones.
    pub fn with_image_configs(mut self, configs: impl IntoIterator<Item = ImageConfig>) -> Self {
        self.image_configs.extend(configs);
        self
    }

    pub fn with_toolchain(mut self, toolchain: Arc<dyn GoToolchain>) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }
}

/// Languages an embedded function can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionLanguage {
    Kcl,
    Python,
    Go,
    GoTemplating,
}

impl FunctionLanguage {
    /// Detection order. A tree with both `kcl.mod` and `main.py` is KCL.
    pub const ALL: [FunctionLanguage; 4] = [Self::Kcl, Self::Python, Self::Go, Self::GoTemplating];

    /// Name printed by `up function identify`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Kcl => "kcl",
            Self::Python => "python",
            Self::Go => "go",
            Self::GoTemplating => "go-templating",
        }
    }

    /// Whether `tree` looks like a function in this language.
    pub fn matches(self, tree: &dyn SourceTree) -> Result<bool> {
        Ok(match self {
            Self::Kcl => KclBuilder::matches(tree),
            Self::Python => PythonBuilder::matches(tree),
            Self::Go => GoBuilder::matches(tree),
            Self::GoTemplating => GoTemplatingBuilder::matches(tree)?,
        })
    }
}

impl fmt::Display for FunctionLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A builder for one [`FunctionLanguage`].
#[derive(Debug, Clone)]
pub enum FunctionBuilder {
    Kcl(KclBuilder),
    Python(PythonBuilder),
    Go(GoBuilder),
    GoTemplating(GoTemplatingBuilder),
}

impl FunctionBuilder {
    /// The builder for `language`.
    pub fn new(language: FunctionLanguage, config: &BuilderConfig) -> Self {
        match language {
            FunctionLanguage::Kcl => Self::Kcl(KclBuilder::new(config)),
            FunctionLanguage::Python => Self::Python(PythonBuilder::new(config)),
            FunctionLanguage::Go => Self::Go(GoBuilder::new(config)),
            FunctionLanguage::GoTemplating => Self::GoTemplating(GoTemplatingBuilder::new(config)),
        }
    }

    pub fn language(&self) -> FunctionLanguage {
        match self {
            Self::Kcl(_) => FunctionLanguage::Kcl,
            Self::Python(_) => FunctionLanguage::Python,
            Self::Go(_) => FunctionLanguage::Go,
            Self::GoTemplating(_) => FunctionLanguage::GoTemplating,
        }
    }

    pub fn name(&self) -> &'static str {
        self.language().name()
    }

    pub fn matches(&self, tree: &dyn SourceTree) -> Result<bool> {
        self.language().matches(tree)
    }

    /// Build one image per architecture, in the order given. `mount_base`
    /// is the OS directory the tree was read from; symlinks in the tree are
    /// resolved against it.
    pub async fn build(
        &self,
        tree: Arc<dyn SourceTree>,
        architectures: &[String],
        mount_base: Option<PathBuf>,
    ) -> Result<Vec<Image>> {
        tracing::info!(builder = self.name(), ?architectures, "building function");
        match self {
            Self::Kcl(b) => b.build(tree, architectures, mount_base).await,
            Self::Python(b) => b.build(tree, architectures, mount_base).await,
            Self::Go(b) => b.build(tree, architectures, mount_base).await,
            Self::GoTemplating(b) => b.build(tree, architectures, mount_base).await,
        }
    }
}

/// Picks the builder for a function's source tree.
pub trait Identifier: Send + Sync {
    /// The first builder whose language matches `tree`, else
    /// [`Error::NoBuilder`].
    fn identify(&self, tree: &dyn SourceTree) -> Result<FunctionBuilder>;
}

/// Tries every language in [`FunctionLanguage::ALL`] order.
#[derive(Debug, Clone)]
pub struct DefaultIdentifier {
    config: BuilderConfig,
}

impl DefaultIdentifier {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }
}

impl Identifier for DefaultIdentifier {
    fn identify(&self, tree: &dyn SourceTree) -> Result<FunctionBuilder> {
        for language in FunctionLanguage::ALL {
            let matched = language
                .matches(tree)
                .with_context(|| format!("builder {:?} returned an error", language.name()))?;
            if matched {
                tracing::debug!(%language, "identified function language");
                return Ok(FunctionBuilder::new(language, &self.config));
            }
        }
        Err(Error::NoBuilder)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory base images.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use up_schema::xpkg;

    use super::*;
    use crate::archive::pack_tree;
    use crate::error::RegistryError;
    use crate::oci::Layer;
    use crate::tree::MemTree;

    /// Images keyed by reference, then by the architecture they are served
    /// for.
    #[derive(Debug, Default)]
    pub(crate) struct MockSource {
        images: Mutex<HashMap<String, Vec<(String, Image)>>>,
        pulls: AtomicUsize,
    }

    fn layer(path: &str, body: &str) -> Layer {
        let mut tree = MemTree::new();
        tree.insert_file(path, body.to_string()).unwrap();
        Layer::from_tar(&pack_tree(&tree, "", &Default::default()).unwrap()).unwrap()
    }

    impl MockSource {
        /// A runtime image with a single layer.
        pub(crate) fn runtime_image(arch: &str) -> Image {
            let mut image = Image::empty(&Platform::linux(arch));
            image.append_layer(layer("bin/runtime", arch));
            image
        }

        pub(crate) fn add(&self, reference: &Reference, arch: &str, image: Image) {
            self.images
                .lock()
                .unwrap()
                .entry(reference.to_string())
                .or_default()
                .push((arch.to_string(), image));
        }

        pub(crate) fn add_index(&self, reference: &Reference, images: Vec<Image>) {
            for image in images {
                let arch = image.config().architecture.clone();
                self.add(reference, &arch, image);
            }
        }

        /// A function package image: runtime layer plus package, examples
        /// and KCL schema layers.
        pub(crate) fn add_package_base(&self, reference: &Reference, arch: &str) {
            let mut image = Self::runtime_image(arch);
            image.append_layer(layer("package.yaml", "kind: Function").with_annotation(xpkg::PACKAGE_ANNOTATION));
            image.append_layer(layer("examples/xr.yaml", "kind: XR").with_annotation(xpkg::EXAMPLES_ANNOTATION));
            image.append_layer(layer("models/v1.k", "schema X:").with_annotation(xpkg::SCHEMA_KCL_ANNOTATION));
            self.add(reference, arch, image);
        }

        pub(crate) fn pulls(&self) -> usize {
            self.pulls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ImageSource for MockSource {
        async fn image(&self, reference: &Reference, platform: &Platform) -> Result<Image> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            let images = self.images.lock().unwrap();
            let served = images
                .get(&reference.to_string())
                .ok_or_else(|| RegistryError::NotFound(reference.to_string()))?;
            served
                .iter()
                .find(|(arch, _)| *arch == platform.architecture)
                .map(|(_, image)| image.clone())
                .ok_or_else(|| RegistryError::PlatformNotFound(platform.to_string()).into())
        }

        async fn index(&self, reference: &Reference) -> Result<ImageIndex> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            let images = self.images.lock().unwrap();
            let served = images
                .get(&reference.to_string())
                .ok_or_else(|| RegistryError::NotFound(reference.to_string()))?;
            Ok(ImageIndex::new(served.iter().map(|(_, i)| i.clone()).collect()))
        }
    }

    pub(crate) fn config(source: Arc<MockSource>) -> BuilderConfig {
        BuilderConfig::new(source)
    }

    pub(crate) fn archs(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| (*a).to_string()).collect()
    }
}
