//! KCL functions: source copied into a function-kcl base image.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::BuilderConfig;
use super::base::{FUNCTION_RUNNER_GID, FUNCTION_RUNNER_UID, Layered, Recipe};
use crate::error::Result;
use crate::oci::Image;
use crate::tree::SourceTree;

const MARKER: &str = "kcl.mod";

// The runtime rewrites kcl.mod.lock, so the sources must belong to the
// function runner.
static RECIPE: Recipe = Recipe {
    language: "kcl",
    mount: "/src",
    owner: Some((FUNCTION_RUNNER_UID, FUNCTION_RUNNER_GID)),
    strip: true,
    env: &[("FUNCTION_KCL_DEFAULT_SOURCE", "/src"), ("KCL_PKG_PATH", "/src")],
};

#[derive(Debug, Clone)]
pub struct KclBuilder {
    inner: Arc<Layered>,
}

impl KclBuilder {
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            inner: Arc::new(Layered {
                recipe: &RECIPE,
                base_image: config.base_images.kcl.clone(),
                image_configs: config.image_configs.clone(),
                source: config.source.clone(),
                reporter: config.reporter.clone(),
            }),
        }
    }

    pub fn matches(tree: &dyn SourceTree) -> bool {
        tree.exists(Path::new(MARKER))
    }

    pub async fn build(
        &self,
        tree: Arc<dyn SourceTree>,
        architectures: &[String],
        mount_base: Option<PathBuf>,
    ) -> Result<Vec<Image>> {
        self.inner.clone().build(tree, architectures, mount_base).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{MockSource, archs, config};
    use super::*;
    use crate::archive::unpack_layer;
    use crate::oci::Reference;
    use crate::tree::MemTree;
    use up_schema::xpkg;

    fn source_tree() -> Arc<dyn SourceTree> {
        let mut tree = MemTree::new();
        tree.insert_file("kcl.mod", "[package]\nname = \"fn\"\n").unwrap();
        tree.insert_file("main.k", "items = []\n").unwrap();
        Arc::new(tree)
    }

    #[tokio::test]
    async fn test_build_layers_source_per_arch() {
        let source = Arc::new(MockSource::default());
        let base = Reference::parse(crate::config::DEFAULT_KCL_BASE).unwrap();
        source.add_package_base(&base, "amd64");
        source.add_package_base(&base, "arm64");

        let builder = KclBuilder::new(&config(source.clone()));
        let images = builder
            .build(source_tree(), &archs(&["amd64", "arm64"]), None)
            .await
            .unwrap();

        assert_eq!(images.len(), 2);
        for (image, arch) in images.iter().zip(["amd64", "arm64"]) {
            assert_eq!(image.config().architecture, arch);
            assert_eq!(image.env("FUNCTION_KCL_DEFAULT_SOURCE"), Some("/src"));
            assert_eq!(image.env("KCL_PKG_PATH"), Some("/src"));
            // Runtime layer plus code; package and schema layers are gone.
            assert_eq!(image.layers().len(), 2);
            assert!(image.annotated_layer(xpkg::PACKAGE_ANNOTATION).is_none());

            let code = image.layers().last().unwrap();
            let tar = code.uncompressed().unwrap();
            let mut archive = tar::Archive::new(tar.as_slice());
            for entry in archive.entries().unwrap() {
                let entry = entry.unwrap();
                assert_eq!(entry.header().uid().unwrap(), 2000);
                assert_eq!(entry.header().gid().unwrap(), 2000);
            }
            let tree = unpack_layer(&code.blob).unwrap();
            assert_eq!(tree.read(Path::new("src/main.k")).unwrap(), b"items = []\n");
        }
    }

    #[tokio::test]
    async fn test_build_uses_rewritten_base() {
        let source = Arc::new(MockSource::default());
        let mirrored = Reference::parse("mirror.example.com/upbound/function-kcl-base:v0.11.2-up.1").unwrap();
        source.add_package_base(&mirrored, "amd64");

        let mut cfg = config(source.clone());
        cfg.image_configs = vec![crate::rewrite::ImageConfig::prefix(&["xpkg.upbound.io"], "mirror.example.com")];
        let images = KclBuilder::new(&cfg)
            .build(source_tree(), &archs(&["amd64"]), None)
            .await
            .unwrap();
        assert_eq!(images.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_arch_fails_build() {
        let source = Arc::new(MockSource::default());
        let base = Reference::parse(crate::config::DEFAULT_KCL_BASE).unwrap();
        source.add_package_base(&base, "amd64");

        let err = KclBuilder::new(&config(source))
            .build(source_tree(), &archs(&["amd64", "arm64"]), None)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("pull failed for architecture arm64"));
    }
}
