//! Go functions: the module is cross-compiled per platform and the binary
//! layered onto a provider base image, the way `ko` lays out its images.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use up_schema::Platform;

use super::base::{code_layer, per_arch};
use super::{BuilderConfig, ImageSource};
use crate::archive::PackOptions;
use crate::error::{BuildStage, Error, RegistryError, Result, ResultExt};
use crate::oci::{Image, ImageIndex, Reference};
use crate::reporter::{Reporter, track};
use crate::rewrite::{ImageConfig, rewrite_image};
use crate::tree::{MemTree, SourceTree, copy_tree};

const MARKER: &str = "go.mod";
const APP_DIR: &str = "/ko-app";
const BINARY: &str = "function";
const DATA_PATH: &str = "/var/run/ko";

/// Compiles a Go module into a static Linux binary.
#[async_trait]
pub trait GoToolchain: Send + Sync + fmt::Debug {
    async fn compile(&self, module_dir: &Path, platform: &Platform) -> Result<Vec<u8>>;
}

/// The `go` command on `PATH`.
#[derive(Debug, Clone)]
pub struct GoCommand {
    program: PathBuf,
}

impl Default for GoCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from("go"),
        }
    }
}

impl GoCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl GoToolchain for GoCommand {
    async fn compile(&self, module_dir: &Path, platform: &Platform) -> Result<Vec<u8>> {
        let out = tempfile::tempdir()?;
        let binary = out.path().join(BINARY);

        let mut cmd = Command::new(&self.program);
        cmd.arg("build")
            .arg("-trimpath")
            .arg("-o")
            .arg(&binary)
            .arg(".")
            .current_dir(module_dir)
            .env("CGO_ENABLED", "0")
            .env("GOOS", &platform.os)
            .env("GOARCH", &platform.architecture);
        let arm_version = platform.variant.as_deref().and_then(|v| v.strip_prefix('v'));
        if let (Some(version), "arm") = (arm_version, platform.architecture.as_str()) {
            cmd.env("GOARM", version);
        }

        tracing::debug!(dir = %module_dir.display(), %platform, "go build");
        let output = cmd.output().await.map_err(|e| {
            Error::Toolchain(format!("failed to run {}: {e}", self.program.display()))
        })?;
        if !output.status.success() {
            return Err(Error::Toolchain(format!(
                "go build for {platform} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(tokio::fs::read(&binary).await?)
    }
}

#[derive(Clone)]
pub struct GoBuilder {
    base_image: String,
    image_configs: Vec<ImageConfig>,
    source: Arc<dyn ImageSource>,
    toolchain: Arc<dyn GoToolchain>,
    reporter: Option<Arc<dyn Reporter>>,
}

impl fmt::Debug for GoBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoBuilder")
            .field("base_image", &self.base_image)
            .field("toolchain", &self.toolchain)
            .finish_non_exhaustive()
    }
}

impl GoBuilder {
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            base_image: config.base_images.go.clone(),
            image_configs: config.image_configs.clone(),
            source: config.source.clone(),
            toolchain: config.toolchain.clone(),
            reporter: config.reporter.clone(),
        }
    }

    pub fn matches(tree: &dyn SourceTree) -> bool {
        tree.exists(Path::new(MARKER))
    }

    /// The base index, after mirror rewrites.
    async fn base_index(&self, architectures: &[String]) -> Result<ImageIndex> {
        let all = architectures.join(",");
        let image = rewrite_image(&self.base_image, &self.image_configs);
        let reference = Reference::parse(&image)
            .with_context(|| "failed to parse go base image reference")
            .stage(BuildStage::Parse, &all)?;
        self.source
            .index(&reference)
            .await
            .with_context(|| format!("failed to fetch go base image {reference}"))
            .stage(BuildStage::Pull, &all)
    }

    /// Compile the module in `tree` once per architecture. The module is
    /// compiled where it lives on disk (`mount_base`, else the tree's own
    /// root); in-memory trees are written to a scratch directory first.
    pub async fn build(
        &self,
        tree: Arc<dyn SourceTree>,
        architectures: &[String],
        mount_base: Option<PathBuf>,
    ) -> Result<Vec<Image>> {
        let mut scratch = None;
        let module_dir = match mount_base.or_else(|| tree.os_root().map(Path::to_path_buf)) {
            Some(dir) => dir,
            None => {
                let dir = tempfile::tempdir()?;
                copy_tree(tree.as_ref(), dir.path())?;
                let path = dir.path().to_path_buf();
                scratch = Some(dir);
                path
            }
        };

        let index = Arc::new(self.base_index(architectures).await?);
        let images = per_arch(architectures, |arch| {
            let this = self.clone();
            let index = index.clone();
            let module_dir = module_dir.clone();
            async move { this.build_arch(&index, &module_dir, &arch).await }
        })
        .await;

        drop(scratch);
        images
    }

    async fn build_arch(&self, index: &ImageIndex, module_dir: &Path, arch: &str) -> Result<Image> {
        let platform = Platform::linux(arch);
        let text = format!("Building go function for {arch}");

        track(self.reporter.as_ref(), &text, async {
            let mut image = index
                .images()
                .iter()
                .find(|i| platform.matches(&i.platform()))
                .cloned()
                .ok_or_else(|| RegistryError::PlatformNotFound(platform.to_string()))
                .stage(BuildStage::Pull, arch)?;

            let binary = self
                .toolchain
                .compile(module_dir, &platform)
                .await
                .with_context(|| "failed to build function")
                .stage(BuildStage::Compile, arch)?;

            let mut app = MemTree::new();
            app.insert_file_with_mode(BINARY, binary, 0o755)
                .stage(BuildStage::Layer, arch)?;
            let layer = code_layer(&app, APP_DIR, &PackOptions::default()).stage(BuildStage::Layer, arch)?;
            image.append_layer(layer);

            let config = &mut image.config_mut().config;
            config.entrypoint = Some(vec![format!("{APP_DIR}/{BINARY}")]);
            config.cmd = None;
            image.set_env("KO_DATA_PATH", DATA_PATH);

            let digest = image.digest().stage(BuildStage::Config, arch)?;
            tracing::debug!(arch, %digest, "built go function image");
            Ok::<_, Error>(image)
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Emits a fake binary naming the platform it was built for.
    #[derive(Debug, Default)]
    pub(crate) struct FakeToolchain {
        pub(crate) builds: Mutex<Vec<(PathBuf, String)>>,
    }

    #[async_trait]
    impl GoToolchain for FakeToolchain {
        async fn compile(&self, module_dir: &Path, platform: &Platform) -> Result<Vec<u8>> {
            if !module_dir.join(MARKER).is_file() {
                return Err(Error::Toolchain("go.mod file not found".into()));
            }
            self.builds
                .lock()
                .unwrap()
                .push((module_dir.to_path_buf(), platform.architecture.clone()));
            Ok(format!("binary for {platform}").into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{MockSource, archs, config};
    use super::testing::FakeToolchain;
    use super::*;
    use crate::archive::unpack_layer;

    fn module() -> MemTree {
        let mut tree = MemTree::new();
        tree.insert_file("go.mod", "module example.com/fn\n\ngo 1.23\n").unwrap();
        tree.insert_file("main.go", "package main\n\nfunc main() {}\n").unwrap();
        tree
    }

    fn fixture(archs: &[&str]) -> (Arc<MockSource>, Arc<FakeToolchain>, BuilderConfig) {
        let source = Arc::new(MockSource::default());
        let base = Reference::parse(crate::config::DEFAULT_GO_BASE).unwrap();
        source.add_index(&base, archs.iter().map(|a| MockSource::runtime_image(a)).collect());
        let toolchain = Arc::new(FakeToolchain::default());
        let mut cfg = config(source.clone());
        cfg.toolchain = toolchain.clone();
        (source, toolchain, cfg)
    }

    #[tokio::test]
    async fn test_build_compiles_per_platform() {
        let (_, toolchain, cfg) = fixture(&["amd64", "arm64"]);
        let images = GoBuilder::new(&cfg)
            .build(Arc::new(module()), &archs(&["arm64", "amd64"]), None)
            .await
            .unwrap();

        assert_eq!(images.len(), 2);
        for (image, arch) in images.iter().zip(["arm64", "amd64"]) {
            assert_eq!(image.config().architecture, arch);
            assert_eq!(
                image.config().config.entrypoint.as_deref(),
                Some(&["/ko-app/function".to_string()][..])
            );
            let app = unpack_layer(&image.layers().last().unwrap().blob).unwrap();
            assert_eq!(
                app.read(Path::new("ko-app/function")).unwrap(),
                format!("binary for linux/{arch}").into_bytes()
            );
        }

        let mut built: Vec<_> = toolchain.builds.lock().unwrap().iter().map(|b| b.1.clone()).collect();
        built.sort();
        assert_eq!(built, ["amd64", "arm64"]);
    }

    #[tokio::test]
    async fn test_build_in_place_for_mounted_module() {
        let (_, toolchain, cfg) = fixture(&["amd64"]);
        let dir = tempfile::tempdir().unwrap();
        copy_tree(&module(), dir.path()).unwrap();

        GoBuilder::new(&cfg)
            .build(Arc::new(module()), &archs(&["amd64"]), Some(dir.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(toolchain.builds.lock().unwrap()[0].0, dir.path());
    }

    #[tokio::test]
    async fn test_platform_missing_from_base() {
        let (_, _, cfg) = fixture(&["amd64"]);
        let err = GoBuilder::new(&cfg)
            .build(Arc::new(module()), &archs(&["arm64"]), None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "pull failed for architecture arm64: no manifest for platform linux/arm64"
        );
    }
}
