//! Python functions: the package goes into the interpreter's site-packages.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::BuilderConfig;
use super::base::{FUNCTION_RUNNER_GID, FUNCTION_RUNNER_UID, Layered, Recipe};
use crate::error::Result;
use crate::oci::Image;
use crate::tree::SourceTree;

/// `requirements.txt` is optional, `main.py` is not.
const MARKER: &str = "main.py";

/// Tracks the interpreter version of function-interpreter-python.
pub const PACKAGE_PATH: &str = "/venv/fn/lib/python3.11/site-packages/function";

// Local files may not be world-readable.
static RECIPE: Recipe = Recipe {
    language: "python",
    mount: PACKAGE_PATH,
    owner: Some((FUNCTION_RUNNER_UID, FUNCTION_RUNNER_GID)),
    strip: false,
    env: &[],
};

#[derive(Debug, Clone)]
pub struct PythonBuilder {
    inner: Arc<Layered>,
}

impl PythonBuilder {
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            inner: Arc::new(Layered {
                recipe: &RECIPE,
                base_image: config.base_images.python.clone(),
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
