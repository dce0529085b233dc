//! User configuration loaded from `~/.up/config.toml`.
//!
//! Every field has a default, so a missing file or an empty one yields a
//! working configuration. Environment variables (`UP_HOME`, `UP_CACHE_DIR`)
//! override the file; CLI flags override both.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::paths;
use crate::rewrite::ImageConfig;

/// Registry of packages named without one.
pub const DEFAULT_REGISTRY: &str = "xpkg.upbound.io";

// Function runtime bases.
pub const DEFAULT_KCL_BASE: &str = "xpkg.upbound.io/upbound/function-kcl-base:v0.11.2-up.1";
pub const DEFAULT_PYTHON_BASE: &str = "xpkg.upbound.io/upbound/function-interpreter-python:v0.4.0";
pub const DEFAULT_GO_BASE: &str = "xpkg.upbound.io/upbound/provider-base@sha256:d23697e028f65fcc35886fe9e875069c071f637a79d65821830d6bc71c975391";
pub const DEFAULT_GO_TEMPLATING_BASE: &str =
    "xpkg.upbound.io/upbound/function-go-templating-base:v0.9.0-13-gd1fa2e3";

/// Settings from `~/.up/config.toml`. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Package cache root. Defaults to `~/.up/cache`.
    pub cache_dir: Option<PathBuf>,
    /// Registry assumed for package references without one.
    pub default_registry: String,
    pub registry: RegistryConfig,
    pub base_images: BaseImages,
    /// Mirror rewrite rules applied to function base images.
    pub image_configs: Vec<ImageConfig>,
    /// Number of functions built at once by callers that build several.
    pub build_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            default_registry: DEFAULT_REGISTRY.to_string(),
            registry: RegistryConfig::default(),
            base_images: BaseImages::default(),
            image_configs: Vec::new(),
            build_concurrency: 8,
        }
    }
}

/// Registry credentials and transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Talk plain HTTP to every registry.
    pub insecure: bool,
}

/// Base images the function builders start from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseImages {
    pub kcl: String,
    pub python: String,
    pub go: String,
    pub go_templating: String,
}

impl Default for BaseImages {
    fn default() -> Self {
        Self {
            kcl: DEFAULT_KCL_BASE.to_string(),
            python: DEFAULT_PYTHON_BASE.to_string(),
            go: DEFAULT_GO_BASE.to_string(),
            go_templating: DEFAULT_GO_TEMPLATING_BASE.to_string(),
        }
    }
}

impl Config {
    /// Load from the default location. A missing file is not an error.
    pub fn load() -> Result<Self> {
        Self::from_path(&paths::config_path())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Effective cache root: `UP_CACHE_DIR`, then the file, then `~/.up/cache`.
    pub fn cache_dir(&self) -> PathBuf {
        if std::env::var_os("UP_CACHE_DIR").is_some() {
            return paths::cache_path();
        }
        match &self.cache_dir {
            Some(dir) => paths::expand_tilde(&dir.to_string_lossy()),
            None => paths::cache_path(),
        }
    }

    /// Basic credentials, when both halves are configured.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.registry.username, &self.registry.password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        }
    }
}
