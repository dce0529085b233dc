//! Shared command context.
//!
//! Groups the configuration, cache location and console reporter every
//! command needs, and wires them into core managers and builders.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use up_core::dep::{LocalCache, Manager, RegistryFetcher, Resolver};
use up_core::functions::BuilderConfig;
use up_core::oci::RegistryClient;
use up_core::rewrite::ImageConfig;
use up_core::{Config, Reporter};

use crate::ui::{ConsoleReporter, Output, UiActor};

/// Where a project keeps the schemas of its dependencies.
pub const MODELS_DIR: &str = ".up";

/// Configuration and output shared by every command. Owns the UI actor
/// unless running quiet.
pub struct Context {
    pub config: Config,
    pub cache_dir: PathBuf,
    pub output: Output,
    ui: Option<UiActor>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cache_dir", &self.cache_dir)
            .field("quiet", &self.ui.is_none())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Load `~/.up/config.toml`. An explicit cache directory beats both the
    /// config file and `UP_CACHE_DIR`.
    pub fn load(cache_dir: Option<PathBuf>, quiet: bool) -> Result<Self> {
        let config = Config::load()?;
        let cache_dir = cache_dir.unwrap_or_else(|| config.cache_dir());
        Ok(Self {
            config,
            cache_dir,
            output: Output::new(quiet),
            ui: (!quiet).then(UiActor::spawn),
        })
    }

    /// Progress reporter over the UI actor; `None` when quiet.
    pub fn reporter(&self) -> Option<Arc<dyn Reporter>> {
        self.ui
            .as_ref()
            .map(|ui| Arc::new(ConsoleReporter::new(ui.sender())) as Arc<dyn Reporter>)
    }

    /// Registry client honoring the configured credentials and registry.
    pub fn client(&self) -> RegistryClient {
        RegistryClient::from_config(&self.config)
    }

    /// The on-disk package cache at [`Context::cache_dir`](Self::cache_dir).
    pub fn cache(&self) -> Result<LocalCache> {
        Ok(LocalCache::new(&self.cache_dir)
            .with_context(|| format!("failed to open cache at {}", self.cache_dir.display()))?
            .with_default_registry(&self.config.default_registry))
    }

    /// A manager over the registry that copies schemas to
    /// `<project root>/.up`.
    pub fn manager(&self, project_root: &Path) -> Result<Manager> {
        let fetcher = Arc::new(RegistryFetcher::new(self.client()));
        let resolver = Resolver::new(fetcher).with_default_registry(&self.config.default_registry);

        let mut manager = Manager::new(Arc::new(self.cache()?), Arc::new(resolver))
            .with_models_dir(project_root.join(MODELS_DIR))
            .with_default_registry(&self.config.default_registry);
        if let Some(reporter) = self.reporter() {
            manager = manager.with_reporter(reporter);
        }
        Ok(manager)
    }

    /// Builder settings from the config file plus `extra` rewrite rules
    /// (a project's `imageConfig`).
    pub fn builder_config(&self, extra: &[ImageConfig]) -> BuilderConfig {
        let mut config = BuilderConfig::from_config(&self.config, Arc::new(self.client()))
            .with_image_configs(extra.iter().cloned());
        if let Some(reporter) = self.reporter() {
            config = config.with_reporter(reporter);
        }
        config
    }

    /// Wait until every queued progress line has been drawn.
    pub fn sync(&self) {
        if let Some(ui) = &self.ui {
            ui.sync();
        }
    }

    /// Drain and stop the UI actor.
    pub fn shutdown(mut self) {
        if let Some(ui) = self.ui.take() {
            ui.shutdown();
        }
    }
}
