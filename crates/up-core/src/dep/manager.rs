//! Dependency manager: resolve, fetch and cache packages with their
//! transitive dependencies.
//!
//! Every walk carries its own [`Walk`] accumulator, so a single manager can
//! serve concurrent calls. A `(registry/repository, resolved version)` pair is
//! visited at most once per walk, however the package is spelled, which
//! bounds cyclic graphs.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use up_schema::{Constraint, DEFAULT_CONSTRAINT, Dependency, Version};

use super::cache::{Cache, CacheEvent};
use super::marshaler::{ImageMeta, ImageWithMeta, Marshaler, ParsedPackage, XpkgMarshaler};
use super::resolver::ImageResolver;
use crate::config::DEFAULT_REGISTRY;
use crate::error::{Error, Result, ResultExt};
use crate::oci::Reference;
use crate::reporter::{Reporter, track};
use crate::tree::{SourceTree, copy_tree};

/// Packages visited by one walk, in visit order.
#[derive(Debug, Default)]
struct Walk {
    visited: HashSet<(String, String)>,
    packages: Vec<Arc<ParsedPackage>>,
}

impl Walk {
    /// Record a visit of `context` (`registry/repository`) at `version`;
    /// false if the pair was already seen.
    fn enter(&mut self, context: String, version: &str) -> bool {
        self.visited.insert((context, version.to_string()))
    }
}

/// Cached packages by name.
#[derive(Debug, Clone, Default)]
pub struct View {
    packages: BTreeMap<String, Arc<ParsedPackage>>,
}

impl View {
    /// Every package, keyed by `registry/repository`.
    pub fn packages(&self) -> &BTreeMap<String, Arc<ParsedPackage>> {
        &self.packages
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ParsedPackage>> {
        self.packages.get(name)
    }
}

/// Resolves dependencies against a registry and a cache, walking their
/// transitive dependencies.
pub struct Manager {
    cache: Arc<dyn Cache>,
    resolver: Arc<dyn ImageResolver>,
    marshaler: Arc<dyn Marshaler>,
    models_dir: Option<PathBuf>,
    skip_cache_update_if_exists: bool,
    default_registry: String,
    reporter: Option<Arc<dyn Reporter>>,
}

impl Manager {
    /// A manager decoding with [`XpkgMarshaler`] and no models directory.
    pub fn new(cache: Arc<dyn Cache>, resolver: Arc<dyn ImageResolver>) -> Self {
        Self {
            cache,
            resolver,
            marshaler: Arc::new(XpkgMarshaler),
            models_dir: None,
            skip_cache_update_if_exists: false,
            default_registry: DEFAULT_REGISTRY.to_string(),
            reporter: None,
        }
    }

    pub fn with_marshaler(mut self, marshaler: Arc<dyn Marshaler>) -> Self {
        self.marshaler = marshaler;
        self
    }

    /// Copy every fetched package's schemas to `<dir>/<language>/`.
    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = Some(dir.into());
        self
    }

    /// Trust cache hits without checking the remote digest.
    pub fn with_skip_cache_update_if_exists(mut self, skip: bool) -> Self {
        self.skip_cache_update_if_exists = skip;
        self
    }

    pub fn with_default_registry(mut self, registry: impl Into<String>) -> Self {
        self.default_registry = registry.into();
        self
    }

    /// Report each package fetch.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Resolve `dep` and its dependencies from the cache alone. Returns the
    /// dependency pinned to the cached version and every package visited.
    pub fn resolve(&self, dep: &Dependency) -> Result<(Dependency, Vec<Arc<ParsedPackage>>)> {
        let mut walk = Walk::default();
        let root = self.resolve_walk(dep, &mut walk)?;
        Ok((pinned(dep, root.as_deref()), walk.packages))
    }

    /// Resolve `dep` against the registry, fetch it and every transitive
    /// dependency into the cache.
    pub async fn add_all(&self, dep: &Dependency) -> Result<(Dependency, Vec<Arc<ParsedPackage>>)> {
        let mut walk = Walk::default();
        let root = self.add_walk(dep.clone(), &mut walk).await?;

        if self.models_dir.is_some() {
            for pkg in &walk.packages {
                for (language, tree) in &pkg.schemas {
                    self.add_models(language, tree)?;
                }
            }
        }

        Ok((pinned(dep, root.as_deref()), walk.packages))
    }

    /// Resolve each dependency from the cache. Dependencies that are not
    /// cached yet are skipped.
    pub fn view(&self, deps: &[Dependency]) -> Result<View> {
        let mut packages = BTreeMap::new();
        for dep in deps {
            match self.resolve(dep) {
                Ok((_, visited)) => {
                    for pkg in visited {
                        packages.insert(pkg.name.clone(), pkg);
                    }
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(dependency = %dep, "not cached, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(View { packages })
    }

    /// Cached versions of `dep`'s package.
    pub fn versions(&self, dep: &Dependency) -> Result<Vec<String>> {
        self.cache.versions(dep)
    }

    pub fn watch(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.watch()
    }

    /// Copy a schema tree to `<models dir>/<language>/`. No-op without a
    /// models directory.
    pub fn add_models(&self, language: &str, tree: &dyn SourceTree) -> Result<()> {
        let Some(dir) = &self.models_dir else {
            return Ok(());
        };
        copy_tree(tree, &dir.join(language))
            .with_context(|| format!("failed to copy {language} models"))
    }

    fn enter(&self, walk: &mut Walk, resolved: &Dependency) -> Result<bool> {
        let reference = Reference::parse_with_registry(&resolved.package, &self.default_registry)?;
        Ok(walk.enter(reference.context(), &resolved.constraints))
    }

    fn resolve_walk(&self, dep: &Dependency, walk: &mut Walk) -> Result<Option<Arc<ParsedPackage>>> {
        let resolved = self.finalize_local_version(dep)?;
        if !self.enter(walk, &resolved)? {
            return Ok(None);
        }

        let pkg = self.cache.get(&resolved)?;
        walk.packages.push(pkg.clone());
        for sub in &pkg.dependencies {
            self.resolve_walk(sub, walk)?;
        }
        Ok(Some(pkg))
    }

    fn add_walk<'a>(
        &'a self,
        dep: Dependency,
        walk: &'a mut Walk,
    ) -> BoxFuture<'a, Result<Option<Arc<ParsedPackage>>>> {
        Box::pin(async move {
            let resolved = self
                .finalize_ext_version(&dep)
                .await
                .with_context(|| format!("failed to resolve {}:{}", dep.package, dep.constraints))?;
            if !self.enter(walk, &resolved)? {
                tracing::debug!(dependency = %resolved, "already visited");
                return Ok(None);
            }

            let pkg = self.retrieve_and_store(&resolved).await?;
            walk.packages.push(pkg.clone());
            for sub in pkg.dependencies.iter().cloned() {
                self.add_walk(sub, walk).await?;
            }
            Ok(Some(pkg))
        })
    }

    async fn retrieve_and_store(&self, dep: &Dependency) -> Result<Arc<ParsedPackage>> {
        match self.cache.get(dep) {
            Err(e) if e.is_not_found() => self.add_package(dep).await,
            Err(e) => Err(e),
            Ok(pkg) if self.skip_cache_update_if_exists => Ok(pkg),
            Ok(pkg) => {
                let digest = self.resolver.resolve_digest(dep).await?;
                if pkg.digest == digest {
                    Ok(pkg)
                } else {
                    tracing::info!(dependency = %dep, cached = %pkg.digest, remote = %digest, "cached package is stale");
                    self.add_package(dep).await
                }
            }
        }
    }

    async fn add_package(&self, dep: &Dependency) -> Result<Arc<ParsedPackage>> {
        let text = format!("{}:{}", dep.package, dep.constraints);
        track(self.reporter.as_ref(), &text, async {
            let (version, image, desc) = self.resolver.resolve_image(dep).await?;
            let reference = Reference::parse_with_registry(&dep.package, &self.default_registry)?;

            let pkg = self.marshaler.from_image(ImageWithMeta {
                meta: ImageMeta {
                    repo: repo_name(&reference),
                    registry: reference.registry.clone(),
                    version,
                    digest: desc.digest,
                },
                image,
            })?;
            self.cache.store(dep, &pkg)?;
            Ok::<_, Error>(Arc::new(pkg))
        })
        .await
    }

    /// Pin `dep` to a registry tag or digest.
    async fn finalize_ext_version(&self, dep: &Dependency) -> Result<Dependency> {
        let constraints = if dep.is_digest() {
            self.resolver
                .resolve_digest(dep)
                .await
                .with_context(|| format!("failed to resolve digest for package {}", dep.package))?
        } else {
            self.resolver
                .resolve_tag(dep)
                .await
                .with_context(|| format!("failed to resolve tag for package {}", dep.package))?
        };
        Ok(Dependency {
            constraints,
            ..dep.clone()
        })
    }

    /// Pin `dep` to the highest cached version satisfying it. Anything that
    /// cannot be satisfied locally is [`Error::NotFound`], including digest
    /// constraints, which are not semver ranges.
    fn finalize_local_version(&self, dep: &Dependency) -> Result<Dependency> {
        let constraints = if dep.constraints.is_empty() {
            DEFAULT_CONSTRAINT
        } else {
            &dep.constraints
        };
        let constraint = Constraint::parse(constraints)
            .map_err(|e| Error::NotFound(format!("invalid semver constraint {constraints}: {e}")))?;

        let mut versions: Vec<Version> = self
            .cache
            .versions(dep)?
            .iter()
            .filter_map(|v| Version::parse(v).ok())
            .collect();
        versions.sort();

        let best = versions
            .iter()
            .rev()
            .find(|v| constraint.matches(v))
            .ok_or_else(|| Error::NotFound(dep.to_string()))?;
        Ok(Dependency {
            constraints: best.original().to_string(),
            ..dep.clone()
        })
    }
}

/// Packages on Docker Hub are named by repository alone, everything else by
/// `registry/repository`.
fn repo_name(reference: &Reference) -> String {
    match reference.registry.as_str() {
        "docker.io" | "index.docker.io" => reference.repository.clone(),
        _ => reference.context(),
    }
}

fn pinned(dep: &Dependency, pkg: Option<&ParsedPackage>) -> Dependency {
    match pkg {
        Some(pkg) => Dependency {
            package: dep.package.clone(),
            package_type: Some(pkg.package_type),
            constraints: pkg.version.clone(),
        },
        None => dep.clone(),
    }
}
