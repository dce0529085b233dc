//! On-disk package cache.
//!
//! Layout: `<root>/<registry>/<repository>/<type>/<escaped version>/`
//! holding `package.json` and `schemas/<language>/...`. Digests are escaped
//! (`sha256:...` becomes `sha256_...`) so entries are valid path
//! components everywhere.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use up_schema::{Dependency, PackageType};

use super::marshaler::ParsedPackage;
use crate::config::DEFAULT_REGISTRY;
use crate::error::{Error, Result, ResultExt};
use crate::oci::Reference;
use crate::paths::{escape_version, unescape_version};
use crate::tree::{MemTree, copy_tree};

pub(crate) const PACKAGE_FILE: &str = "package.json";
const SCHEMAS_DIR: &str = "schemas";

const ALL_TYPES: [PackageType; 3] = [
    PackageType::Provider,
    PackageType::Configuration,
    PackageType::Function,
];

/// Change notifications from a [`Cache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A package version was written.
    Stored { package: String, version: String },
    /// The cache was emptied.
    Cleaned,
}

/// Decoded packages keyed by package, type and exact version.
pub trait Cache: Send + Sync {
    /// The package stored for `dep`, whose constraint must be an exact
    /// version. A miss is [`Error::NotFound`].
    fn get(&self, dep: &Dependency) -> Result<Arc<ParsedPackage>>;

    /// Store `pkg` under `dep`'s version, replacing any previous entry.
    fn store(&self, dep: &Dependency, pkg: &ParsedPackage) -> Result<()>;

    /// Every cached version of `dep`'s package.
    fn versions(&self, dep: &Dependency) -> Result<Vec<String>>;

    /// Subscribe to changes. Receivers that lag miss events.
    fn watch(&self) -> broadcast::Receiver<CacheEvent>;

    /// Remove every entry.
    fn clean(&self) -> Result<()>;
}

/// Filesystem-backed [`Cache`].
#[derive(Debug)]
pub struct LocalCache {
    root: PathBuf,
    default_registry: String,
    events: broadcast::Sender<CacheEvent>,
}

impl LocalCache {
    /// Open a cache at `root`, creating the directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create cache at {}", root.display()))?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            root,
            default_registry: DEFAULT_REGISTRY.to_string(),
            events,
        })
    }

    /// Registry assumed for packages named without one.
    pub fn with_default_registry(mut self, registry: impl Into<String>) -> Self {
        self.default_registry = registry.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<registry>/<repository>`; unparsable coordinates are used
    /// verbatim.
    fn package_dir(&self, package: &str) -> PathBuf {
        let coordinate = Reference::parse_with_registry(package, &self.default_registry)
            .map(|r| r.context())
            .unwrap_or_else(|_| package.to_string());
        self.root.join(coordinate)
    }

    fn type_dirs(&self, dep: &Dependency) -> Vec<PathBuf> {
        let base = self.package_dir(&dep.package);
        match dep.package_type {
            Some(t) => vec![base.join(t.dir_name())],
            None => ALL_TYPES.iter().map(|t| base.join(t.dir_name())).collect(),
        }
    }

    fn read_entry(dir: &Path) -> Result<ParsedPackage> {
        let raw = std::fs::read(dir.join(PACKAGE_FILE))?;
        let mut pkg: ParsedPackage = serde_json::from_slice(&raw)?;

        let schemas = dir.join(SCHEMAS_DIR);
        if schemas.is_dir() {
            let mut trees = BTreeMap::new();
            for entry in std::fs::read_dir(&schemas)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    let language = entry.file_name().to_string_lossy().into_owned();
                    trees.insert(language, MemTree::from_dir(&entry.path())?);
                }
            }
            pkg.schemas = trees;
        }
        Ok(pkg)
    }
}

impl Cache for LocalCache {
    fn get(&self, dep: &Dependency) -> Result<Arc<ParsedPackage>> {
        let version = escape_version(&dep.constraints);
        for dir in self.type_dirs(dep) {
            let entry = dir.join(&version);
            if entry.join(PACKAGE_FILE).is_file() {
                tracing::debug!(package = %dep.package, version = %dep.constraints, "cache hit");
                return Self::read_entry(&entry)
                    .map(Arc::new)
                    .with_context(|| format!("failed to read cache entry {}", entry.display()));
            }
        }
        Err(Error::NotFound(dep.to_string()))
    }

    fn store(&self, dep: &Dependency, pkg: &ParsedPackage) -> Result<()> {
        let version = if pkg.version.is_empty() {
            &dep.constraints
        } else {
            &pkg.version
        };
        let entry = self
            .package_dir(&dep.package)
            .join(pkg.package_type.dir_name())
            .join(escape_version(version));

        if entry.exists() {
            std::fs::remove_dir_all(&entry)?;
        }
        std::fs::create_dir_all(&entry)?;
        std::fs::write(entry.join(PACKAGE_FILE), serde_json::to_vec_pretty(pkg)?)?;
        for (language, tree) in &pkg.schemas {
            copy_tree(tree, &entry.join(SCHEMAS_DIR).join(language))?;
        }

        tracing::debug!(package = %dep.package, %version, "stored package");
        let _ = self.events.send(CacheEvent::Stored {
            package: dep.package.clone(),
            version: version.clone(),
        });
        Ok(())
    }

    fn versions(&self, dep: &Dependency) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for dir in self.type_dirs(dep) {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries {
                let entry = entry?;
                if entry.path().join(PACKAGE_FILE).is_file() {
                    out.push(unescape_version(&entry.file_name().to_string_lossy()));
                }
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn watch(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn clean(&self) -> Result<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        std::fs::create_dir_all(&self.root)?;
        let _ = self.events.send(CacheEvent::Cleaned);
        Ok(())
    }
}
