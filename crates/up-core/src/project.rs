//! Project files (`upbound.yaml`) and package meta files (`crossplane.yaml`).
//!
//! The file is kept as a YAML document so that writing back a dependency
//! change preserves every field this crate does not model.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use up_schema::{Dependency, MetaDependency};

use crate::error::{Error, Result, ResultExt};
use crate::rewrite::ImageConfig;

/// Project file name.
pub const PROJECT_FILE: &str = "upbound.yaml";
/// Package metadata file name, accepted in place of [`PROJECT_FILE`].
pub const META_FILE: &str = "crossplane.yaml";

const DEFAULT_ARCHITECTURES: [&str; 2] = ["amd64", "arm64"];
const DEFAULT_FUNCTIONS_DIR: &str = "functions";

/// Keys naming the package of a `dependsOn` entry.
const PACKAGE_KEYS: [&str; 4] = ["provider", "configuration", "function", "package"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPaths {
    #[serde(default)]
    pub apis: Option<String>,
    #[serde(default)]
    pub functions: Option<String>,
    #[serde(default)]
    pub examples: Option<String>,
    #[serde(default)]
    pub tests: Option<String>,
}

/// The typed part of a project's `spec`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub depends_on: Vec<MetaDependency>,
    #[serde(default)]
    pub paths: Option<ProjectPaths>,
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub image_config: Vec<ImageConfig>,
}

/// A loaded project file. Fields not modelled by [`ProjectSpec`] survive
/// [`Project::save`] unchanged.
#[derive(Debug, Clone)]
pub struct Project {
    path: PathBuf,
    doc: Value,
    spec: ProjectSpec,
}

impl Project {
    /// Read and parse the project file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(path, &raw)
    }

    pub fn parse(path: &Path, raw: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(raw)?;
        if !doc.is_mapping() {
            return Err(Error::Package(format!("{} is not a YAML object", path.display())));
        }
        let spec = match doc.get("spec") {
            Some(spec) if !spec.is_null() => serde_yaml::from_value(spec.clone())?,
            _ => ProjectSpec::default(),
        };
        Ok(Self {
            path: path.to_path_buf(),
            doc,
            spec,
        })
    }

    /// The project or package meta file in `dir`, `upbound.yaml` first.
    pub fn find(dir: &Path) -> Result<Self> {
        [PROJECT_FILE, META_FILE]
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
            .and_then(|p| Self::load(&p).ok())
            .ok_or_else(|| {
                Error::Package(
                    "metadata file (crossplane.yaml or upbound.yaml) not found in current directory or is malformed"
                        .into(),
                )
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the project file.
    pub fn root(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    pub fn spec(&self) -> &ProjectSpec {
        &self.spec
    }

    /// `spec.dependsOn`, skipping entries that name no package.
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.spec
            .depends_on
            .iter()
            .filter_map(MetaDependency::to_dependency)
            .collect()
    }

    /// Target architectures; `amd64` and `arm64` when unset.
    pub fn architectures(&self) -> Vec<String> {
        if self.spec.architectures.is_empty() {
            DEFAULT_ARCHITECTURES.iter().map(|s| s.to_string()).collect()
        } else {
            self.spec.architectures.clone()
        }
    }

    /// `paths.functions` below the root, `functions` by default.
    pub fn functions_dir(&self) -> PathBuf {
        let rel = self
            .spec
            .paths
            .as_ref()
            .and_then(|p| p.functions.as_deref())
            .unwrap_or(DEFAULT_FUNCTIONS_DIR);
        self.root().join(rel)
    }

    pub fn image_configs(&self) -> &[ImageConfig] {
        &self.spec.image_config
    }

    /// Set the version of `dep` in `spec.dependsOn`, appending an entry if
    /// the package is not listed yet.
    pub fn upsert_dependency(&mut self, dep: &Dependency) -> Result<()> {
        let root = self
            .doc
            .as_mapping_mut()
            .ok_or_else(|| Error::Package("project file is not a YAML object".into()))?;
        let spec = root
            .entry(Value::from("spec"))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if spec.is_null() {
            *spec = Value::Mapping(Mapping::new());
        }
        let spec = spec
            .as_mapping_mut()
            .ok_or_else(|| Error::Package("spec is not a YAML object".into()))?;
        let list = spec
            .entry(Value::from("dependsOn"))
            .or_insert_with(|| Value::Sequence(Vec::new()));
        if list.is_null() {
            *list = Value::Sequence(Vec::new());
        }
        let list = list
            .as_sequence_mut()
            .ok_or_else(|| Error::Package("spec.dependsOn is not a list".into()))?;

        let mut processed = false;
        for entry in list.iter_mut() {
            let names_dep = PACKAGE_KEYS
                .iter()
                .any(|k| entry.get(k).and_then(Value::as_str) == Some(dep.package.as_str()));
            if !names_dep {
                continue;
            }
            if processed {
                return Err(Error::Package("metadata file contains duplicate dependency".into()));
            }
            if let Some(map) = entry.as_mapping_mut() {
                map.insert(Value::from("version"), Value::from(dep.constraints.as_str()));
            }
            processed = true;
        }

        if !processed {
            let key = dep.package_type.map_or("package", |t| t.dir_name());
            let mut entry = Mapping::new();
            entry.insert(Value::from(key), Value::from(dep.package.as_str()));
            entry.insert(Value::from("version"), Value::from(dep.constraints.as_str()));
            list.push(Value::Mapping(entry));
        }

        let spec_value = self.doc.get("spec").cloned().unwrap_or(Value::Null);
        self.spec = serde_yaml::from_value(spec_value)?;
        Ok(())
    }

    /// Write the document back to [`Project::path`].
    pub fn save(&self) -> Result<()> {
        let raw = serde_yaml::to_string(&self.doc)?;
        std::fs::write(&self.path, raw).with_context(|| format!("failed to write {}", self.path.display()))
    }
}
