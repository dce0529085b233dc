//! Decode xpkg images into [`ParsedPackage`]s.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use up_schema::{Dependency, MetaDependency, PackageType, xpkg};

use crate::archive;
use crate::error::{Error, Result, ResultExt};
use crate::oci::Image;
use crate::tree::{DirTree, MemTree, SourceTree};

const META_GROUP: &str = "meta.pkg.crossplane.io/";
const SCHEMAS_DIR: &str = "schemas";

/// Where an image came from, as resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMeta {
    pub repo: String,
    pub registry: String,
    pub version: String,
    pub digest: String,
}

/// A pulled image with the coordinates it was resolved from.
#[derive(Debug, Clone)]
pub struct ImageWithMeta {
    pub meta: ImageMeta,
    pub image: Image,
}

/// A decoded package. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPackage {
    pub name: String,
    pub registry: String,
    pub version: String,
    pub digest: String,
    pub package_type: PackageType,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    pub meta: Value,
    #[serde(default)]
    pub objects: Vec<Value>,
    /// Schema trees keyed by language (`kcl`, `python`, `go`).
    #[serde(skip)]
    pub schemas: BTreeMap<String, MemTree>,
}

impl ParsedPackage {
    /// The dependency this package satisfies, pinned to its version.
    pub fn dependency(&self) -> Dependency {
        Dependency {
            package: self.name.clone(),
            package_type: Some(self.package_type),
            constraints: self.version.clone(),
        }
    }
}

/// Decodes packages.
pub trait Marshaler: Send + Sync {
    /// Decode a pulled xpkg image.
    fn from_image(&self, image: ImageWithMeta) -> Result<ParsedPackage>;

    /// Read a package previously written to a cache directory.
    fn from_dir(&self, path: &Path) -> Result<ParsedPackage>;
}

/// [`Marshaler`] for the xpkg image format.
#[derive(Debug, Clone, Copy, Default)]
pub struct XpkgMarshaler;

impl XpkgMarshaler {
    pub fn new() -> Self {
        Self
    }
}

/// Split a package stream into its meta object and the remaining objects.
pub fn parse_stream(raw: &str) -> Result<(Value, Vec<Value>)> {
    let mut meta = None;
    let mut objects = Vec::new();

    for doc in serde_yaml::Deserializer::from_str(raw) {
        let value = Value::deserialize(doc)?;
        if value.is_null() {
            continue;
        }
        let is_meta = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .is_some_and(|v| v.starts_with(META_GROUP));
        if !is_meta {
            objects.push(value);
        } else if meta.replace(value).is_some() {
            return Err(Error::Package("package contains more than one meta object".into()));
        }
    }

    let meta = meta.ok_or_else(|| Error::Package("package contains no meta object".into()))?;
    Ok((meta, objects))
}

fn package_type(meta: &Value) -> Result<PackageType> {
    let kind = meta.get("kind").and_then(Value::as_str).unwrap_or_default();
    kind.parse()
        .map_err(|_| Error::Package(format!("unknown package kind {kind:?}")))
}

fn dependencies(meta: &Value) -> Result<Vec<Dependency>> {
    let Some(list) = meta.pointer("/spec/dependsOn") else {
        return Ok(Vec::new());
    };
    let entries: Vec<MetaDependency> = serde_json::from_value(list.clone())?;
    Ok(entries.iter().filter_map(MetaDependency::to_dependency).collect())
}

fn decode(meta_info: ImageMeta, stream: &str, schemas: BTreeMap<String, MemTree>) -> Result<ParsedPackage> {
    let (meta, objects) = parse_stream(stream)?;
    Ok(ParsedPackage {
        name: meta_info.repo,
        registry: meta_info.registry,
        version: meta_info.version,
        digest: meta_info.digest,
        package_type: package_type(&meta)?,
        dependencies: dependencies(&meta)?,
        meta,
        objects,
        schemas,
    })
}

impl Marshaler for XpkgMarshaler {
    fn from_image(&self, img: ImageWithMeta) -> Result<ParsedPackage> {
        let ImageWithMeta { meta, image } = img;

        let stream_file = Path::new(xpkg::STREAM_FILE);
        let stream = match image.annotated_layer(xpkg::PACKAGE_ANNOTATION) {
            Some(layer) => archive::unpack_layer(&layer.blob)?
                .read(stream_file)
                .with_context(|| format!("package layer of {} has no {}", meta.repo, xpkg::STREAM_FILE))?,
            None => {
                let mut found = None;
                for layer in image.layers() {
                    let tree = archive::unpack_layer(&layer.blob)?;
                    if tree.exists(stream_file) {
                        found = Some(tree.read(stream_file)?);
                        break;
                    }
                }
                found.ok_or_else(|| {
                    Error::Package(format!("{} not found in {}", xpkg::STREAM_FILE, meta.repo))
                })?
            }
        };

        let mut schemas = BTreeMap::new();
        for (annotation, language) in xpkg::SCHEMA_ANNOTATIONS {
            if let Some(layer) = image.annotated_layer(annotation) {
                schemas.insert((*language).to_string(), archive::unpack_layer(&layer.blob)?);
            }
        }

        let stream = String::from_utf8_lossy(&stream);
        decode(meta, &stream, schemas).with_context(|| format!("failed to decode package {}", image_name(&image)))
    }

    fn from_dir(&self, path: &Path) -> Result<ParsedPackage> {
        let tree = DirTree::new(path);
        let stream = tree.read(Path::new(xpkg::STREAM_FILE))?;

        let mut schemas = BTreeMap::new();
        let schema_root = path.join(SCHEMAS_DIR);
        if schema_root.is_dir() {
            for entry in std::fs::read_dir(&schema_root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    let language = entry.file_name().to_string_lossy().into_owned();
                    schemas.insert(language, MemTree::from_dir(&entry.path())?);
                }
            }
        }

        let pkg: Option<ParsedPackage> = std::fs::read(path.join(super::cache::PACKAGE_FILE))
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok());
        let info = pkg
            .map(|p| ImageMeta {
                repo: p.name,
                registry: p.registry,
                version: p.version,
                digest: p.digest,
            })
            .unwrap_or_default();

        decode(info, &String::from_utf8_lossy(&stream), schemas)
    }
}

fn image_name(image: &Image) -> String {
    image.digest().unwrap_or_else(|_| "image".to_string())
}

/// Shared handle to a decoded package.
pub type PackageRef = Arc<ParsedPackage>;


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn meta(repo: &str) -> ImageMeta {
        ImageMeta {
            repo: repo.into(),
            registry: "xpkg.upbound.io".into(),
            version: "v1.0.0".into(),
            digest: "sha256:abc".into(),
        }
    }

    #[test]
    fn test_parse_stream_splits_meta() {
        let stream = format!(
            "{}---\napiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\n---\n",
            meta_yaml("Provider", "provider-aws", &[])
        );
        let (meta, objects) = parse_stream(&stream).unwrap();
        assert_eq!(meta["kind"], "Provider");
        assert_eq!(objects.len(), 1);

        assert!(parse_stream("apiVersion: v1\nkind: ConfigMap\n").is_err());
        let twice = format!("{}---\n{}", meta_yaml("Function", "a", &[]), meta_yaml("Function", "b", &[]));
        assert!(parse_stream(&twice).is_err());
    }

    #[test]
    fn test_from_image_reads_deps_and_schemas() {
        let stream = meta_yaml(
            "Configuration",
            "platform-ref",
            &[
                ("provider", "xpkg.upbound.io/upbound/provider-aws-s3", ">=v1.0.0"),
                ("function", "xpkg.upbound.io/crossplane-contrib/function-auto-ready", "v0.2.1"),
            ],
        );
        let mut kcl = MemTree::new();
        kcl.insert_file("models/kcl.mod", "[package]").unwrap();
        let image = package_image(&stream, &[(xpkg::SCHEMA_KCL_ANNOTATION, kcl)]);

        let pkg = XpkgMarshaler::new()
            .from_image(ImageWithMeta {
                meta: meta("xpkg.upbound.io/acme/platform-ref"),
                image,
            })
            .unwrap();

        assert_eq!(pkg.package_type, PackageType::Configuration);
        assert_eq!(pkg.dependencies.len(), 2);
        assert_eq!(pkg.dependencies[0].package_type, Some(PackageType::Provider));
        assert_eq!(pkg.dependencies[1].constraints, "v0.2.1");
        assert!(pkg.schemas["kcl"].exists(Path::new("models/kcl.mod")));
        assert_eq!(pkg.dependency().constraints, "v1.0.0");
    }

    #[test]
    fn test_from_image_without_annotation_scans_layers() {
        let stream = meta_yaml("Function", "fn", &[]);
        let mut tree = MemTree::new();
        tree.insert_file(xpkg::STREAM_FILE, stream).unwrap();
        let layer = crate::oci::Layer::from_tar(
            &crate::archive::pack_tree(&tree, ".", &Default::default()).unwrap(),
        )
        .unwrap();
        let mut image = Image::empty(&up_schema::Platform::default_package());
        image.append_layer(layer);

        let pkg = XpkgMarshaler
            .from_image(ImageWithMeta {
                meta: meta("acme/fn"),
                image,
            })
            .unwrap();
        assert_eq!(pkg.package_type, PackageType::Function);
    }

    #[test]
    fn test_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.yaml"), meta_yaml("Provider", "p", &[])).unwrap();
        std::fs::create_dir_all(dir.path().join("schemas/python/models")).unwrap();
        std::fs::write(dir.path().join("schemas/python/models/__init__.py"), "").unwrap();

        let pkg = XpkgMarshaler.from_dir(dir.path()).unwrap();
        assert_eq!(pkg.package_type, PackageType::Provider);
        assert!(pkg.schemas["python"].exists(Path::new("models/__init__.py")));
    }
}
