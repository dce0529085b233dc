//! In-memory OCI images.
//!
//! An [`Image`] owns its config and every layer blob. Images pulled from a
//! registry keep the exact manifest and config bytes they were served with,
//! so their digest is stable; any mutation drops those bytes and the
//! manifest is re-serialized on demand.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use up_schema::{Platform, xpkg};

use crate::archive;
use crate::error::{Error, RegistryError, Result};

pub mod media_types {
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
    pub const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
    pub const OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

    pub fn is_index(media_type: &str) -> bool {
        media_type == OCI_INDEX || media_type == DOCKER_MANIFEST_LIST
    }

    pub fn is_manifest(media_type: &str) -> bool {
        media_type == OCI_MANIFEST || media_type == DOCKER_MANIFEST
    }
}

use media_types::{DOCKER_CONFIG, DOCKER_MANIFEST, OCI_CONFIG, OCI_INDEX, OCI_LAYER_GZIP, OCI_MANIFEST};

fn null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Check `data` against a `sha256:` digest. Other algorithms are accepted
/// unchecked.
pub fn verify_digest(expected: &str, data: &[u8]) -> Result<()> {
    if !expected.starts_with("sha256:") {
        return Ok(());
    }
    let actual = sha256_digest(data);
    if actual != expected {
        return Err(RegistryError::DigestMismatch {
            expected: expected.to_string(),
            actual,
        }
        .into());
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "null_default")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    /// Descriptor of `data` stored as `media_type`.
    pub fn for_bytes(media_type: &str, data: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: sha256_digest(data),
            size: data.len() as u64,
            annotations: BTreeMap::new(),
            platform: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default, deserialize_with = "null_default")]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "null_default")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "null_default")]
    pub annotations: BTreeMap<String, String>,
}

/// Only the `mediaType` of a manifest or index, for sniffing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaTypeProbe {
    #[serde(default)]
    pub(crate) media_type: Option<String>,
    #[serde(default)]
    pub(crate) manifests: Option<Value>,
}

impl MediaTypeProbe {
    pub(crate) fn resolve(&self, header: Option<&str>) -> String {
        self.media_type
            .clone()
            .or_else(|| header.map(str::to_string))
            .unwrap_or_else(|| {
                if self.manifests.is_some() {
                    OCI_INDEX.to_string()
                } else {
                    OCI_MANIFEST.to_string()
                }
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "null_default")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "null_default")]
    pub labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    #[serde(default, deserialize_with = "null_default")]
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            fs_type: "layers".to_string(),
            diff_ids: Vec::new(),
        }
    }
}

/// The image config blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default)]
    pub rootfs: RootFs,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "null_default")]
    pub history: Vec<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A compressed layer blob with its descriptor.
#[derive(Debug, Clone)]
pub struct Layer {
    pub descriptor: Descriptor,
    /// Digest of the uncompressed tar.
    pub diff_id: String,
    pub blob: Bytes,
}

impl Layer {
    /// Gzip an uncompressed tar into an OCI layer.
    pub fn from_tar(tar: &[u8]) -> Result<Self> {
        let gz = archive::gzip(tar)?;
        Ok(Self {
            descriptor: Descriptor::for_bytes(OCI_LAYER_GZIP, &gz),
            diff_id: sha256_digest(tar),
            blob: Bytes::from(gz),
        })
    }

    /// Wrap a blob as served by a registry or found in a tarball.
    pub fn from_blob(descriptor: Descriptor, blob: Bytes, diff_id: Option<String>) -> Result<Self> {
        let diff_id = match diff_id {
            Some(d) => d,
            None => sha256_digest(&archive::maybe_gunzip(&blob)?),
        };
        Ok(Self {
            descriptor,
            diff_id,
            blob,
        })
    }

    pub fn uncompressed(&self) -> Result<Vec<u8>> {
        archive::maybe_gunzip(&self.blob)
    }

    /// Set the xpkg annotation on the descriptor.
    pub fn with_annotation(mut self, value: &str) -> Self {
        self.descriptor
            .annotations
            .insert(xpkg::ANNOTATION_KEY.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone)]
struct RawImage {
    manifest: Bytes,
    config: Bytes,
}

/// A single-platform image. Pulled images keep the bytes they were served
/// with, so their digest is stable until modified.
#[derive(Debug, Clone)]
pub struct Image {
    media_type: String,
    config: ConfigFile,
    layers: Vec<Layer>,
    annotations: BTreeMap<String, String>,
    raw: Option<RawImage>,
}

impl Image {
    /// An image without layers for `platform`.
    pub fn empty(platform: &Platform) -> Self {
        Self {
            media_type: OCI_MANIFEST.to_string(),
            config: ConfigFile {
                architecture: platform.architecture.clone(),
                os: platform.os.clone(),
                variant: platform.variant.clone(),
                ..ConfigFile::default()
            },
            layers: Vec::new(),
            annotations: BTreeMap::new(),
            raw: None,
        }
    }

    /// Assemble from a config and layers; the manifest is synthesized.
    pub fn from_config(config: ConfigFile, layers: Vec<Layer>) -> Self {
        Self {
            media_type: OCI_MANIFEST.to_string(),
            config,
            layers,
            annotations: BTreeMap::new(),
            raw: None,
        }
    }

    /// Assemble from a manifest, its config blob and its layer blobs (in
    /// manifest order).
    pub fn from_parts(manifest: Bytes, config: Bytes, blobs: Vec<Bytes>) -> Result<Self> {
        let parsed: Manifest = serde_json::from_slice(&manifest)?;
        let config_file: ConfigFile = serde_json::from_slice(&config)?;
        if parsed.layers.len() != blobs.len() {
            return Err(Error::Image(format!(
                "manifest lists {} layers, got {}",
                parsed.layers.len(),
                blobs.len()
            )));
        }

        let layers = parsed
            .layers
            .iter()
            .zip(blobs)
            .enumerate()
            .map(|(i, (desc, blob))| {
                let diff_id = config_file.rootfs.diff_ids.get(i).cloned();
                Layer::from_blob(desc.clone(), blob, diff_id)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            media_type: parsed.media_type.clone().unwrap_or_else(|| OCI_MANIFEST.to_string()),
            config: config_file,
            layers,
            annotations: parsed.annotations,
            raw: Some(RawImage { manifest, config }),
        })
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Mutable access to the config. Invalidates the served digest.
    pub fn config_mut(&mut self) -> &mut ConfigFile {
        self.raw = None;
        &mut self.config
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn platform(&self) -> Platform {
        Platform {
            os: self.config.os.clone(),
            architecture: self.config.architecture.clone(),
            variant: self.config.variant.clone(),
        }
    }

    pub fn config_bytes(&self) -> Result<Bytes> {
        match &self.raw {
            Some(raw) => Ok(raw.config.clone()),
            None => Ok(Bytes::from(serde_json::to_vec(&self.config)?)),
        }
    }

    fn config_media_type(&self) -> &'static str {
        if self.media_type == DOCKER_MANIFEST {
            DOCKER_CONFIG
        } else {
            OCI_CONFIG
        }
    }

    pub fn manifest(&self) -> Result<Manifest> {
        if let Some(raw) = &self.raw {
            return Ok(serde_json::from_slice(&raw.manifest)?);
        }
        let config = self.config_bytes()?;
        Ok(Manifest {
            schema_version: 2,
            media_type: Some(self.media_type.clone()),
            config: Descriptor::for_bytes(self.config_media_type(), &config),
            layers: self.layers.iter().map(|l| l.descriptor.clone()).collect(),
            annotations: self.annotations.clone(),
        })
    }

    pub fn manifest_bytes(&self) -> Result<Bytes> {
        match &self.raw {
            Some(raw) => Ok(raw.manifest.clone()),
            None => Ok(Bytes::from(serde_json::to_vec(&self.manifest()?)?)),
        }
    }

    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.manifest_bytes()?))
    }

    /// Manifest descriptor, carrying this image's platform.
    pub fn descriptor(&self) -> Result<Descriptor> {
        let bytes = self.manifest_bytes()?;
        let mut desc = Descriptor::for_bytes(&self.media_type, &bytes);
        desc.platform = Some(self.platform());
        Ok(desc)
    }

    /// The xpkg annotation of a layer, from its descriptor or, failing that,
    /// from the `io.crossplane.xpkg:<digest>` config label.
    pub fn layer_annotation<'a>(&'a self, layer: &'a Layer) -> Option<&'a str> {
        layer
            .descriptor
            .annotations
            .get(xpkg::ANNOTATION_KEY)
            .or_else(|| self.config.config.labels.get(&xpkg::label(&layer.descriptor.digest)))
            .map(String::as_str)
    }

    /// First layer carrying `annotation`.
    pub fn annotated_layer(&self, annotation: &str) -> Option<&Layer> {
        self.layers
            .iter()
            .find(|l| self.layer_annotation(l) == Some(annotation))
    }

    pub fn append_layer(&mut self, layer: Layer) {
        self.raw = None;
        self.config.rootfs.diff_ids.push(layer.diff_id.clone());
        if !self.config.history.is_empty() {
            self.config
                .history
                .push(serde_json::json!({ "created_by": "up function build" }));
        }
        self.layers.push(layer);
    }

    /// Keep layers for which `keep(layer, annotation)` holds. History is
    /// dropped since it no longer lines up with the layers.
    pub fn retain_layers<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Layer, Option<&str>) -> bool,
    {
        let flags: Vec<bool> = self
            .layers
            .iter()
            .map(|l| keep(l, self.layer_annotation(l)))
            .collect();
        let mut flags = flags.into_iter();
        self.layers.retain(|_| flags.next().unwrap_or(false));

        self.raw = None;
        self.config.history.clear();
        self.config.rootfs = RootFs {
            fs_type: "layers".to_string(),
            diff_ids: self.layers.iter().map(|l| l.diff_id.clone()).collect(),
        };
    }

    /// Set `key=value` in the config environment, replacing an existing entry.
    pub fn set_env(&mut self, key: &str, value: &str) {
        let entry = format!("{key}={value}");
        let env = &mut self.config_mut().config.env;
        let prefix = format!("{key}=");
        match env.iter_mut().find(|e| e.starts_with(&prefix)) {
            Some(existing) => *existing = entry,
            None => env.push(entry),
        }
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        let prefix = format!("{key}=");
        self.config
            .config
            .env
            .iter()
            .find_map(|e| e.strip_prefix(&prefix))
    }
}

/// A multi-platform set of images.
#[derive(Debug, Clone, Default)]
pub struct ImageIndex {
    images: Vec<Image>,
}

impl ImageIndex {
    pub fn new(images: Vec<Image>) -> Self {
        Self { images }
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn into_images(self) -> Vec<Image> {
        self.images
    }

    pub fn manifest(&self) -> Result<Index> {
        Ok(Index {
            schema_version: 2,
            media_type: Some(OCI_INDEX.to_string()),
            manifests: self
                .images
                .iter()
                .map(Image::descriptor)
                .collect::<Result<_>>()?,
            annotations: BTreeMap::new(),
        })
    }

    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&serde_json::to_vec(&self.manifest()?)?))
    }
}
