//! `docker save` style image tarballs, the on-disk form of `.xpkg` files.
//!
//! Layout: `manifest.json` (`[{"Config", "RepoTags", "Layers"}]`), the
//! config blob and one file per layer. Uncompressed layers are gzipped on
//! read so every in-memory layer is `tar+gzip`.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tar::{Archive, Builder, Header};

use super::image::{ConfigFile, Descriptor, Image, Layer, media_types};
use crate::archive;
use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TarballEntry {
    config: String,
    #[serde(default)]
    repo_tags: Vec<String>,
    layers: Vec<String>,
}

const MANIFEST_FILE: &str = "manifest.json";

fn clean_name(name: &str) -> &str {
    name.trim_start_matches("./").trim_start_matches('/')
}

/// Read the first image of a tarball.
pub fn read_tarball(data: &[u8]) -> Result<Image> {
    let raw = archive::maybe_gunzip(data)?;
    let mut files: HashMap<String, Vec<u8>> = HashMap::new();
    for entry in Archive::new(raw.as_slice()).entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = clean_name(&entry.path()?.to_string_lossy()).to_string();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        files.insert(name, buf);
    }

    let take = |files: &mut HashMap<String, Vec<u8>>, name: &str| {
        files
            .remove(clean_name(name))
            .ok_or_else(|| Error::Image(format!("tarball is missing {name}")))
    };

    let manifest = take(&mut files, MANIFEST_FILE)?;
    let entries: Vec<TarballEntry> = serde_json::from_slice(&manifest)?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| Error::Image("tarball manifest lists no images".into()))?;

    let config: ConfigFile = serde_json::from_slice(&take(&mut files, &entry.config)?)?;
    let layers = entry
        .layers
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let blob = take(&mut files, name)?;
            if archive::is_gzip(&blob) {
                let desc = Descriptor::for_bytes(media_types::OCI_LAYER_GZIP, &blob);
                Layer::from_blob(desc, Bytes::from(blob), config.rootfs.diff_ids.get(i).cloned())
            } else {
                Layer::from_tar(&blob)
            }
        })
        .collect::<Result<Vec<_>>>()?;

    if layers.len() != config.rootfs.diff_ids.len() {
        return Err(Error::Image(format!(
            "config lists {} diff ids, tarball has {} layers",
            config.rootfs.diff_ids.len(),
            layers.len()
        )));
    }

    Ok(Image::from_config(config, layers))
}

pub fn read_tarball_file(path: &Path) -> Result<Image> {
    read_tarball(&std::fs::read(path)?)
}

/// Serialize `image` as a tarball tagged `repo_tag`.
pub fn write_tarball(image: &Image, repo_tag: &str) -> Result<Vec<u8>> {
    let config = image.config_bytes()?;
    let config_name = super::image::sha256_digest(&config);

    let layer_names: Vec<String> = image
        .layers()
        .iter()
        .map(|l| {
            let hex = l.descriptor.digest.trim_start_matches("sha256:");
            format!("{hex}.tar.gz")
        })
        .collect();

    let manifest = serde_json::to_vec(&[TarballEntry {
        config: config_name.clone(),
        repo_tags: vec![repo_tag.to_string()],
        layers: layer_names.clone(),
    }])?;

    let mut tar = Builder::new(Vec::new());
    let mut add = |name: &str, data: &[u8]| -> Result<()> {
        let mut h = Header::new_gnu();
        h.set_size(data.len() as u64);
        h.set_mode(0o644);
        h.set_mtime(0);
        h.set_entry_type(tar::EntryType::Regular);
        tar.append_data(&mut h, name, data)?;
        Ok(())
    };

    add(&config_name, &config)?;
    for (layer, name) in image.layers().iter().zip(&layer_names) {
        add(name, &layer.blob)?;
    }
    add(MANIFEST_FILE, &manifest)?;

    Ok(tar.into_inner()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{PackOptions, pack_tree};
    use crate::tree::MemTree;
    use up_schema::{Platform, xpkg};

    fn package_image() -> Image {
        let mut tree = MemTree::new();
        tree.insert_file(xpkg::STREAM_FILE, "apiVersion: meta.pkg.crossplane.io/v1\nkind: Function\n")
            .unwrap();
        let layer = Layer::from_tar(&pack_tree(&tree, "pkg", &PackOptions::default()).unwrap()).unwrap();
        let digest = layer.descriptor.digest.clone();

        let mut img = Image::empty(&Platform::linux("amd64"));
        img.append_layer(layer);
        img.config_mut()
            .config
            .labels
            .insert(xpkg::label(&digest), xpkg::PACKAGE_ANNOTATION.into());
        img
    }

    #[test]
    fn test_write_then_read_keeps_digest_and_annotations() {
        let img = package_image();
        let data = write_tarball(&img, "xpkg.upbound.io/acme/fn:v1.0.0").unwrap();
        let back = read_tarball(&data).unwrap();

        assert_eq!(back.digest().unwrap(), img.digest().unwrap());
        assert!(back.annotated_layer(xpkg::PACKAGE_ANNOTATION).is_some());
    }

    #[test]
    fn test_uncompressed_layers_are_gzipped() {
        let raw_layer = {
            let mut t = MemTree::new();
            t.insert_file("a", "b").unwrap();
            pack_tree(&t, "x", &PackOptions::default()).unwrap()
        };
        let diff_id = super::super::image::sha256_digest(&raw_layer);
        let config = serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "rootfs": {"type": "layers", "diff_ids": [diff_id]},
        });
        let manifest = serde_json::json!([{"Config": "config.json", "RepoTags": [], "Layers": ["layer.tar"]}]);

        let mut tar = Builder::new(Vec::new());
        for (name, data) in [
            ("config.json", serde_json::to_vec(&config).unwrap()),
            ("layer.tar", raw_layer),
            ("manifest.json", serde_json::to_vec(&manifest).unwrap()),
        ] {
            let mut h = Header::new_gnu();
            h.set_size(data.len() as u64);
            h.set_mode(0o644);
            tar.append_data(&mut h, name, data.as_slice()).unwrap();
        }

        let img = read_tarball(&tar.into_inner().unwrap()).unwrap();
        let layer = &img.layers()[0];
        assert!(archive::is_gzip(&layer.blob));
        assert_eq!(layer.diff_id, diff_id);
    }

    #[test]
    fn test_missing_manifest() {
        let tar = Builder::new(Vec::new()).into_inner().unwrap();
        assert!(read_tarball(&tar).unwrap_err().to_string().contains("manifest.json"));
    }
}
