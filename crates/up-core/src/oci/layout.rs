//! OCI image-layout directories for built function images.

use std::path::Path;

use super::image::{Image, ImageIndex, sha256_digest};
use crate::error::Result;

const LAYOUT_FILE: &str = "oci-layout";
const LAYOUT_VERSION: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

fn write_blob(dir: &Path, data: &[u8]) -> Result<()> {
    let digest = sha256_digest(data);
    let hex = digest.trim_start_matches("sha256:");
    let path = dir.join("blobs").join("sha256").join(hex);
    if !path.exists() {
        std::fs::write(path, data)?;
    }
    Ok(())
}

/// Write `images` as one multi-platform layout rooted at `dir`. Returns the
/// digest of the index.
pub fn write_layout(dir: &Path, images: &[Image]) -> Result<String> {
    std::fs::create_dir_all(dir.join("blobs").join("sha256"))?;
    std::fs::write(dir.join(LAYOUT_FILE), LAYOUT_VERSION)?;

    for image in images {
        write_blob(dir, &image.config_bytes()?)?;
        for layer in image.layers() {
            write_blob(dir, &layer.blob)?;
        }
        write_blob(dir, &image.manifest_bytes()?)?;
    }

    let index = ImageIndex::new(images.to_vec());
    let body = serde_json::to_vec_pretty(&index.manifest()?)?;
    std::fs::write(dir.join("index.json"), &body)?;
    tracing::debug!(dir = %dir.display(), images = images.len(), "wrote image layout");
    Ok(sha256_digest(&body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::image::Index;
    use up_schema::Platform;

    #[test]
    fn test_layout_has_every_blob() {
        let dir = tempfile::tempdir().unwrap();
        let images = vec![
            Image::empty(&Platform::linux("amd64")),
            Image::empty(&Platform::linux("arm64")),
        ];
        write_layout(dir.path(), &images).unwrap();

        assert!(dir.path().join("oci-layout").exists());
        let index: Index =
            serde_json::from_slice(&std::fs::read(dir.path().join("index.json")).unwrap()).unwrap();
        assert_eq!(index.manifests.len(), 2);

        for desc in &index.manifests {
            let hex = desc.digest.trim_start_matches("sha256:");
            assert!(dir.path().join("blobs/sha256").join(hex).exists());
        }
        let archs: Vec<_> = index
            .manifests
            .iter()
            .map(|d| d.platform.as_ref().unwrap().architecture.as_str())
            .collect();
        assert_eq!(archs, ["amd64", "arm64"]);
    }
}
