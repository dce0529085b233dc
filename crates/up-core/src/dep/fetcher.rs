//! Where package images come from.

use std::path::PathBuf;

use async_trait::async_trait;
use up_schema::{Platform, xpkg};

use crate::error::{RegistryError, Result, ResultExt};
use crate::oci::{Descriptor, Image, Reference, RegistryClient, tarball};

/// Source of package images.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Pull the image `reference` points at.
    async fn fetch(&self, reference: &Reference) -> Result<Image>;

    /// Manifest descriptor of `reference`. A missing tag surfaces as
    /// [`RegistryError::NotFound`].
    async fn head(&self, reference: &Reference) -> Result<Descriptor>;

    /// Every tag of the repository.
    async fn tags(&self, reference: &Reference) -> Result<Vec<String>>;
}

/// Fetches packages from OCI registries. Indexes resolve to `linux/amd64`.
#[derive(Debug, Clone, Default)]
pub struct RegistryFetcher {
    client: RegistryClient,
    platform: Option<Platform>,
}

impl RegistryFetcher {
    pub fn new(client: RegistryClient) -> Self {
        Self {
            client,
            platform: None,
        }
    }

    /// Resolve indexes to `platform` instead.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }
}

#[async_trait]
impl Fetcher for RegistryFetcher {
    async fn fetch(&self, reference: &Reference) -> Result<Image> {
        let platform = self.platform.clone().unwrap_or_else(Platform::default_package);
        self.client.image(reference, &platform).await
    }

    async fn head(&self, reference: &Reference) -> Result<Descriptor> {
        self.client.head_manifest(reference).await
    }

    async fn tags(&self, reference: &Reference) -> Result<Vec<String>> {
        self.client.list_tags(reference).await
    }
}

/// Serves `<root>/<registry>/<repository>/<tag>.xpkg` tarballs.
#[derive(Debug, Clone)]
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, reference: &Reference) -> PathBuf {
        self.root
            .join(&reference.registry)
            .join(&reference.repository)
            .join(format!("{}{}", reference.identifier(), xpkg::XPKG_EXTENSION))
    }
}

#[async_trait]
impl Fetcher for FsFetcher {
    async fn fetch(&self, reference: &Reference) -> Result<Image> {
        let path = self.path(reference);
        if !path.is_file() {
            return Err(RegistryError::NotFound(reference.to_string()).into());
        }
        tarball::read_tarball_file(&path).with_context(|| "failed to load image from tarball")
    }

    async fn head(&self, reference: &Reference) -> Result<Descriptor> {
        let image = self.fetch(reference).await?;
        let mut desc = Descriptor::for_bytes(image.media_type(), &image.manifest_bytes()?);
        desc.platform = Some(image.platform());
        Ok(desc)
    }

    async fn tags(&self, reference: &Reference) -> Result<Vec<String>> {
        let dir = self.root.join(&reference.registry).join(&reference.repository);
        let mut tags = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(tag) = name.strip_suffix(xpkg::XPKG_EXTENSION) {
                tags.push(tag.to_string());
            }
        }
        tags.sort();
        Ok(tags)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! An in-memory registry for resolver and manager tests.

    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    pub(crate) struct MockFetcher {
        /// `registry/repo` -> tag -> image
        pub(crate) images: Mutex<BTreeMap<String, BTreeMap<String, Image>>>,
        pub(crate) fetches: AtomicUsize,
    }

    impl MockFetcher {
        pub(crate) fn add(&self, package: &str, tag: &str, image: Image) {
            let reference = Reference::parse(package).unwrap();
            self.images
                .lock()
                .unwrap()
                .entry(reference.context())
                .or_default()
                .insert(tag.to_string(), image);
        }

        pub(crate) fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        fn lookup(&self, reference: &Reference) -> Result<Image> {
            let images = self.images.lock().unwrap();
            let repo = images
                .get(&reference.context())
                .ok_or_else(|| RegistryError::NotFound(reference.to_string()))?;
            let found = match &reference.digest {
                Some(d) => repo.values().find(|i| i.digest().is_ok_and(|x| &x == d)),
                None => repo.get(reference.identifier()),
            };
            found
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(reference.to_string()).into())
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, reference: &Reference) -> Result<Image> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.lookup(reference)
        }

        async fn head(&self, reference: &Reference) -> Result<Descriptor> {
            let image = self.lookup(reference)?;
            image.descriptor()
        }

        async fn tags(&self, reference: &Reference) -> Result<Vec<String>> {
            let images = self.images.lock().unwrap();
            Ok(images
                .get(&reference.context())
                .map(|repo| repo.keys().cloned().collect())
                .unwrap_or_default())
        }
    }
}
