//! Resolve dependency constraints against a registry.

use std::sync::Arc;

use async_trait::async_trait;
use up_schema::{Constraint, DEFAULT_CONSTRAINT, Dependency, Version};

use super::fetcher::Fetcher;
use crate::config::DEFAULT_REGISTRY;
use crate::error::{Error, RegistryError, Result, ResultExt};
use crate::oci::{Descriptor, Image, Reference};

/// Number of versions listed when nothing satisfies a constraint.
const SUGGESTED_VERSIONS: usize = 3;

/// Turns dependency constraints into exact tags, digests and images.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// Resolve a tag constraint to an exact tag.
    async fn resolve_tag(&self, dep: &Dependency) -> Result<String>;

    /// Digest of the manifest `dep` points at.
    async fn resolve_digest(&self, dep: &Dependency) -> Result<String>;

    /// Resolve `dep` and pull its image. Returns the resolved version (tag
    /// or digest), the image and its manifest descriptor.
    async fn resolve_image(&self, dep: &Dependency) -> Result<(String, Image, Descriptor)>;
}

/// [`ImageResolver`] over a [`Fetcher`]. Tags that are not versions are
/// ignored when matching constraints.
pub struct Resolver {
    fetcher: Arc<dyn Fetcher>,
    default_registry: String,
}

impl Resolver {
    /// Resolve against `fetcher`, assuming the default registry.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            default_registry: DEFAULT_REGISTRY.to_string(),
        }
    }

    /// Registry assumed for packages named without one.
    pub fn with_default_registry(mut self, registry: impl Into<String>) -> Self {
        self.default_registry = registry.into();
        self
    }

    fn reference(&self, package: &str) -> Result<Reference> {
        Reference::parse_with_registry(package, &self.default_registry)
    }

    fn constraints(dep: &Dependency) -> &str {
        if dep.constraints.is_empty() {
            DEFAULT_CONSTRAINT
        } else {
            &dep.constraints
        }
    }
}

#[async_trait]
impl ImageResolver for Resolver {
    async fn resolve_tag(&self, dep: &Dependency) -> Result<String> {
        let constraints = Self::constraints(dep);

        // An exact version only needs to exist.
        if Version::parse(constraints).is_ok() {
            let exact = Dependency {
                constraints: constraints.to_string(),
                ..dep.clone()
            };
            self.resolve_digest(&exact).await?;
            return Ok(constraints.to_string());
        }

        let constraint = Constraint::parse(constraints)?;
        let reference = self.reference(&dep.package)?;
        let tags = self
            .fetcher
            .tags(&reference)
            .await
            .with_context(|| "failed to fetch tags")?;

        let mut versions: Vec<Version> = tags.iter().filter_map(|t| Version::parse(t).ok()).collect();
        versions.sort();

        if let Some(best) = versions.iter().rev().find(|v| constraint.matches(v)) {
            tracing::debug!(package = %dep.package, constraint = constraints, version = %best, "resolved tag");
            return Ok(best.original().to_string());
        }

        let skip = versions.len().saturating_sub(SUGGESTED_VERSIONS);
        Err(RegistryError::NoMatchingVersion {
            available: versions[skip..].iter().map(|v| v.original().to_string()).collect(),
        }
        .into())
    }

    async fn resolve_digest(&self, dep: &Dependency) -> Result<String> {
        let reference = if dep.is_digest() {
            self.reference(&dep.package)?.with_digest(&dep.constraints)
        } else {
            self.reference(&dep.package)?.with_tag(Self::constraints(dep))
        };

        match self.fetcher.head(&reference).await {
            Ok(desc) => Ok(desc.digest),
            Err(Error::Registry(RegistryError::NotFound(_))) => Err(RegistryError::TagDoesNotExist.into()),
            Err(e) => Err(e),
        }
    }

    async fn resolve_image(&self, dep: &Dependency) -> Result<(String, Image, Descriptor)> {
        let (version, reference) = if dep.is_digest() {
            let digest = self
                .resolve_digest(dep)
                .await
                .with_context(|| format!("failed to resolve {}@{}", dep.package, dep.constraints))?;
            let reference = self.reference(&dep.package)?.with_digest(&digest);
            (digest, reference)
        } else {
            let tag = self
                .resolve_tag(dep)
                .await
                .with_context(|| format!("failed to resolve {}:{}", dep.package, dep.constraints))?;
            let reference = self.reference(&dep.package)?.with_tag(&tag);
            (tag, reference)
        };

        let image = self.fetcher.fetch(&reference).await?;
        let desc = self.fetcher.head(&reference).await?;
        Ok((version, image, desc))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fetcher::testing::MockFetcher;
    use super::*;
    use up_schema::Platform;

    const FN: &str = "crossplane-contrib/function-auto-ready";

    fn resolver(tags: &[&str]) -> (Resolver, Arc<MockFetcher>) {
        let fetcher = Arc::new(MockFetcher::default());
        for (i, tag) in tags.iter().enumerate() {
            let arch = if i % 2 == 0 { "amd64" } else { "arm64" };
            fetcher.add(FN, tag, Image::empty(&Platform::linux(arch)));
        }
        (Resolver::new(fetcher.clone()), fetcher)
    }

    #[tokio::test]
    async fn test_empty_constraint_picks_latest() {
        let (r, _) = resolver(&["v0.2.1"]);
        let dep = Dependency::parse(FN);
        assert_eq!(r.resolve_tag(&dep).await.unwrap(), "v0.2.1");

        let blank = Dependency {
            constraints: String::new(),
            ..dep
        };
        assert_eq!(r.resolve_tag(&blank).await.unwrap(), "v0.2.1");
    }

    #[tokio::test]
    async fn test_max_satisfying_wins() {
        let (r, _) = resolver(&["v0.1.0", "v1.0.0", "v1.2.0", "v2.0.0", "latest"]);
        let dep = Dependency::parse(&format!("{FN}@>=v1.0.0, <v2.0.0"));
        assert_eq!(r.resolve_tag(&dep).await.unwrap(), "v1.2.0");
    }

    #[tokio::test]
    async fn test_no_match_lists_three_highest() {
        let (r, _) = resolver(&["v0.1.0", "v1.0.0", "v2.0.0", "v3.0.0"]);
        let err = r
            .resolve_tag(&Dependency::parse(&format!("{FN}@>=v4.0.0")))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "supplied version does not match an existing version. Latest available versions: [v1.0.0 v2.0.0 v3.0.0]"
        );

        let (r, _) = resolver(&["v0.2.1"]);
        let err = r
            .resolve_tag(&Dependency::parse(&format!("{FN}@<v0.2.0")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("[v0.2.1]"));
    }

    #[tokio::test]
    async fn test_exact_version_must_exist() {
        let (r, _) = resolver(&["v0.2.1"]);
        let ok = Dependency::parse(&format!("{FN}:v0.2.1"));
        assert_eq!(r.resolve_tag(&ok).await.unwrap(), "v0.2.1");

        let missing = Dependency::parse(&format!("{FN}:v0.3.0"));
        let err = r.resolve_tag(&missing).await.unwrap_err();
        assert_eq!(err.to_string(), "supplied tag does not exist in the registry");
    }

    #[tokio::test]
    async fn test_invalid_constraint() {
        let (r, _) = resolver(&["v0.2.1"]);
        let err = r
            .resolve_tag(&Dependency::parse(&format!("{FN}@alpha")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConstraint(_)));
    }

    #[tokio::test]
    async fn test_resolve_image_by_tag_and_digest() {
        let (r, fetcher) = resolver(&["v0.2.1"]);
        let (version, image, desc) = r
            .resolve_image(&Dependency::parse(FN))
            .await
            .unwrap();
        assert_eq!(version, "v0.2.1");
        assert_eq!(desc.digest, image.digest().unwrap());
        assert_eq!(fetcher.fetch_count(), 1);

        let by_digest = Dependency::parse(&format!("{FN}@{}", desc.digest));
        assert!(by_digest.is_digest());
        let (version, _, _) = r.resolve_image(&by_digest).await.unwrap();
        assert_eq!(version, desc.digest);
    }

    #[tokio::test]
    async fn test_resolve_image_wraps_errors() {
        let (r, _) = resolver(&["v0.2.1"]);
        let err = r
            .resolve_image(&Dependency::parse(&format!("{FN}@<v0.2.0")))
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with(&format!("failed to resolve {FN}:<v0.2.0: supplied version")));
    }
}
