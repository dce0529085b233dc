use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::DEFAULT_REGISTRY;
use crate::error::{Error, Result};

static REPO_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").unwrap()
});
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap());
static DIGEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[+._-][a-z0-9]+)*:[0-9a-fA-F]{32,}$").unwrap()
});

/// A parsed image reference: `registry/repository[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl Reference {
    /// Parse with [`DEFAULT_REGISTRY`] for references without a registry.
    pub fn parse(s: &str) -> Result<Self> {
        Self::parse_with_registry(s, DEFAULT_REGISTRY)
    }

    pub fn parse_with_registry(s: &str, default_registry: &str) -> Result<Self> {
        let invalid = || Error::InvalidReference(s.to_string());

        let (rest, digest) = match s.split_once('@') {
            Some((r, d)) => (r, Some(d)),
            None => (s, None),
        };
        let last_slash = rest.rfind('/');
        let (name, tag) = match rest.rfind(':') {
            Some(i) if last_slash.is_none_or(|j| i > j) => (&rest[..i], Some(&rest[i + 1..])),
            _ => (rest, None),
        };

        let (registry, mut repository) = match name.split_once('/') {
            Some((first, remainder))
                if first.contains(['.', ':']) || first == "localhost" =>
            {
                (first.to_string(), remainder.to_string())
            }
            _ => (default_registry.to_string(), name.to_string()),
        };

        if matches!(registry.as_str(), "docker.io" | "index.docker.io") && !repository.contains('/')
        {
            repository = format!("library/{repository}");
        }

        if repository.is_empty() || !repository.split('/').all(|c| REPO_COMPONENT.is_match(c)) {
            return Err(invalid());
        }
        if tag.is_some_and(|t| !TAG.is_match(t)) || digest.is_some_and(|d| !DIGEST.is_match(d)) {
            return Err(invalid());
        }

        Ok(Self {
            registry,
            repository,
            tag: tag.map(str::to_string),
            digest: digest.map(str::to_string),
        })
    }

    /// Tag or digest to address the manifest with; digest wins.
    pub fn identifier(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or("latest")
    }

    /// `registry/repository`
    pub fn context(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            tag: Some(tag.to_string()),
            digest: None,
            ..self.clone()
        }
    }

    pub fn with_digest(&self, digest: &str) -> Self {
        Self {
            digest: Some(digest.to_string()),
            ..self.clone()
        }
    }

    /// Host serving the distribution API for this registry.
    pub fn api_host(&self) -> &str {
        match self.registry.as_str() {
            "docker.io" | "index.docker.io" => "registry-1.docker.io",
            other => other,
        }
    }

    /// Registries on the loopback interface are assumed to speak plain HTTP.
    pub fn is_local(&self) -> bool {
        let host = self.registry.split(':').next().unwrap_or_default();
        matches!(host, "localhost" | "127.0.0.1")
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
