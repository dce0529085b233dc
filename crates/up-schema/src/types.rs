//! Package types and dependency coordinates.
//!
//! A [`Dependency`] names a package source, an optional [`PackageType`] and a
//! version constraint. Its on-disk form in project files is
//! [`MetaDependency`], keyed by the package type.

use serde::{Deserialize, Serialize};

/// Constraint used when a dependency does not specify one: the latest
/// released version.
pub const DEFAULT_CONSTRAINT: &str = ">=v0.0.0";

/// API version written into meta `dependsOn` entries.
pub const PKG_API_VERSION: &str = "pkg.crossplane.io/v1";

/// Kind of Crossplane package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PackageType {
    /// Installs managed resources and their controllers.
    Provider,
    /// Bundles compositions and XRDs.
    Configuration,
    /// A composition function runtime.
    Function,
}

impl PackageType {
    /// Kind name as it appears in manifests (`Provider`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provider => "Provider",
            Self::Configuration => "Configuration",
            Self::Function => "Function",
        }
    }

    /// Lowercase form used in cache paths.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Configuration => "configuration",
            Self::Function => "function",
        }
    }
}

impl std::fmt::Display for PackageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PackageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "provider" => Ok(Self::Provider),
            "configuration" => Ok(Self::Configuration),
            "function" => Ok(Self::Function),
            _ => Err(format!("Unknown package type: {s}")),
        }
    }
}

/// A declared requirement on an xpkg package.
///
/// Identity is `package`; `package_type` disambiguates packages that share
/// a coordinate across kinds. `constraints` is a semver range, an exact
/// version, or a digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// Package coordinate, e.g. `xpkg.upbound.io/crossplane-contrib/function-auto-ready`.
    pub package: String,

    /// Package kind, when known.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub package_type: Option<PackageType>,

    /// Version constraint, exact tag, or digest.
    #[serde(default)]
    pub constraints: String,
}

impl Dependency {
    /// Parse the CLI form `source@version`, `source:version` or `source`.
    ///
    /// The delimiter is only looked for in the last path segment so that a
    /// registry port (`localhost:5000/repo`) is never taken for a tag. An `@`
    /// wins over `:`, which keeps `repo@sha256:<hex>` intact. A missing or
    /// blank version means [`DEFAULT_CONSTRAINT`].
    ///
    /// ```
    /// use up_schema::Dependency;
    ///
    /// let d = Dependency::parse("xpkg.upbound.io/acme/provider-aws@>=v1.0.0");
    /// assert_eq!(d.package, "xpkg.upbound.io/acme/provider-aws");
    /// assert_eq!(d.constraints, ">=v1.0.0");
    /// ```
    pub fn parse(spec: &str) -> Self {
        let (head, last) = match spec.rfind('/') {
            Some(i) => spec.split_at(i + 1),
            None => ("", spec),
        };

        let split = last.find('@').or_else(|| last.find(':'));
        let (package, version) = match split {
            Some(i) => (format!("{head}{}", &last[..i]), last[i + 1..].trim()),
            None => (spec.to_string(), ""),
        };

        Self {
            package,
            package_type: None,
            constraints: if version.is_empty() {
                DEFAULT_CONSTRAINT.to_string()
            } else {
                version.to_string()
            },
        }
    }

    /// Parse `spec` as in [`Dependency::parse`] and attach a type given by
    /// name (case-insensitive). Unknown names leave the type unset.
    pub fn with_type(spec: &str, package_type: &str) -> Self {
        Self {
            package_type: package_type.parse().ok(),
            ..Self::parse(spec)
        }
    }

    /// Whether the constraint is a content digest (`<algorithm>:<hex>`).
    pub fn is_digest(&self) -> bool {
        let Some((alg, hex)) = self.constraints.split_once(':') else {
            return false;
        };
        let alg_ok = !alg.is_empty()
            && alg
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c));
        let hex_ok = !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
        match alg {
            "sha256" => hex_ok && hex.len() == 64,
            "sha512" => hex_ok && hex.len() == 128,
            _ => alg_ok && hex_ok,
        }
    }

    /// Full image reference. Only meaningful once the constraint has been
    /// resolved to a tag or digest.
    pub fn full_tag(&self) -> String {
        if self.is_digest() {
            format!("{}@{}", self.package, self.constraints)
        } else {
            format!("{}:{}", self.package, self.constraints)
        }
    }

    /// Identity of this dependency across kinds.
    pub fn identifier(&self) -> &str {
        &self.package
    }

    /// The crossplane meta `dependsOn` form of this dependency.
    pub fn to_meta(&self) -> MetaDependency {
        MetaDependency {
            api_version: self.package_type.map(|_| PKG_API_VERSION.to_string()),
            kind: self.package_type.map(|t| t.as_str().to_string()),
            package: Some(self.package.clone()),
            provider: None,
            configuration: None,
            function: None,
            version: self.constraints.clone(),
        }
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.package, self.constraints)
    }
}

/// An entry of a package's `spec.dependsOn` list.
///
/// Older manifests name the package in a kind-specific field
/// (`provider: ...`); newer ones use `package` plus `apiVersion`/`kind`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDependency {
    /// API version of the dependency's kind, e.g. `pkg.crossplane.io/v1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Kind of the dependency, e.g. `Provider`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Package coordinate (new form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Provider coordinate (legacy form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Configuration coordinate (legacy form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    /// Function coordinate (legacy form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Version constraint.
    #[serde(default)]
    pub version: String,
}

impl MetaDependency {
    /// Convert to a [`Dependency`]. Returns `None` when the entry names no
    /// package or its kind is unknown.
    pub fn to_dependency(&self) -> Option<Dependency> {
        let (package, package_type) = if let Some(p) = &self.provider {
            (p.clone(), PackageType::Provider)
        } else if let Some(c) = &self.configuration {
            (c.clone(), PackageType::Configuration)
        } else if let Some(f) = &self.function {
            (f.clone(), PackageType::Function)
        } else {
            let package = self.package.clone()?;
            let kind = self.kind.as_deref()?.parse().ok()?;
            (package, kind)
        };

        Some(Dependency {
            package,
            package_type: Some(package_type),
            constraints: self.version.clone(),
        })
    }
}
