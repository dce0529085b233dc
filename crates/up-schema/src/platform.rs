//! Image platforms.

/// Target platform of an OCI image.
///
/// Functions always run on Linux, so builders only ever vary the
/// architecture. The `variant` is carried through from image indexes
/// (e.g. `arm64/v8`) but never required for matching.
///
/// # Example
///
/// ```
/// use up_schema::Platform;
///
/// let p: Platform = "linux/arm64".parse().unwrap();
/// assert_eq!(p, Platform::linux("arm64"));
/// assert_eq!(p.to_string(), "linux/arm64");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Platform {
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// CPU architecture in OCI/Go naming, e.g. `amd64`, `arm64`.
    pub architecture: String,
    /// Optional CPU variant, e.g. `v8`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Linux platform for the given architecture.
    pub fn linux(architecture: impl Into<String>) -> Self {
        Self {
            os: "linux".to_string(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    /// Platform packages are pulled for when an index offers several.
    pub fn default_package() -> Self {
        Self::linux("amd64")
    }

    /// Whether `other` satisfies this platform. A missing variant on
    /// `self` matches any variant.
    pub fn matches(&self, other: &Platform) -> bool {
        self.os == other.os
            && self.architecture == other.architecture
            && (self.variant.is_none() || self.variant == other.variant)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant {
            Some(v) => write!(f, "{}/{}/{}", self.os, self.architecture, v),
            None => write!(f, "{}/{}", self.os, self.architecture),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(os), Some(arch), variant, None) if !os.is_empty() && !arch.is_empty() => {
                Ok(Self {
                    os: os.to_string(),
                    architecture: arch.to_string(),
                    variant: variant.filter(|v| !v.is_empty()).map(str::to_string),
                })
            }
            _ => Err(format!("Unknown platform: {s}")),
        }
    }
}
