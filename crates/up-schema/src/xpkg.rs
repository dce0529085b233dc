//! Constants of the xpkg image format.
//!
//! An xpkg is an OCI image whose layers are tagged through config labels of
//! the form `io.crossplane.xpkg:<layer digest>` with one of the annotation
//! values below.

/// Label key prefix used to annotate layers in the image config.
pub const ANNOTATION_KEY: &str = "io.crossplane.xpkg";

/// Layer holding the package stream (`package.yaml`).
pub const PACKAGE_ANNOTATION: &str = "base";

/// Layer holding package examples.
pub const EXAMPLES_ANNOTATION: &str = "upbound";

/// Layer holding generated KCL schemas.
pub const SCHEMA_KCL_ANNOTATION: &str = "schema.kcl";

/// Layer holding generated Python schemas.
pub const SCHEMA_PYTHON_ANNOTATION: &str = "schema.python";

/// Layer holding generated Go schemas.
pub const SCHEMA_GO_ANNOTATION: &str = "schema.go";

/// Layer holding a Helm chart.
pub const HELM_ANNOTATION: &str = "helm";

/// Name of the package stream file inside the base layer.
pub const STREAM_FILE: &str = "package.yaml";

/// File extension of locally stored package tarballs.
pub const XPKG_EXTENSION: &str = ".xpkg";

/// Config label key for the layer with the given digest.
pub fn label(digest: &str) -> String {
    format!("{ANNOTATION_KEY}:{digest}")
}

/// Parse a config label key back into its layer digest.
pub fn label_digest(key: &str) -> Option<&str> {
    key.strip_prefix(ANNOTATION_KEY)?.strip_prefix(':')
}

/// Schema annotation and language name pairs, in the order packages carry them.
pub const SCHEMA_ANNOTATIONS: &[(&str, &str)] = &[
    (SCHEMA_KCL_ANNOTATION, "kcl"),
    (SCHEMA_PYTHON_ANNOTATION, "python"),
    (SCHEMA_GO_ANNOTATION, "go"),
];

/// Language name for a schema annotation value, if it is one.
pub fn schema_language(annotation: &str) -> Option<&'static str> {
    SCHEMA_ANNOTATIONS
        .iter()
        .find(|(a, _)| *a == annotation)
        .map(|(_, lang)| *lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trip() {
        let key = label("sha256:abc");
        assert_eq!(key, "io.crossplane.xpkg:sha256:abc");
        assert_eq!(label_digest(&key), Some("sha256:abc"));
        assert_eq!(label_digest("org.opencontainers.image.title"), None);
    }

    #[test]
    fn test_schema_language() {
        assert_eq!(schema_language("schema.kcl"), Some("kcl"));
        assert_eq!(schema_language("schema.python"), Some("python"));
        assert_eq!(schema_language("base"), None);
    }
}
