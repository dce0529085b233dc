//! Image reference rewriting for registry mirrors.

use serde::{Deserialize, Serialize};

/// A rewrite rule: references starting with any `match_images` prefix get
/// that prefix replaced by `rewrite_image.prefix`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    #[serde(default, alias = "match_images")]
    pub match_images: Vec<ImageMatch>,
    #[serde(default, alias = "rewrite_image")]
    pub rewrite_image: ImageRewrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMatch {
    /// Only `Prefix` matching exists today.
    #[serde(rename = "type", default = "prefix_type")]
    pub match_type: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRewrite {
    pub prefix: String,
}

fn prefix_type() -> String {
    "Prefix".to_string()
}

impl ImageConfig {
    /// Rule rewriting every prefix in `from` to `to`.
    pub fn prefix(from: &[&str], to: &str) -> Self {
        Self {
            match_images: from
                .iter()
                .map(|p| ImageMatch {
                    match_type: prefix_type(),
                    prefix: (*p).to_string(),
                })
                .collect(),
            rewrite_image: ImageRewrite {
                prefix: to.to_string(),
            },
        }
    }
}

/// Rewrite `image` with the rule whose matching prefix is longest. Images
/// that match nothing are returned unchanged.
pub fn rewrite_image(image: &str, configs: &[ImageConfig]) -> String {
    let mut best: Option<(&str, &str)> = None;

    for config in configs {
        for m in &config.match_images {
            if !image.starts_with(&m.prefix) {
                continue;
            }
            if best.is_none_or(|(prefix, _)| m.prefix.len() > prefix.len()) {
                best = Some((m.prefix.as_str(), config.rewrite_image.prefix.as_str()));
            }
        }
    }

    match best {
        Some((from, to)) => format!("{to}{}", &image[from.len()..]),
        None => image.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<ImageConfig> {
        vec![
            ImageConfig::prefix(&["xpkg.upbound.io"], "mirror.example.com"),
            ImageConfig::prefix(
                &["xpkg.upbound.io/upbound/function-kcl-base:v0.11.2-up.1"],
                "docker.io/acme/function-kcl-base:v0.11.2-up.1",
            ),
        ]
    }

    #[test]
    fn test_longest_prefix_wins() {
        assert_eq!(
            rewrite_image("xpkg.upbound.io/upbound/function-kcl-base:v0.11.2-up.1", &rules()),
            "docker.io/acme/function-kcl-base:v0.11.2-up.1"
        );
        assert_eq!(
            rewrite_image("xpkg.upbound.io/upbound/function-kcl-base:v0.11.2-up.1-extra", &rules()),
            "docker.io/acme/function-kcl-base:v0.11.2-up.1-extra"
        );
    }

    #[test]
    fn test_general_prefix() {
        assert_eq!(
            rewrite_image("xpkg.upbound.io/crossplane/provider-aws:v0.32.0", &rules()),
            "mirror.example.com/crossplane/provider-aws:v0.32.0"
        );
    }

    #[test]
    fn test_no_match_is_identity() {
        assert_eq!(
            rewrite_image("docker.io/library/nginx:latest", &rules()),
            "docker.io/library/nginx:latest"
        );
        assert_eq!(rewrite_image("a/b", &[]), "a/b");
    }

    #[test]
    fn test_deserialize_project_shape() {
        let yaml = "matchImages:\n  - type: Prefix\n    prefix: xpkg.upbound.io\nrewriteImage:\n  prefix: mirror.local\n";
        let cfg: ImageConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.match_images[0].prefix, "xpkg.upbound.io");
        assert_eq!(cfg.rewrite_image.prefix, "mirror.local");
    }
}
