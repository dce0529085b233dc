//! Go-templating functions: a directory of templates served by
//! function-go-templating.

use std::path::PathBuf;
use std::sync::Arc;

use super::BuilderConfig;
use super::base::{Layered, Recipe};
use crate::error::Result;
use crate::oci::Image;
use crate::tree::{EntryKind, SourceTree};

const EXTENSIONS: [&str; 2] = ["gotmpl", "tmpl"];

static RECIPE: Recipe = Recipe {
    language: "go-templating",
    mount: "/src",
    owner: None,
    strip: true,
    env: &[("FUNCTION_GO_TEMPLATING_DEFAULT_SOURCE", "/src")],
};

/// Suffix after the last `.` of the file name, so a file named `.tmpl`
/// counts as a template.
fn is_template(file_name: &str) -> bool {
    file_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| EXTENSIONS.contains(&ext))
}

/// Builds go-templating functions.
#[derive(Debug, Clone)]
pub struct GoTemplatingBuilder {
    inner: Arc<Layered>,
}

impl GoTemplatingBuilder {
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            inner: Arc::new(Layered {
                recipe: &RECIPE,
                base_image: config.base_images.go_templating.clone(),
                image_configs: config.image_configs.clone(),
                source: config.source.clone(),
                reporter: config.reporter.clone(),
            }),
        }
    }

    /// Every regular file is a template; directories may nest. Symlinks and
    /// other file types never match, nor does an empty tree.
    pub fn matches(tree: &dyn SourceTree) -> Result<bool> {
        let mut found = false;
        for entry in tree.entries()? {
            match entry.kind {
                EntryKind::Dir => {}
                EntryKind::File => {
                    let template = entry
                        .path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(is_template);
                    if !template {
                        return Ok(false);
                    }
                    found = true;
                }
                EntryKind::Symlink | EntryKind::Other => return Ok(false),
            }
        }
        Ok(found)
    }

    pub async fn build(
        &self,
        tree: Arc<dyn SourceTree>,
        architectures: &[String],
        mount_base: Option<PathBuf>,
    ) -> Result<Vec<Image>> {
        self.inner.clone().build(tree, architectures, mount_base).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{MockSource, archs, config};
    use super::*;
    use crate::oci::Reference;
    use crate::tree::MemTree;

    fn templates() -> MemTree {
        let mut tree = MemTree::new();
        tree.insert_file("00-prelude.yaml.gotmpl", "{{ $xr := .observed }}").unwrap();
        tree.insert_file("resources/bucket.tmpl", "kind: Bucket").unwrap();
        tree
    }

    #[test]
    fn test_matches() {
        assert!(GoTemplatingBuilder::matches(&templates()).unwrap());
        assert!(!GoTemplatingBuilder::matches(&MemTree::new()).unwrap());

        let mut only_dirs = MemTree::new();
        only_dirs.insert_dir("a/b").unwrap();
        assert!(!GoTemplatingBuilder::matches(&only_dirs).unwrap());

        let mut mixed = templates();
        mixed.insert_file("README.md", "# fn").unwrap();
        assert!(!GoTemplatingBuilder::matches(&mixed).unwrap());

        let mut linked = templates();
        linked.insert_symlink("models", "../models").unwrap();
        assert!(!GoTemplatingBuilder::matches(&linked).unwrap());
    }

    #[test]
    fn test_matches_dot_named_template() {
        let mut tree = MemTree::new();
        tree.insert_file(".tmpl", "kind: Bucket").unwrap();
        assert!(GoTemplatingBuilder::matches(&tree).unwrap());

        let mut tree = MemTree::new();
        tree.insert_file("tmpl", "kind: Bucket").unwrap();
        assert!(!GoTemplatingBuilder::matches(&tree).unwrap());
    }

    #[tokio::test]
    async fn test_build_sets_default_source() {
        let source = Arc::new(MockSource::default());
        let base = Reference::parse(crate::config::DEFAULT_GO_TEMPLATING_BASE).unwrap();
        source.add_package_base(&base, "arm64");

        let images = GoTemplatingBuilder::new(&config(source))
            .build(Arc::new(templates()), &archs(&["arm64"]), None)
            .await
            .unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].config().architecture, "arm64");
        assert_eq!(images[0].env("FUNCTION_GO_TEMPLATING_DEFAULT_SOURCE"), Some("/src"));
    }
}
