//! Read-only views of function source trees.
//!
//! Builders never touch the OS directly: they walk a [`SourceTree`], which is
//! either a directory on disk ([`DirTree`]) or an in-memory map
//! ([`MemTree`]). Package schemas decoded from image layers are `MemTree`s
//! too.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// File type of a [`TreeEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
    /// Sockets, devices and the like. Builders reject these.
    Other,
}

/// One entry of a tree, addressed by its path relative to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub mode: u32,
}

/// A read-only file tree that builders package into layers.
pub trait SourceTree: Send + Sync + std::fmt::Debug {
    /// Every entry below the root, parents before children, in lexical order.
    fn entries(&self) -> Result<Vec<TreeEntry>>;

    /// Contents of the regular file at `path`.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    fn exists(&self, path: &Path) -> bool;

    /// OS location of the tree, if it has one. Symlinks are resolved
    /// against it when packing.
    fn os_root(&self) -> Option<&Path> {
        None
    }
}

/// A directory on disk.
#[derive(Debug, Clone)]
pub struct DirTree {
    root: PathBuf,
}

impl DirTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

impl SourceTree for DirTree {
    fn entries(&self) -> Result<Vec<TreeEntry>> {
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let meta = entry.path().symlink_metadata()?;
            let ft = meta.file_type();
            let kind = if ft.is_symlink() {
                EntryKind::Symlink
            } else if ft.is_dir() {
                EntryKind::Dir
            } else if ft.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|_| Error::Package(format!("{} escapes tree root", entry.path().display())))?;
            out.push(TreeEntry {
                path: rel.to_path_buf(),
                kind,
                mode: mode_of(&meta),
            });
        }
        Ok(out)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.root.join(path))?)
    }

    fn exists(&self, path: &Path) -> bool {
        self.root.join(path).symlink_metadata().is_ok()
    }

    fn os_root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MemNode {
    Dir { mode: u32 },
    File { data: Bytes, mode: u32 },
    Symlink { target: PathBuf },
}

/// An in-memory tree. Cheap to clone: file contents are shared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemTree {
    nodes: BTreeMap<PathBuf, MemNode>,
}

/// Normalize to a relative path without `.`, or fail on `..`.
fn clean(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::Normal(p) => out.push(p),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(Error::Package(format!("path {} escapes tree root", path.display())));
            }
        }
    }
    Ok(out)
}

impl MemTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_parents(&mut self, path: &Path) {
        let mut cur = path.parent();
        while let Some(p) = cur {
            if p.as_os_str().is_empty() {
                break;
            }
            self.nodes
                .entry(p.to_path_buf())
                .or_insert(MemNode::Dir { mode: 0o755 });
            cur = p.parent();
        }
    }

    pub fn insert_file(&mut self, path: impl AsRef<Path>, data: impl Into<Bytes>) -> Result<()> {
        self.insert_file_with_mode(path, data, 0o644)
    }

    pub fn insert_file_with_mode(
        &mut self,
        path: impl AsRef<Path>,
        data: impl Into<Bytes>,
        mode: u32,
    ) -> Result<()> {
        let path = clean(path.as_ref())?;
        if path.as_os_str().is_empty() {
            return Err(Error::Package("empty file path".into()));
        }
        self.ensure_parents(&path);
        self.nodes.insert(
            path,
            MemNode::File {
                data: data.into(),
                mode,
            },
        );
        Ok(())
    }

    pub fn insert_dir(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = clean(path.as_ref())?;
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        self.ensure_parents(&path);
        self.nodes.entry(path).or_insert(MemNode::Dir { mode: 0o755 });
        Ok(())
    }

    pub fn insert_symlink(&mut self, path: impl AsRef<Path>, target: impl Into<PathBuf>) -> Result<()> {
        let path = clean(path.as_ref())?;
        self.ensure_parents(&path);
        self.nodes.insert(
            path,
            MemNode::Symlink {
                target: target.into(),
            },
        );
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of regular files.
    pub fn file_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| matches!(n, MemNode::File { .. }))
            .count()
    }

    /// The subtree below `prefix`, re-rooted.
    pub fn subtree(&self, prefix: impl AsRef<Path>) -> Result<MemTree> {
        let prefix = clean(prefix.as_ref())?;
        let nodes = self
            .nodes
            .iter()
            .filter_map(|(p, n)| {
                p.strip_prefix(&prefix)
                    .ok()
                    .filter(|rel| !rel.as_os_str().is_empty())
                    .map(|rel| (rel.to_path_buf(), n.clone()))
            })
            .collect();
        Ok(MemTree { nodes })
    }

    /// Snapshot any tree into memory. Symlinks are kept as links.
    pub fn from_tree(tree: &dyn SourceTree) -> Result<Self> {
        let mut out = Self::new();
        for entry in tree.entries()? {
            match entry.kind {
                EntryKind::Dir => {
                    out.nodes
                        .insert(entry.path, MemNode::Dir { mode: entry.mode });
                }
                EntryKind::File => {
                    let data = tree.read(&entry.path)?;
                    out.insert_file_with_mode(&entry.path, data, entry.mode)?;
                }
                EntryKind::Symlink => {
                    let target = match tree.os_root() {
                        Some(root) => std::fs::read_link(root.join(&entry.path))?,
                        None => PathBuf::new(),
                    };
                    out.insert_symlink(&entry.path, target)?;
                }
                EntryKind::Other => {}
            }
        }
        Ok(out)
    }

    pub fn from_dir(root: &Path) -> Result<Self> {
        Self::from_tree(&DirTree::new(root))
    }
}

impl SourceTree for MemTree {
    fn entries(&self) -> Result<Vec<TreeEntry>> {
        Ok(self
            .nodes
            .iter()
            .map(|(path, node)| {
                let (kind, mode) = match node {
                    MemNode::Dir { mode } => (EntryKind::Dir, *mode),
                    MemNode::File { mode, .. } => (EntryKind::File, *mode),
                    MemNode::Symlink { .. } => (EntryKind::Symlink, 0o777),
                };
                TreeEntry {
                    path: path.clone(),
                    kind,
                    mode,
                }
            })
            .collect())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let key = clean(path)?;
        match self.nodes.get(&key) {
            Some(MemNode::File { data, .. }) => Ok(data.to_vec()),
            Some(_) => Err(Error::Package(format!("{} is not a regular file", path.display()))),
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ))),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        clean(path).is_ok_and(|k| self.nodes.contains_key(&k))
    }
}

/// Copy every regular file of `from` below `to`, creating directories as
/// needed. Existing files are overwritten.
pub fn copy_tree(from: &dyn SourceTree, to: &Path) -> Result<()> {
    for entry in from.entries()? {
        if entry.kind != EntryKind::File {
            continue;
        }
        let dest = to.join(&entry.path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, from.read(&entry.path)?)?;
    }
    Ok(())
}
