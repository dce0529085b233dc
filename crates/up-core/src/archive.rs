//! Tar layers from source trees, and back.

use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, EntryType, Header};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::tree::{EntryKind, MemTree, SourceTree};

/// Options for [`pack_tree`].
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// OS directory symlinks are resolved against. Packing a tree that
    /// contains symlinks fails without it.
    pub symlink_base: Option<PathBuf>,
    /// Owner forced onto every entry.
    pub uid: Option<u64>,
    pub gid: Option<u64>,
}

impl PackOptions {
    pub fn with_symlink_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.symlink_base = Some(base.into());
        self
    }

    pub fn with_owner(mut self, uid: u64, gid: u64) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }
}

/// Archive paths are relative; `/src` and `src` name the same directory.
fn archive_path(prefix: &str, rel: &Path) -> PathBuf {
    Path::new(prefix.trim_start_matches('/')).join(rel)
}

fn header(kind: EntryType, mode: u32, size: u64, opts: &PackOptions) -> Header {
    let mut h = Header::new_gnu();
    h.set_entry_type(kind);
    h.set_mode(mode);
    h.set_size(size);
    h.set_mtime(0);
    h.set_uid(opts.uid.unwrap_or(0));
    h.set_gid(opts.gid.unwrap_or(0));
    h
}

fn append_dir<W: Write>(tar: &mut Builder<W>, path: &Path, mode: u32, opts: &PackOptions) -> Result<()> {
    let mut h = header(EntryType::Directory, mode, 0, opts);
    tar.append_data(&mut h, path, std::io::empty())?;
    Ok(())
}

fn append_file<W: Write>(
    tar: &mut Builder<W>,
    path: &Path,
    data: &[u8],
    mode: u32,
    opts: &PackOptions,
) -> Result<()> {
    let mut h = header(EntryType::Regular, mode, data.len() as u64, opts);
    tar.append_data(&mut h, path, data)?;
    Ok(())
}

/// Pack `tree` into an uncompressed tar rooted at `prefix`.
///
/// A directory entry for `prefix` comes first (mode 0777) unless the prefix
/// is the archive root, then every entry
/// of the tree at `<prefix>/<path>`. Symlinks are followed on the OS
/// relative to `opts.symlink_base`: missing targets are skipped, directory
/// targets are inlined file by file.
pub fn pack_tree(tree: &dyn SourceTree, prefix: &str, opts: &PackOptions) -> Result<Vec<u8>> {
    let mut tar = Builder::new(Vec::new());
    tar.mode(tar::HeaderMode::Deterministic);

    let root = archive_path(prefix, Path::new(""));
    if root.components().any(|c| matches!(c, Component::Normal(_))) {
        append_dir(&mut tar, &root, 0o777, opts)?;
    }

    for entry in tree.entries()? {
        let dest = archive_path(prefix, &entry.path);
        match entry.kind {
            EntryKind::Dir => append_dir(&mut tar, &dest, entry.mode, opts)?,
            EntryKind::File => {
                let data = tree.read(&entry.path)?;
                append_file(&mut tar, &dest, &data, entry.mode, opts)?;
            }
            EntryKind::Symlink => {
                let Some(base) = &opts.symlink_base else {
                    return Err(Error::Package(
                        "cannot follow symlinks unless base path is configured".into(),
                    ));
                };
                append_symlink_target(&mut tar, &base.join(&entry.path), &dest, opts)?;
            }
            EntryKind::Other => {
                return Err(Error::Package(format!(
                    "unhandled file type at {}",
                    entry.path.display()
                )));
            }
        }
    }

    Ok(tar.into_inner()?)
}

fn append_symlink_target<W: Write>(
    tar: &mut Builder<W>,
    link: &Path,
    dest: &Path,
    opts: &PackOptions,
) -> Result<()> {
    let Ok(target) = std::fs::canonicalize(link) else {
        tracing::debug!(link = %link.display(), "skipping dangling symlink");
        return Ok(());
    };

    for entry in WalkDir::new(&target).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(&target).unwrap_or(Path::new(""));
        let path = if rel.as_os_str().is_empty() {
            dest.to_path_buf()
        } else {
            dest.join(rel)
        };
        let data = std::fs::read(entry.path())?;
        append_file(tar, &path, &data, file_mode(entry.path()), opts)?;
    }
    Ok(())
}

#[cfg(unix)]
fn file_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).map_or(0o644, |m| m.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_: &Path) -> u32 {
    0o644
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&[0x1f, 0x8b])
}

/// Decompress if gzip, otherwise return the input.
pub fn maybe_gunzip(data: &[u8]) -> Result<Vec<u8>> {
    if !is_gzip(data) {
        return Ok(data.to_vec());
    }
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Read a tar layer (optionally gzip-compressed) into memory. Leading `/`
/// and `./` are dropped from entry paths; hard links, devices and OCI
/// whiteouts are ignored.
pub fn unpack_layer(data: &[u8]) -> Result<MemTree> {
    let raw = maybe_gunzip(data)?;
    let mut archive = Archive::new(raw.as_slice());
    let mut tree = MemTree::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(".wh."))
        {
            continue;
        }
        let mode = entry.header().mode().unwrap_or(0o644);

        match entry.header().entry_type() {
            EntryType::Directory => tree.insert_dir(&path)?,
            EntryType::Regular | EntryType::Continuous => {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                tree.insert_file_with_mode(&path, data, mode)?;
            }
            EntryType::Symlink => {
                if let Some(target) = entry.link_name()? {
                    tree.insert_symlink(&path, target.into_owned())?;
                }
            }
            _ => {}
        }
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::DirTree;

    fn headers(tar_bytes: &[u8]) -> Vec<(String, u64, u64)> {
        let mut archive = Archive::new(tar_bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let h = e.header();
                (
                    e.path().unwrap().to_string_lossy().into_owned(),
                    h.uid().unwrap(),
                    h.gid().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_pack_then_unpack_under_prefix() {
        let mut tree = MemTree::new();
        tree.insert_file("main.k", "x = 1").unwrap();
        tree.insert_file("lib/util.k", "y = 2").unwrap();

        let tar_bytes = pack_tree(&tree, "/src", &PackOptions::default()).unwrap();
        let unpacked = unpack_layer(&tar_bytes).unwrap();
        let back = unpacked.subtree("src").unwrap();

        assert_eq!(back.read(Path::new("main.k")).unwrap(), b"x = 1");
        assert_eq!(back.read(Path::new("lib/util.k")).unwrap(), b"y = 2");
        assert_eq!(back.file_count(), tree.file_count());
    }

    #[test]
    fn test_prefix_first_and_owner_forced() {
        let mut tree = MemTree::new();
        tree.insert_file("main.k", "x").unwrap();
        let opts = PackOptions::default().with_owner(2000, 2000);
        let tar_bytes = pack_tree(&tree, "/src", &opts).unwrap();

        let hs = headers(&tar_bytes);
        assert!(hs[0].0.trim_end_matches('/') == "src");
        assert!(hs.iter().all(|(_, uid, gid)| *uid == 2000 && *gid == 2000));
        assert!(hs.iter().any(|(p, _, _)| p == "src/main.k"));
    }

    #[test]
    fn test_gzip_layer_unpacks() {
        let mut tree = MemTree::new();
        tree.insert_file("a.py", "print(1)").unwrap();
        let tar_bytes = pack_tree(&tree, "fn", &PackOptions::default()).unwrap();
        let gz = gzip(&tar_bytes).unwrap();
        assert!(is_gzip(&gz));
        let back = unpack_layer(&gz).unwrap();
        assert_eq!(back.read(Path::new("fn/a.py")).unwrap(), b"print(1)");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_follow_base_path() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        std::fs::create_dir_all(&shared).unwrap();
        std::fs::write(shared.join("helpers.k"), "h = 1").unwrap();

        let func = dir.path().join("fn");
        std::fs::create_dir_all(&func).unwrap();
        std::fs::write(func.join("main.k"), "x").unwrap();
        std::os::unix::fs::symlink(&shared, func.join("shared")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), func.join("dangling")).unwrap();

        let tree = DirTree::new(&func);
        assert!(pack_tree(&tree, "/src", &PackOptions::default()).is_err());

        let opts = PackOptions::default().with_symlink_base(&func);
        let tar_bytes = pack_tree(&tree, "/src", &opts).unwrap();
        let back = unpack_layer(&tar_bytes).unwrap();
        assert_eq!(back.read(Path::new("src/shared/helpers.k")).unwrap(), b"h = 1");
        assert!(!back.exists(Path::new("src/dangling")));
    }
}
