// src/fs/mod.rs

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub mod mock;

/// Abstract filesystem interface used for directory enumeration.
pub trait FileSystem: Send + Sync + Debug {
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;

    /// Return a list of entries in a directory.
    /// Returns full paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        fs::canonicalize(path).with_context(|| format!("canonicalizing {:?}", path))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry?;
            entries.push(entry.path());
        }
        Ok(entries)
    }
}

/// Every directory under `root` (including `root`), parents before children.
///
/// Unreadable subdirectories are skipped with a warning; an unreadable root
/// is an error.
pub fn walk_dirs(fs: &dyn FileSystem, root: &Path) -> Result<Vec<PathBuf>> {
    if !fs.is_dir(root) {
        anyhow::bail!("{:?} is not a directory", root);
    }

    let mut dirs = vec![root.to_path_buf()];
    let mut next = 0;
    while next < dirs.len() {
        let dir = dirs[next].clone();
        next += 1;

        let entries = match fs.read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if dir != root => {
                tracing::warn!(dir = ?dir, error = %err, "skipping unreadable directory");
                continue;
            }
            Err(err) => return Err(err),
        };

        let mut children: Vec<PathBuf> = entries.into_iter().filter(|p| fs.is_dir(p)).collect();
        children.sort();
        dirs.extend(children);
    }

    Ok(dirs)
}
