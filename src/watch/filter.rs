// src/watch/filter.rs

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::ConfigFile;

/// Decides which filesystem paths may trigger a rebuild.
///
/// A path is excluded when:
/// - its file name is one of the reserved artifact names (the compiled binary
///   and its live copy), so the build's own output never re-triggers a build;
/// - or its path relative to `root` matches one of the exclude globs.
#[derive(Clone)]
pub struct ArtifactFilter {
    root: PathBuf,
    reserved: Vec<OsString>,
    exclude_set: Option<GlobSet>,
}

impl fmt::Debug for ArtifactFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactFilter")
            .field("root", &self.root)
            .field("reserved", &self.reserved)
            .field("has_exclude_set", &self.exclude_set.is_some())
            .finish()
    }
}

impl ArtifactFilter {
    pub fn new<I, S>(root: impl Into<PathBuf>, reserved: I, exclude: &[String]) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let exclude_set = if exclude.is_empty() {
            None
        } else {
            Some(build_globset(exclude).context("building exclude globset")?)
        };

        Ok(Self {
            root: root.into(),
            reserved: reserved.into_iter().map(Into::into).collect(),
            exclude_set,
        })
    }

    /// Filter for the configured root, artifact, live copy and excludes.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        Self::new(
            cfg.watch.root.clone(),
            [cfg.build.artifact.clone(), cfg.build.live_name.clone()],
            &cfg.watch.exclude,
        )
    }

    /// Same filter, evaluated against a different (e.g. canonicalized) root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        if let Some(name) = path.file_name() {
            if self.reserved.iter().any(|r| r.as_os_str() == name) {
                return true;
            }
        }

        let Some(exclude) = &self.exclude_set else {
            return false;
        };
        match root_relative(&self.root, path) {
            Some(rel) => exclude.is_match(&rel),
            None => false,
        }
    }
}

/// `path` relative to `root` with `/` separators, or `None` outside the root.
///
/// Removed files cannot be canonicalized, so when the plain prefix does not
/// match, only the parent directory is resolved and the name re-attached.
fn root_relative(root: &Path, path: &Path) -> Option<String> {
    let rel = match path.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            let parent = path.parent()?.canonicalize().ok()?;
            let resolved = parent.join(path.file_name()?);
            resolved.strip_prefix(root).ok()?.to_path_buf()
        }
    };
    Some(rel.to_string_lossy().replace('\\', "/"))
}

/// Build a GlobSet from simple string patterns.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ArtifactFilter {
        ArtifactFilter::new(
            "/app",
            ["userapp", "userapp-run"],
            &[".git/**".to_string(), "**/*.swp".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn reserved_artifact_names_are_excluded_anywhere() {
        let f = filter();
        assert!(f.is_excluded(Path::new("/app/userapp")));
        assert!(f.is_excluded(Path::new("/app/userapp-run")));
        assert!(f.is_excluded(Path::new("/elsewhere/userapp")));
    }

    #[test]
    fn names_merely_containing_the_artifact_name_are_not_excluded() {
        let f = filter();
        assert!(!f.is_excluded(Path::new("/app/userapp.go")));
        assert!(!f.is_excluded(Path::new("/app/cmd/userapp_test.go")));
    }

    #[test]
    fn exclude_globs_apply_relative_to_root() {
        let f = filter();
        assert!(f.is_excluded(Path::new("/app/.git/HEAD")));
        assert!(f.is_excluded(Path::new("/app/pkg/.main.go.swp")));
        assert!(!f.is_excluded(Path::new("/app/main.go")));
    }

    #[test]
    fn paths_outside_the_root_never_match_globs() {
        let f = filter();
        assert!(!f.is_excluded(Path::new("/other/.git/HEAD")));
        assert_eq!(root_relative(Path::new("/app"), Path::new("/other/x")), None);
    }

    #[cfg(unix)]
    #[test]
    fn removed_file_reached_through_a_symlinked_root_still_matches() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().canonicalize().unwrap().join("real");
        std::fs::create_dir_all(real.join(".git")).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let f = ArtifactFilter::new(&real, ["userapp"], &[".git/**".to_string()]).unwrap();
        // The file never existed, as after a removal.
        let gone = link.join(".git").join("index.lock");
        assert!(f.is_excluded(&gone));
        assert_eq!(root_relative(&real, &gone).as_deref(), Some(".git/index.lock"));
    }
}
