use crate::error::Result;
use crate::layout::normalize_path;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// OS metadata files never worth packing.
pub const DEFAULT_EXCLUDES: &[&str] = &["**/.DS_Store", "**/Thumbs.db", "**/desktop.ini"];

/// A file discovered under a root, with its bundle-relative path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collected {
    pub rel_path: String,
    pub source: PathBuf,
}

fn build_excludes(extra: &[String]) -> Result<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for g in DEFAULT_EXCLUDES {
        b.add(Glob::new(g)?);
    }
    for g in extra {
        b.add(Glob::new(g)?);
    }
    Ok(b.build()?)
}

/// Recursively list regular files under `root`, relative paths `/`-separated and sorted.
/// `excludes` are globs matched against the relative path.
pub fn collect_dir(root: &Path, excludes: &[String]) -> Result<Vec<Collected>> {
    let exc = build_excludes(excludes)?;
    let mut out = Vec::new();
    for ent in WalkDir::new(root).min_depth(1) {
        let ent = ent.map_err(std::io::Error::from)?;
        if !ent.file_type().is_file() {
            continue;
        }
        let path = ent.path();
        let rel = pathdiff::diff_paths(path, root).unwrap_or_else(|| path.to_path_buf());
        let rel_path = normalize_path(&rel.to_string_lossy());
        if exc.is_match(&rel_path) {
            continue;
        }
        out.push(Collected { rel_path, source: path.to_path_buf() });
    }
    out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(out)
}
