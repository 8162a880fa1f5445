use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

/// Resolve bundle-style `rel` under `root` for disk fallback.
///
/// Absolute paths and `..` are rejected. Without `follow_symlinks` any symlink
/// on the way is rejected; with it the canonical target must stay under root.
pub fn resolve_under(root: &Path, rel: &str, policy: PathPolicy) -> Result<PathBuf> {
    let rel = Path::new(rel);
    if rel.is_absolute() || rel.has_root() {
        return Err(Error::invalid(format!("absolute paths are not allowed: {:?}", rel)));
    }
    for comp in rel.components() {
        if matches!(comp, Component::ParentDir | Component::Prefix(_)) {
            return Err(Error::invalid(format!("parent traversal not allowed: {:?}", rel)));
        }
    }
    let candidate = root.join(rel);
    if !policy.follow_symlinks {
        let mut cur = root.to_path_buf();
        for comp in rel.components() {
            cur = cur.join(comp);
            if let Ok(m) = std::fs::symlink_metadata(&cur) {
                if m.file_type().is_symlink() {
                    return Err(Error::invalid(format!("symlink in path (not following): {:?}", cur)));
                }
            }
        }
        Ok(candidate)
    } else {
        let root_can = std::fs::canonicalize(root)?;
        let cand_can = std::fs::canonicalize(&candidate).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(candidate.clone())
            } else {
                Error::Io(e)
            }
        })?;
        if !cand_can.starts_with(&root_can) {
            return Err(Error::invalid(format!("path escapes root: {:?}", rel)));
        }
        Ok(cand_can)
    }
}
