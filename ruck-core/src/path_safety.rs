use crate::error::{RuckError, Result};
use std::path::{Component, Path, PathBuf};

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

/// Ensure `rel` is safe relative to `root`: no absolute paths, no `..`
/// components, and if `follow_symlinks` then the canonicalized path must
/// stay under root; otherwise reject symlinks encountered anywhere along
/// the path.
///
/// Resolving an attacker-controlled manifest's relative `path` property
/// against `--prefix` without this check would let a crafted manifest read
/// files outside the asset tree via `..` traversal or an absolute path.
pub fn validate_path(root: &Path, rel: &Path, policy: PathPolicy) -> Result<PathBuf> {
    let bad_format = |msg: String| RuckError::BadFormat(msg);

    if rel.is_absolute() {
        return Err(bad_format(format!("absolute paths are not allowed: {:?}", rel)));
    }
    for comp in rel.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(bad_format(format!("parent traversal not allowed: {:?}", rel)));
        }
    }
    let candidate = root.join(rel);
    if !policy.follow_symlinks {
        let mut cur = root.to_path_buf();
        for comp in rel.components() {
            cur = cur.join(comp);
            if let Ok(m) = std::fs::symlink_metadata(&cur) {
                if m.file_type().is_symlink() {
                    return Err(bad_format(format!("symlink in path (not following): {:?}", cur)));
                }
            }
        }
        Ok(candidate)
    } else {
        let root_can = std::fs::canonicalize(root)
            .map_err(|source| RuckError::Io { path: root.to_path_buf(), source })?;
        let cand_can = std::fs::canonicalize(&candidate)
            .map_err(|source| RuckError::Io { path: candidate.clone(), source })?;
        if !cand_can.starts_with(&root_can) {
            return Err(bad_format(format!("path escapes root: {:?}", rel)));
        }
        Ok(cand_can)
    }
}
