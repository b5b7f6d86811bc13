use std::path::{Path, PathBuf};

/// Resolve `rel` against `base`, the way the manifest driver resolves every
/// `path` property it reads (relative to `--prefix`, not to cwd).
pub fn resolve(base: &Path, rel: &str) -> PathBuf {
    if Path::new(rel).is_absolute() {
        return PathBuf::from(rel);
    }
    base.join(rel)
}

/// Join two path fragments, collapsing an empty `b` to just `a`.
pub fn join(a: &Path, b: &str) -> PathBuf {
    if b.is_empty() {
        a.to_path_buf()
    } else {
        a.join(b)
    }
}

/// Compute `abs` relative to `base`, falling back to `abs` unchanged if the
/// paths share no common prefix (mirrors `pathdiff::diff_paths`, which the
/// teacher already depends on for the same purpose in its CLI).
pub fn relative(base: &Path, abs: &Path) -> PathBuf {
    pathdiff::diff_paths(abs, base).unwrap_or_else(|| abs.to_path_buf())
}
