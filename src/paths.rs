//! Resolution of client-supplied relative paths against the server root.
//!
//! Checks run in a fixed order: lexical containment, existence, symlink
//! containment, then directory type. A request outside the root is therefore
//! refused before anything about the filesystem is revealed.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path outside server root")]
    OutsideRoot,
    #[error("path does not exist: {0}")]
    NotFound(String),
    #[error("path is not a directory: {0}")]
    NotADirectory(String),
}

/// Collapse `.` and `..` without touching the filesystem.
///
/// `..` never climbs above the filesystem root or a drive prefix. On a
/// relative input, leading `..` segments that cannot be collapsed are kept.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(comp),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Resolve `requested` against `root` and validate it as a scannable directory.
///
/// Returns the lexically normalized absolute path on success.
pub fn resolve(root: &Path, requested: &str) -> Result<PathBuf, PathError> {
    let joined = if requested.is_empty() { root.to_path_buf() } else { root.join(requested) };
    let candidate = normalize_lexical(&joined);
    let norm_root = normalize_lexical(root);

    if !candidate.starts_with(&norm_root) {
        return Err(PathError::OutsideRoot);
    }

    // follows symlinks, so a dangling link reads as missing
    let meta = match std::fs::metadata(&candidate) {
        Ok(m) => m,
        Err(_) => return Err(PathError::NotFound(requested.to_string())),
    };

    let canon_root = dunce::canonicalize(&norm_root).map_err(|_| PathError::NotFound(requested.to_string()))?;
    let canon = dunce::canonicalize(&candidate).map_err(|_| PathError::NotFound(requested.to_string()))?;
    if !canon.starts_with(&canon_root) {
        return Err(PathError::OutsideRoot);
    }

    if !meta.is_dir() {
        return Err(PathError::NotADirectory(requested.to_string()));
    }
    Ok(candidate)
}
