//! Keep tool file access inside the workspace root.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Resolve `candidate` against `workspace_root`, refusing anything that
/// lands outside it.
///
/// Relative paths are joined to the root; `..` may not climb above it.
/// Existing paths are canonicalized so a symlink cannot point outside.
///
/// # Errors
///
/// Returns `AppError::PathViolation` when the path escapes the root or the
/// root itself cannot be resolved.
pub fn resolve_in_workspace(workspace_root: &Path, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let root = workspace_root
        .canonicalize()
        .map_err(|err| AppError::PathViolation(format!("workspace root invalid: {err}")))?;

    let candidate = candidate.as_ref();
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::PathViolation("path climbs above /".into()));
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    if !normalized.starts_with(&root) {
        return Err(AppError::PathViolation(format!(
            "{} is outside the workspace",
            candidate.display()
        )));
    }

    if normalized.exists() {
        let canonical = normalized
            .canonicalize()
            .map_err(|err| AppError::PathViolation(format!("cannot resolve path: {err}")))?;
        if !canonical.starts_with(&root) {
            return Err(AppError::PathViolation(
                "symlink target escapes workspace".into(),
            ));
        }
        return Ok(canonical);
    }
    Ok(normalized)
}
