//! Working-directory resolution: prefer the repository root.

use std::path::{Path, PathBuf};
use tracing::debug;

use gavel_core::AuditError;

/// How many parent directories the repository-marker walk inspects.
const MAX_WALK_DEPTH: usize = 10;

/// Resolve the directory the judge runs in.
///
/// Priority: an explicit caller path, the topmost `.git`-marked ancestor of
/// the current directory, the current directory itself, then a configured
/// default. All four unusable is an environment failure.
pub fn resolve_working_directory(
    explicit: Option<&Path>,
    default: Option<&Path>,
) -> Result<PathBuf, AuditError> {
    if let Some(path) = explicit {
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
        debug!(path = %path.display(), "explicit working directory unusable, falling back");
    }

    if let Ok(cwd) = std::env::current_dir() {
        if let Some(root) = find_repository_root(&cwd) {
            return Ok(root);
        }
        if cwd.is_dir() {
            return Ok(cwd);
        }
    }

    if let Some(path) = default {
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
    }

    Err(AuditError::Environment(
        "no usable working directory: explicit, repository root, current, and default all failed"
            .into(),
    ))
}

/// Walk up from `start`, collecting `.git`-marked ancestors; the topmost
/// match within the depth bound wins, so nested repositories resolve to the
/// outermost root.
pub fn find_repository_root(start: &Path) -> Option<PathBuf> {
    let mut topmost = None;
    let mut current = Some(start);
    for _ in 0..=MAX_WALK_DEPTH {
        let dir = current?;
        if dir.join(".git").is_dir() {
            topmost = Some(dir.to_path_buf());
        }
        current = dir.parent();
        if current.is_none() {
            break;
        }
    }
    topmost
}
