//! Judge-executable lookup with a full attempted-path trace.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::environment::judge_search_paths;

/// Outcome of a lookup: the first usable absolute path, if any, plus every
/// candidate probed along the way (kept for diagnostics).
#[derive(Debug, Clone)]
pub struct LookupResult {
    pub found: Option<PathBuf>,
    pub attempted: Vec<PathBuf>,
}

impl LookupResult {
    /// One-line trace of every path probed, for error messages.
    pub fn trace(&self) -> String {
        self.attempted
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Locate `name` by trying the system lookup, the fixed judge search paths,
/// and finally each segment of the provided `PATH` value.
pub fn resolve_executable(name: &str, path_var: Option<&str>) -> LookupResult {
    let mut attempted = Vec::new();

    // (a) System path-lookup utility.
    if let Ok(path) = which::which(name) {
        if is_executable(&path) {
            debug!(path = %path.display(), "resolved judge executable via which");
            return LookupResult {
                found: Some(path),
                attempted,
            };
        }
        attempted.push(path);
    }

    // (b) Fixed search paths.
    for dir in judge_search_paths() {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            debug!(path = %candidate.display(), "resolved judge executable via search path");
            return LookupResult {
                found: Some(candidate),
                attempted,
            };
        }
        attempted.push(candidate);
    }

    // (c) Each PATH segment.
    if let Some(path_var) = path_var {
        for dir in std::env::split_paths(path_var) {
            let candidate = dir.join(name);
            if attempted.contains(&candidate) {
                continue;
            }
            if is_executable(&candidate) {
                debug!(path = %candidate.display(), "resolved judge executable via PATH");
                return LookupResult {
                    found: Some(candidate),
                    attempted,
                };
            }
            attempted.push(candidate);
        }
    }

    LookupResult {
        found: None,
        attempted,
    }
}

/// Existence plus execute permission.
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.is_file()
            && path
                .metadata()
                .map(|m| m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
