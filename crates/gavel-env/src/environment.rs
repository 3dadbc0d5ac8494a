//! Child-environment assembly from a preserve-list.

use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

use gavel_core::AuditError;

/// Variables copied into the child environment when set in the parent.
pub const PRESERVED_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "TERM",
    "LANG",
    "LC_ALL",
    "NODE_ENV",
    "CODEX_CONFIG_DIR",
    "CODEX_API_KEY",
    "CODEX_MODEL",
    "CODEX_TIMEOUT",
];

/// Fixed locations probed for the judge executable, in order. `~`-relative
/// entries are expanded against the home directory at call time.
pub const JUDGE_SEARCH_PATHS: &[&str] = &[
    "/usr/local/bin",
    "/usr/bin",
    "/bin",
    "/opt/homebrew/bin",
    "~/.local/bin",
    "~/bin",
];

/// Resolve the fixed search paths with `~` expanded.
pub fn judge_search_paths() -> Vec<PathBuf> {
    let home = home_dir();
    JUDGE_SEARCH_PATHS
        .iter()
        .filter_map(|entry| match entry.strip_prefix("~/") {
            Some(rest) => home.as_ref().map(|h| h.join(rest)),
            None => Some(PathBuf::from(entry)),
        })
        .collect()
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// Assemble the environment the judge child receives.
///
/// Starts from the preserve-list, merges caller-supplied variables on top,
/// defaults `CODEX_CONFIG_DIR` and `NODE_ENV`, and appends the judge search
/// paths to `PATH`. An empty `PATH` after preparation is fatal.
pub fn prepare_environment(
    extra: &HashMap<String, String>,
) -> Result<HashMap<String, String>, AuditError> {
    let mut env = HashMap::new();
    for var in PRESERVED_VARS {
        if let Ok(value) = std::env::var(var) {
            env.insert((*var).to_string(), value);
        }
    }

    for (key, value) in extra {
        env.insert(key.clone(), value.clone());
    }

    if !env.contains_key("CODEX_CONFIG_DIR") {
        if let Some(home) = home_dir() {
            env.insert(
                "CODEX_CONFIG_DIR".to_string(),
                home.join(".codex").display().to_string(),
            );
        }
    }

    let mut path_segments: Vec<String> = env
        .get("PATH")
        .map(|p| std::env::split_paths(p).map(|s| s.display().to_string()).collect())
        .unwrap_or_default();
    for candidate in judge_search_paths() {
        let candidate = candidate.display().to_string();
        if !path_segments.contains(&candidate) {
            path_segments.push(candidate);
        }
    }
    if path_segments.is_empty() {
        return Err(AuditError::Environment(
            "PATH is empty after environment preparation".into(),
        ));
    }
    env.insert("PATH".to_string(), path_segments.join(":"));

    env.entry("NODE_ENV".to_string())
        .or_insert_with(|| "production".to_string());

    debug!(vars = env.len(), "prepared judge environment");
    Ok(env)
}
