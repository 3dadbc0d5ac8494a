//! Judge version extraction and comparison.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Minimum judge version the orchestrator is known to work with.
pub const MIN_JUDGE_VERSION: JudgeVersion = JudgeVersion {
    major: 0,
    minor: 29,
    patch: 0,
};

/// A `<major>.<minor>.<patch>` triple, compared lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct JudgeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for JudgeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for JudgeVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '.');
        let mut next = |label: &str| {
            parts
                .next()
                .ok_or_else(|| format!("missing {label} component in '{s}'"))?
                .parse::<u32>()
                .map_err(|e| format!("invalid {label} component in '{s}': {e}"))
        };
        Ok(Self {
            major: next("major")?,
            minor: next("minor")?,
            patch: next("patch")?,
        })
    }
}

/// Pull the first `major.minor.patch` triple out of arbitrary probe output.
///
/// `codex --version` prints a banner around the number; anything matching
/// the triple anywhere in stdout counts.
pub fn extract_version(stdout: &str) -> Option<JudgeVersion> {
    static VERSION_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = VERSION_RE.get_or_init(|| {
        regex::Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("version regex compiles")
    });
    let caps = re.captures(stdout)?;
    Some(JudgeVersion {
        major: caps[1].parse().ok()?,
        minor: caps[2].parse().ok()?,
        patch: caps[3].parse().ok()?,
    })
}
