//! Availability, version, and permission checks for the judge executable.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use gavel_core::AuditError;
use gavel_process::{CommandSpec, ProcessManager};

use crate::environment::prepare_environment;
use crate::executable::{is_executable, resolve_executable};
use crate::version::{JudgeVersion, MIN_JUDGE_VERSION, extract_version};

pub const DEFAULT_JUDGE_EXECUTABLE: &str = "codex";
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for one validator instance.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub executable_name: String,
    pub min_version: JudgeVersion,
    /// Hard timeout for every probe invocation.
    pub timeout: Duration,
    /// Extra environment merged over the preserve-list (tests point PATH at
    /// a fixture directory this way).
    pub extra_env: HashMap<String, String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            executable_name: DEFAULT_JUDGE_EXECUTABLE.to_string(),
            min_version: MIN_JUDGE_VERSION,
            timeout: DEFAULT_VALIDATION_TIMEOUT,
            extra_env: HashMap::new(),
        }
    }
}

/// What the validator found out about the judge.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub is_available: bool,
    pub version: Option<JudgeVersion>,
    pub executable_path: Option<PathBuf>,
    pub environment_issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ValidationReport {
    fn unavailable() -> Self {
        Self {
            is_available: false,
            version: None,
            executable_path: None,
            environment_issues: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    /// Convert a failed report into the typed error the client dispatches on.
    pub fn into_error(self) -> AuditError {
        AuditError::NotAvailable {
            reason: self
                .environment_issues
                .first()
                .cloned()
                .unwrap_or_else(|| "judge validation failed".into()),
            recommendations: self.recommendations,
        }
    }
}

/// Runs the six-step availability check through the process manager.
pub struct JudgeValidator {
    process: ProcessManager,
    config: ValidatorConfig,
}

impl JudgeValidator {
    pub fn new(process: ProcessManager, config: ValidatorConfig) -> Self {
        Self { process, config }
    }

    /// Probe the judge. Each failed step records an issue plus a
    /// recommendation and returns early; only a clean run marks available.
    pub async fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::unavailable();

        // Step 1: environment sanity — a usable PATH and a working sentinel.
        let env = match prepare_environment(&self.config.extra_env) {
            Ok(env) => env,
            Err(e) => {
                report.environment_issues.push(e.to_string());
                report
                    .recommendations
                    .push("Ensure PATH is set in the parent environment".into());
                return report;
            }
        };
        if !self.sentinel_works(&env).await {
            report
                .environment_issues
                .push("environment check failed: cannot execute a trivial command".into());
            report
                .recommendations
                .push("Verify the shell environment and PATH are intact".into());
            return report;
        }

        // Step 2: locate the executable.
        let lookup = resolve_executable(&self.config.executable_name, env.get("PATH").map(String::as_str));
        let Some(path) = lookup.found else {
            report.environment_issues.push(format!(
                "'{}' not found (tried: {})",
                self.config.executable_name,
                lookup.trace()
            ));
            report.recommendations.push(install_hint());
            return report;
        };
        report.executable_path = Some(path.clone());

        // Step 3: execute permission.
        if !is_executable(&path) {
            report
                .environment_issues
                .push(format!("'{}' is not executable", path.display()));
            report
                .recommendations
                .push(format!("Run: chmod +x {}", path.display()));
            return report;
        }

        // Step 4: version probe.
        let version_result = self
            .probe(&path, &["--version"], &env)
            .await;
        let version_output = match version_result {
            Ok(result) if result.success() => result.stdout,
            Ok(result) => {
                report.environment_issues.push(format!(
                    "version probe exited with code {}: {}",
                    result.exit_code,
                    result.stderr.trim()
                ));
                report
                    .recommendations
                    .push("Reinstall the judge CLI; its version probe is broken".into());
                return report;
            }
            Err(e) => {
                report
                    .environment_issues
                    .push(format!("version probe failed: {e}"));
                report.recommendations.push(install_hint());
                return report;
            }
        };
        let Some(version) = extract_version(&version_output) else {
            report.environment_issues.push(format!(
                "could not parse a version from: {}",
                version_output.trim()
            ));
            report
                .recommendations
                .push("Reinstall the judge CLI; its version output is unrecognized".into());
            return report;
        };
        report.version = Some(version);
        if version < self.config.min_version {
            report.environment_issues.push(format!(
                "judge version {version} is below the minimum {}",
                self.config.min_version
            ));
            report.recommendations.push(format!(
                "Upgrade the judge CLI to {} or newer",
                self.config.min_version
            ));
            return report;
        }

        // Step 5: functional smoke test.
        match self.probe(&path, &["-h"], &env).await {
            Ok(result) if result.success() => {}
            Ok(result) => {
                report.environment_issues.push(format!(
                    "smoke test (-h) exited with code {}",
                    result.exit_code
                ));
                report
                    .recommendations
                    .push("The judge CLI is installed but not functional; reinstall it".into());
                return report;
            }
            Err(e) => {
                report
                    .environment_issues
                    .push(format!("smoke test failed: {e}"));
                report
                    .recommendations
                    .push("The judge CLI is installed but not functional; reinstall it".into());
                return report;
            }
        }

        // Step 6: all checks passed.
        debug!(path = %path.display(), %version, "judge validated");
        report.is_available = true;
        report
    }

    async fn sentinel_works(&self, env: &HashMap<String, String>) -> bool {
        let lookup = resolve_executable("echo", env.get("PATH").map(String::as_str));
        let Some(echo) = lookup.found else {
            warn!("sentinel command 'echo' not found on PATH");
            return false;
        };
        let spec = CommandSpec {
            executable: echo,
            args: vec!["test".into()],
            working_directory: None,
            environment: env.clone(),
            timeout: self.config.timeout,
            input: None,
        };
        matches!(self.process.execute(spec).await, Ok(result) if result.success())
    }

    async fn probe(
        &self,
        path: &std::path::Path,
        args: &[&str],
        env: &HashMap<String, String>,
    ) -> Result<gavel_process::ProcessResult, AuditError> {
        let spec = CommandSpec {
            executable: path.to_path_buf(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_directory: None,
            environment: env.clone(),
            timeout: self.config.timeout,
            input: None,
        };
        let result = self.process.execute(spec).await?;
        if result.timed_out {
            return Err(AuditError::Timeout {
                elapsed_ms: result.execution_time.as_millis() as u64,
                limit_ms: self.config.timeout.as_millis() as u64,
            });
        }
        Ok(result)
    }
}

fn install_hint() -> String {
    if cfg!(target_os = "macos") {
        "Install the judge CLI: brew install codex or npm install -g @openai/codex".into()
    } else {
        "Install the judge CLI: npm install -g @openai/codex".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_fake_judge(dir: &Path, version: &str, h_exit: u32) -> PathBuf {
        let path = dir.join("fake-codex");
        let script = format!(
            "#!/bin/sh\n\
             case \"$1\" in\n\
               --version) echo \"fake-codex {version}\"; exit 0 ;;\n\
               -h) exit {h_exit} ;;\n\
               *) exit 0 ;;\n\
             esac\n"
        );
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config_for(dir: &Path) -> ValidatorConfig {
        let mut extra_env = HashMap::new();
        extra_env.insert(
            "PATH".to_string(),
            format!("{}:/usr/bin:/bin", dir.display()),
        );
        ValidatorConfig {
            executable_name: "fake-codex".to_string(),
            extra_env,
            ..ValidatorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_valid_judge_is_available() {
        let tmp = tempfile::tempdir().unwrap();
        write_fake_judge(tmp.path(), "0.30.1", 0);
        let validator = JudgeValidator::new(ProcessManager::with_defaults(), config_for(tmp.path()));

        let report = validator.validate().await;
        assert!(report.is_available, "issues: {:?}", report.environment_issues);
        assert_eq!(report.version.unwrap().to_string(), "0.30.1");
        assert!(report.executable_path.is_some());
        assert!(report.environment_issues.is_empty());
    }

    #[tokio::test]
    async fn test_missing_judge_recommends_install() {
        let tmp = tempfile::tempdir().unwrap();
        let validator = JudgeValidator::new(ProcessManager::with_defaults(), config_for(tmp.path()));

        let report = validator.validate().await;
        assert!(!report.is_available);
        assert!(report.environment_issues[0].contains("not found"));
        assert!(report.recommendations[0].contains("Install"));
    }

    #[tokio::test]
    async fn test_old_version_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_fake_judge(tmp.path(), "0.28.9", 0);
        let validator = JudgeValidator::new(ProcessManager::with_defaults(), config_for(tmp.path()));

        let report = validator.validate().await;
        assert!(!report.is_available);
        assert_eq!(report.version.unwrap().to_string(), "0.28.9");
        assert!(report.environment_issues[0].contains("below the minimum"));
        assert!(report.recommendations[0].contains("Upgrade"));
    }

    #[tokio::test]
    async fn test_failing_smoke_test_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_fake_judge(tmp.path(), "0.30.0", 2);
        let validator = JudgeValidator::new(ProcessManager::with_defaults(), config_for(tmp.path()));

        let report = validator.validate().await;
        assert!(!report.is_available);
        assert!(report.environment_issues[0].contains("smoke test"));
    }

    #[tokio::test]
    async fn test_unparseable_version_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_fake_judge(tmp.path(), "nightly", 0);
        let validator = JudgeValidator::new(ProcessManager::with_defaults(), config_for(tmp.path()));

        let report = validator.validate().await;
        assert!(!report.is_available);
        assert!(report.environment_issues[0].contains("could not parse"));
    }

    #[tokio::test]
    async fn test_failed_report_converts_to_not_available() {
        let tmp = tempfile::tempdir().unwrap();
        let validator = JudgeValidator::new(ProcessManager::with_defaults(), config_for(tmp.path()));
        let err = validator.validate().await.into_error();
        assert!(matches!(err, AuditError::NotAvailable { .. }));
    }
}
