//! The judge client: build the prompt, execute under the process manager,
//! parse, retry transients, and attach diagnostics on final failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use gavel_core::{AuditError, AuditRequest, Review};
use gavel_env::environment::prepare_environment;
use gavel_env::executable::{LookupResult, resolve_executable};
use gavel_env::workdir::resolve_working_directory;
use gavel_process::{CommandSpec, ProcessManager, ProcessResult};

use crate::parser::parse_review;
use crate::prompt::build_audit_prompt;

/// Fixed argument prefix; the prompt is appended as the last positional.
pub const JUDGE_ARGS: &[&str] = &[
    "exec",
    "--sandbox",
    "read-only",
    "--json",
    "--skip-git-repo-check",
];

const STDERR_EXCERPT_LEN: usize = 500;

#[derive(Debug, Clone)]
pub struct JudgeClientConfig {
    pub executable_name: String,
    /// Additional attempts after the first, for transient failures only.
    pub retries: u32,
    /// Child-process timeout per attempt.
    pub timeout: Duration,
    /// First retry delay; doubles per attempt.
    pub backoff_base: Duration,
    pub working_directory: Option<PathBuf>,
    pub extra_env: HashMap<String, String>,
}

impl Default for JudgeClientConfig {
    fn default() -> Self {
        Self {
            executable_name: "codex".to_string(),
            retries: 2,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            working_directory: None,
            extra_env: HashMap::new(),
        }
    }
}

/// Executes audits against the judge CLI.
#[derive(Clone)]
pub struct JudgeClient {
    process: ProcessManager,
    config: JudgeClientConfig,
}

impl JudgeClient {
    pub fn new(process: ProcessManager, config: JudgeClientConfig) -> Self {
        Self { process, config }
    }

    /// Audit one request: validate, resolve environment, invoke, parse.
    ///
    /// Transient failures (spawn errors, unknown-cause non-zero exits) are
    /// retried with exponential backoff. Unavailability, parse rejections,
    /// and timeouts surface immediately.
    pub async fn audit(&self, request: &AuditRequest) -> Result<Review, AuditError> {
        request.validate()?;

        let cwd = resolve_working_directory(self.config.working_directory.as_deref(), None)?;
        let env = prepare_environment(&self.config.extra_env)?;
        let lookup = resolve_executable(
            &self.config.executable_name,
            env.get("PATH").map(String::as_str),
        );
        let Some(executable) = lookup.found.clone() else {
            return Err(self.not_available(&lookup));
        };

        let prompt = build_audit_prompt(request);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(attempt, executable = %executable.display(), "invoking judge");
            match self.attempt(&executable, &cwd, &env, &prompt).await {
                Ok(review) => return Ok(review),
                Err(e) if e.is_transient() && attempt <= self.config.retries => {
                    let delay = self.config.backoff_base * 2u32.pow(attempt - 1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient judge failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(self.enrich(e, &executable, &cwd, &env, &lookup)),
            }
        }
    }

    async fn attempt(
        &self,
        executable: &Path,
        cwd: &Path,
        env: &HashMap<String, String>,
        prompt: &str,
    ) -> Result<Review, AuditError> {
        let mut args: Vec<String> = JUDGE_ARGS.iter().map(|s| s.to_string()).collect();
        args.push(prompt.to_string());

        let spec = CommandSpec {
            executable: executable.to_path_buf(),
            args,
            working_directory: Some(cwd.to_path_buf()),
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
        if result.exit_code != 0 {
            return Err(AuditError::NonZeroExit {
                exit_code: result.exit_code,
                stderr: stderr_excerpt(&result),
            });
        }
        parse_review(&result.stdout)
    }

    fn not_available(&self, lookup: &LookupResult) -> AuditError {
        AuditError::NotAvailable {
            reason: format!(
                "'{}' not found (tried: {})",
                self.config.executable_name,
                lookup.trace()
            ),
            recommendations: vec![
                if cfg!(target_os = "macos") {
                    "Install the judge CLI: brew install codex or npm install -g @openai/codex"
                        .to_string()
                } else {
                    "Install the judge CLI: npm install -g @openai/codex".to_string()
                },
                format!(
                    "Or add its directory to PATH; checked {} locations",
                    lookup.attempted.len()
                ),
            ],
        }
    }

    /// Log the full diagnostic trail and fold a short command-line summary
    /// into the error without changing its kind.
    fn enrich(
        &self,
        error: AuditError,
        executable: &Path,
        cwd: &Path,
        env: &HashMap<String, String>,
        lookup: &LookupResult,
    ) -> AuditError {
        let mut env_keys: Vec<&str> = env.keys().map(String::as_str).collect();
        env_keys.sort_unstable();
        warn!(
            kind = error.kind(),
            command = %format!("{} {} <prompt>", executable.display(), JUDGE_ARGS.join(" ")),
            cwd = %cwd.display(),
            env_keys = %env_keys.join(","),
            resolution_trace = %lookup.trace(),
            "judge invocation failed"
        );

        let context = format!(
            " (command: {} {} <prompt>; cwd: {})",
            executable.display(),
            JUDGE_ARGS.join(" "),
            cwd.display()
        );
        match error {
            AuditError::NonZeroExit { exit_code, stderr } => AuditError::NonZeroExit {
                exit_code,
                stderr: format!("{stderr}{context}"),
            },
            AuditError::Spawn(reason) => AuditError::Spawn(format!("{reason}{context}")),
            AuditError::StdinWrite(reason) => AuditError::StdinWrite(format!("{reason}{context}")),
            // Timeout, Response, and queue errors carry structured fields the
            // engine dispatches on; the trail above is their diagnostic.
            other => other,
        }
    }
}

fn stderr_excerpt(result: &ProcessResult) -> String {
    let trimmed = result.stderr.trim();
    let source = if trimmed.is_empty() {
        result.stdout.trim()
    } else {
        trimmed
    };
    let mut excerpt: String = source.chars().take(STDERR_EXCERPT_LEN).collect();
    if source.chars().nth(STDERR_EXCERPT_LEN).is_some() {
        excerpt.push_str("...");
    }
    excerpt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    const CANONICAL: &str = r#"{"overall":88,"dimensions":[{"name":"accuracy","score":90},{"name":"completeness","score":85},{"name":"clarity","score":92},{"name":"actionability","score":80},{"name":"human_likeness","score":93}],"verdict":"pass","review":{"summary":"ok","inline":[],"citations":[]},"proposed_diff":null,"iterations":1,"judge_cards":[{"model":"codex-cli","score":88}]}"#;

    /// Write an executable fake judge and return its directory's PATH value.
    fn install_fake_judge(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-codex");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        format!("{}:/usr/bin:/bin", dir.display())
    }

    fn client_for(dir: &Path, path_value: String) -> JudgeClient {
        let mut extra_env = HashMap::new();
        extra_env.insert("PATH".to_string(), path_value);
        JudgeClient::new(
            ProcessManager::with_defaults(),
            JudgeClientConfig {
                executable_name: "fake-codex".to_string(),
                backoff_base: Duration::from_millis(1),
                working_directory: Some(dir.to_path_buf()),
                extra_env,
                ..JudgeClientConfig::default()
            },
        )
    }

    fn request() -> AuditRequest {
        AuditRequest::new("review the adder", "fn add(a: i32, b: i32) -> i32 { a + b }")
    }

    #[tokio::test]
    async fn test_happy_path_parses_agent_message() {
        let tmp = tempfile::tempdir().unwrap();
        // The fake judge emits a JSONL stream with one agent_message line.
        let escaped = CANONICAL.replace('"', "\\\"");
        let body = format!(
            "echo '{{\"msg\":{{\"type\":\"task_started\"}}}}'\n\
             printf '%s\\n' '{{\"msg\":{{\"type\":\"agent_message\",\"message\":\"{escaped}\"}}}}'"
        );
        let path = install_fake_judge(tmp.path(), &body);
        let client = client_for(tmp.path(), path);

        let review = client.audit(&request()).await.expect("audit");
        assert_eq!(review.overall, 88);
        assert_eq!(review.judge_cards[0].model, "codex-cli");
    }

    #[tokio::test]
    async fn test_missing_judge_is_not_available() {
        let tmp = tempfile::tempdir().unwrap();
        // PATH contains only directories without the fake judge.
        let client = client_for(tmp.path(), "/usr/bin:/bin".to_string());

        let err = client.audit(&request()).await.unwrap_err();
        let AuditError::NotAvailable {
            reason,
            recommendations,
        } = err
        else {
            panic!("expected NotAvailable");
        };
        assert!(reason.contains("fake-codex"));
        assert!(recommendations[0].contains("Install"));
    }

    #[tokio::test]
    async fn test_transient_failures_retry_exactly_retries_plus_one() {
        let tmp = tempfile::tempdir().unwrap();
        let counter = tmp.path().join("attempts");
        let body = format!("echo x >> {}\nexit 1", counter.display());
        let path = install_fake_judge(tmp.path(), &body);
        let client = client_for(tmp.path(), path);

        let err = client.audit(&request()).await.unwrap_err();
        assert!(matches!(err, AuditError::NonZeroExit { .. }));

        let attempts = fs::read_to_string(&counter).unwrap().lines().count();
        assert_eq!(attempts, 3); // retries (2) + 1
    }

    #[tokio::test]
    async fn test_parse_errors_do_not_retry() {
        let tmp = tempfile::tempdir().unwrap();
        let counter = tmp.path().join("attempts");
        let body = format!("echo x >> {}\necho 'not json at all'", counter.display());
        let path = install_fake_judge(tmp.path(), &body);
        let client = client_for(tmp.path(), path);

        let err = client.audit(&request()).await.unwrap_err();
        assert!(matches!(err, AuditError::Response { .. }));

        let attempts = fs::read_to_string(&counter).unwrap().lines().count();
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_timeouts_do_not_retry() {
        let tmp = tempfile::tempdir().unwrap();
        let counter = tmp.path().join("attempts");
        let body = format!("echo x >> {}\nsleep 30", counter.display());
        let path = install_fake_judge(tmp.path(), &body);
        let mut client = client_for(tmp.path(), path);
        client.config.timeout = Duration::from_millis(200);

        let err = client.audit(&request()).await.unwrap_err();
        assert!(matches!(err, AuditError::Timeout { .. }));

        let attempts = fs::read_to_string(&counter).unwrap().lines().count();
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_invalid_request_fails_before_any_invocation() {
        let tmp = tempfile::tempdir().unwrap();
        let counter = tmp.path().join("attempts");
        let body = format!("echo x >> {}\nexit 0", counter.display());
        let path = install_fake_judge(tmp.path(), &body);
        let client = client_for(tmp.path(), path);

        let mut bad = request();
        bad.task = "x".repeat(10_001);
        let err = client.audit(&bad).await.unwrap_err();
        assert!(matches!(err, AuditError::InvalidRequest(_)));
        assert!(!counter.exists());
    }

    #[tokio::test]
    async fn test_final_failure_carries_command_context() {
        let tmp = tempfile::tempdir().unwrap();
        let body = "echo 'judge blew up' >&2\nexit 7";
        let path = install_fake_judge(tmp.path(), body);
        let mut client = client_for(tmp.path(), path);
        client.config.retries = 0;

        let err = client.audit(&request()).await.unwrap_err();
        let AuditError::NonZeroExit { exit_code, stderr } = err else {
            panic!("expected NonZeroExit");
        };
        assert_eq!(exit_code, 7);
        assert!(stderr.contains("judge blew up"));
        assert!(stderr.contains("--sandbox read-only"));
    }
}
