use super::*;
use crate::events::ProcessEvent;
use std::time::Duration;

fn sh(script: &str, timeout: Duration) -> CommandSpec {
    CommandSpec::new("/bin/sh", timeout)
        .arg("-c")
        .arg(script)
}

#[tokio::test]
async fn test_execute_captures_stdout_and_exit_code() {
    let manager = ProcessManager::with_defaults();
    let result = manager
        .execute(sh("echo hello", Duration::from_secs(5)))
        .await
        .expect("execute");
    assert_eq!(result.exit_code, 0);
    assert!(!result.timed_out);
    assert!(result.stdout.contains("hello"));
    assert!(result.success());
}

#[tokio::test]
async fn test_execute_captures_stderr() {
    let manager = ProcessManager::with_defaults();
    let result = manager
        .execute(sh("echo oops >&2; exit 3", Duration::from_secs(5)))
        .await
        .expect("execute");
    assert_eq!(result.exit_code, 3);
    assert!(result.stderr.contains("oops"));
    assert!(!result.success());
}

#[tokio::test]
async fn test_input_is_written_to_stdin_then_closed() {
    let manager = ProcessManager::with_defaults();
    let mut spec = CommandSpec::new("/bin/cat", Duration::from_secs(5));
    spec.input = Some("piped payload".to_string());
    let result = manager.execute(spec).await.expect("execute");
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "piped payload");
}

#[tokio::test]
async fn test_environment_is_explicit_not_inherited() {
    let manager = ProcessManager::with_defaults();
    let mut spec = sh("echo \"$GAVEL_PROBE:$PATH\"", Duration::from_secs(5));
    spec.environment
        .insert("GAVEL_PROBE".to_string(), "present".to_string());
    spec.environment
        .insert("PATH".to_string(), "/usr/bin:/bin".to_string());
    let result = manager.execute(spec).await.expect("execute");
    assert!(result.stdout.starts_with("present:"));
    assert!(result.stdout.contains("/usr/bin"));
}

#[tokio::test]
async fn test_timeout_synthesizes_result_and_kills_child() {
    let config = ProcessManagerConfig {
        cleanup_timeout: Duration::from_millis(500),
        ..ProcessManagerConfig::default()
    };
    let manager = ProcessManager::new(config);
    let mut rx = manager.subscribe();

    let started = std::time::Instant::now();
    let result = manager
        .execute(sh("sleep 30", Duration::from_millis(200)))
        .await
        .expect("execute");

    assert!(result.timed_out);
    assert_eq!(result.exit_code, -1);
    assert_eq!(result.stderr, "Process timed out");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(manager.active_processes().await, 0);

    let mut saw_timeout = false;
    while let Ok(event) = rx.try_recv() {
        if event.name() == "process-timeout" {
            saw_timeout = true;
        }
    }
    assert!(saw_timeout, "expected a process-timeout event");
}

#[tokio::test]
async fn test_spawn_failure_is_a_distinct_error() {
    let manager = ProcessManager::with_defaults();
    let spec = CommandSpec::new("/nonexistent/gavel-judge-binary", Duration::from_secs(1));
    let err = manager.execute(spec).await.unwrap_err();
    assert!(matches!(err, gavel_core::AuditError::Spawn(_)));
}

#[tokio::test]
async fn test_concurrency_cap_serializes_excess_work() {
    let config = ProcessManagerConfig {
        max_concurrent: 2,
        ..ProcessManagerConfig::default()
    };
    let manager = ProcessManager::new(config);
    let mut rx = manager.subscribe();

    let started = std::time::Instant::now();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager
                .execute(sh("sleep 0.3", Duration::from_secs(10)))
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.expect("join").is_ok());
    }

    // Four 300 ms jobs through two slots need at least two batches.
    assert!(started.elapsed() >= Duration::from_millis(550));

    let mut queued = 0;
    while let Ok(event) = rx.try_recv() {
        if event.name() == "process-queued" {
            queued += 1;
        }
    }
    assert!(queued >= 2, "expected queued events, got {queued}");
}

#[tokio::test]
async fn test_queue_timeout_rejects_parked_caller() {
    let config = ProcessManagerConfig {
        max_concurrent: 1,
        queue_timeout: Duration::from_millis(100),
        ..ProcessManagerConfig::default()
    };
    let manager = ProcessManager::new(config);

    let blocker = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .execute(sh("sleep 1", Duration::from_secs(10)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = manager
        .execute(sh("echo fast", Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, gavel_core::AuditError::QueueTimeout { .. }));

    blocker.await.expect("join").expect("blocker result");
}

#[tokio::test]
async fn test_shutdown_rejects_new_work_and_drains_children() {
    let manager = ProcessManager::with_defaults();

    let hung = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .execute(sh("sleep 30", Duration::from_secs(60)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.active_processes().await, 1);

    manager.shutdown().await;
    assert_eq!(manager.active_processes().await, 0);

    let err = manager
        .execute(sh("echo nope", Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, gavel_core::AuditError::ShuttingDown));

    // The in-flight call resolves once its child is terminated.
    let result = hung.await.expect("join").expect("terminated result");
    assert_ne!(result.exit_code, 0);

    manager.reenable();
    let result = manager
        .execute(sh("echo back", Duration::from_secs(5)))
        .await
        .expect("execute after reenable");
    assert!(result.stdout.contains("back"));
}

#[tokio::test]
async fn test_health_reflects_outcomes() {
    let manager = ProcessManager::with_defaults();
    manager
        .execute(sh("true", Duration::from_secs(5)))
        .await
        .expect("execute");
    manager
        .execute(sh("false", Duration::from_secs(5)))
        .await
        .expect("execute");

    let health = manager.health();
    assert_eq!(health.started, 2);
    assert_eq!(health.succeeded, 1);
    assert_eq!(health.failed, 1);
    // 50% success rate over two runs: unhealthy.
    assert!(!health.healthy);
}

#[tokio::test]
async fn test_health_check_emits_events() {
    let manager = ProcessManager::with_defaults();
    let mut rx = manager.subscribe();
    manager.run_health_check();
    let event = rx.recv().await.expect("event");
    assert_eq!(event.name(), "health-check");
}

#[tokio::test]
async fn test_health_monitor_emits_periodically() {
    let manager = ProcessManager::with_defaults();
    let mut rx = manager.subscribe();
    let handle = manager.start_health_monitor(Duration::from_millis(20));

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("a health event within the window")
        .expect("event");
    assert_eq!(event.name(), "health-check");
    handle.abort();
}

#[tokio::test]
async fn test_output_cap_truncates_but_completes() {
    let config = ProcessManagerConfig {
        max_output_bytes: 1024,
        ..ProcessManagerConfig::default()
    };
    let manager = ProcessManager::new(config);
    let result = manager
        .execute(sh(
            "dd if=/dev/zero bs=1024 count=64 2>/dev/null | tr '\\0' 'x'",
            Duration::from_secs(10),
        ))
        .await
        .expect("execute");
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout.len(), 1024);
}
