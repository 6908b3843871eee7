//! Tests for local command execution

use command_executor::backends::LocalLauncher;
use command_executor::{Command, Error, Launcher, ProcessEventType, ProcessHandle};
use futures::StreamExt;
use std::time::{Duration, Instant};

#[smol_potat::test]
async fn test_execute_captures_stdout_and_stderr() {
    let cmd = Command::shell("echo applied 3 migrations; echo warning: drift >&2");

    let result = LocalLauncher.execute(cmd).await.unwrap();

    assert!(result.success());
    assert!(result.output.contains("applied 3 migrations"));
    assert!(result.output.contains("warning: drift"));
}

#[smol_potat::test]
async fn test_command_with_env_vars() {
    let cmd = Command::builder("sh")
        .arg("-c")
        .arg("echo $DATABASE_URL")
        .env("DATABASE_URL", "postgres://localhost/core")
        .build();

    let result = LocalLauncher.execute(cmd).await.unwrap();

    assert_eq!(result.output.trim(), "postgres://localhost/core");
}

#[smol_potat::test]
async fn test_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "present").unwrap();

    let cmd = Command::builder("cat")
        .arg("marker.txt")
        .current_dir(dir.path())
        .build();

    let result = LocalLauncher.execute(cmd).await.unwrap();
    assert_eq!(result.output.trim(), "present");
}

#[smol_potat::test]
async fn test_exit_code_propagation() {
    let result = LocalLauncher.execute(Command::shell("exit 42")).await.unwrap();

    assert_eq!(result.status.code, Some(42));
    assert!(!result.success());
}

#[smol_potat::test]
async fn test_command_not_found() {
    let result = LocalLauncher
        .execute(Command::new("this_command_does_not_exist_12345"))
        .await;

    assert!(matches!(result, Err(Error::SpawnFailed { .. })));
}

#[smol_potat::test]
async fn test_timeout_gives_up_on_long_process() {
    let started = Instant::now();
    let result = LocalLauncher
        .execute_with_timeout(Command::shell("sleep 30"), Duration::from_millis(200))
        .await;

    assert!(matches!(result, Err(Error::TimedOut { .. })));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[smol_potat::test]
async fn test_fast_process_beats_timeout() {
    let result = LocalLauncher
        .execute_with_timeout(Command::shell("echo done"), Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(result.output.trim(), "done");
}

#[smol_potat::test]
async fn test_event_stream_starts_with_started_event() {
    let (mut events, mut handle) = LocalLauncher
        .launch(Command::shell("echo one; echo two"))
        .await
        .unwrap();

    let first = events.next().await.unwrap();
    assert!(matches!(first.event_type, ProcessEventType::Started { .. }));

    let lines: Vec<String> = events.filter_map(|e| async move { e.data }).collect().await;
    assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);

    assert!(handle.wait().await.unwrap().success());
}

#[cfg(unix)]
#[smol_potat::test]
async fn test_terminate_running_process() {
    let (_events, mut handle) = LocalLauncher.launch(Command::shell("sleep 10")).await.unwrap();
    assert!(handle.pid().is_some());

    smol::Timer::after(Duration::from_millis(100)).await;
    handle.terminate().await.unwrap();

    let status = handle.wait().await.unwrap();
    assert!(status.terminated_by_signal());
}
