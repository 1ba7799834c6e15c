//! Lifecycle ordering and kill semantics against real processes.

use spawnkit::{
    spawn, spawn_sync, LaunchSpec, LifecycleState, ProcessEvent, Signal, StdioConfig, SyncOptions,
};
use std::time::Duration;
use tokio::io::AsyncReadExt;

fn testchild() -> &'static str {
    env!("CARGO_BIN_EXE_spawnkit-testchild")
}

#[tokio::test]
async fn spawn_streams_stdout() {
    let handle = spawn(
        LaunchSpec::new("/bin/echo")
            .arg("hi")
            .stdio(StdioConfig::piped()),
    )
    .unwrap();
    let mut stdout = handle.take_stdout().unwrap();
    drop(handle.take_stdin());

    let mut buf = String::new();
    stdout.read_to_string(&mut buf).await.unwrap();
    assert_eq!(buf, "hi\n");
    assert_eq!(handle.wait().await, (Some(0), None));
}

#[tokio::test]
async fn exit_fires_before_close_and_both_once() {
    let handle = spawn(
        LaunchSpec::new(testchild())
            .args(["--emit-stdout", "3", "--exit-code", "5"])
            .stdio(StdioConfig::piped()),
    )
    .unwrap();
    let mut events = handle.subscribe();
    drop(handle.take_stdin());

    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        let is_close = matches!(event, ProcessEvent::Close { .. });
        seen.push(event);
        if is_close {
            break;
        }
    }

    let exits: Vec<usize> = seen
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, ProcessEvent::Exit { .. }))
        .map(|(i, _)| i)
        .collect();
    let closes: Vec<usize> = seen
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, ProcessEvent::Close { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(exits.len(), 1);
    assert_eq!(closes.len(), 1);
    assert!(exits[0] < closes[0]);

    match &seen[exits[0]] {
        ProcessEvent::Exit { code, signal } => {
            assert_eq!(*code, Some(5));
            assert_eq!(*signal, None);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn kill_is_idempotent_and_reports_signal() {
    let handle = spawn(
        LaunchSpec::new(testchild())
            .args(["--sleep-ms", "30000"])
            .stdio(StdioConfig::ignored()),
    )
    .unwrap();

    handle.kill(Some(Signal::SIGKILL)).unwrap();
    let (code, signal) = handle.wait().await;
    assert_eq!(code, None);
    assert_eq!(signal, Some(Signal::SIGKILL));
    assert_eq!(handle.state(), LifecycleState::Signaled);

    // Killing a terminal process stays a no-op.
    handle.kill(Some(Signal::SIGKILL)).unwrap();
    handle.kill(None).unwrap();
    assert_eq!(handle.signal(), Some(Signal::SIGKILL));
}

#[tokio::test]
async fn timeout_terminates_with_configured_signal() {
    let handle = spawn(
        LaunchSpec::new(testchild())
            .args(["--sleep-ms", "30000"])
            .stdio(StdioConfig::ignored())
            .timeout(Duration::from_millis(100))
            .kill_signal(Signal::SIGKILL),
    )
    .unwrap();

    let (code, signal) = handle.wait().await;
    assert_eq!(code, None);
    assert_eq!(signal, Some(Signal::SIGKILL));
    assert!(handle.timed_out());
}

#[tokio::test]
async fn environment_reaches_the_child() {
    let handle = spawn(
        LaunchSpec::new(testchild())
            .args(["--print-env", "SPAWNKIT_TEST_MARKER"])
            .env("SPAWNKIT_TEST_MARKER", "set-by-parent")
            .stdio(StdioConfig::piped()),
    )
    .unwrap();
    let mut stdout = handle.take_stdout().unwrap();
    drop(handle.take_stdin());

    let mut buf = String::new();
    stdout.read_to_string(&mut buf).await.unwrap();
    assert_eq!(buf, "set-by-parent\n");
}

#[test]
fn spawn_sync_reports_nonzero_status() {
    let result = spawn_sync(
        LaunchSpec::new("/bin/false").stdio(StdioConfig::piped()),
        &SyncOptions::default(),
    );
    assert_eq!(result.status, Some(1));
    assert_eq!(result.signal, None);
    assert!(result.error.is_none());
}

#[test]
fn spawn_sync_runs_the_testchild() {
    let result = spawn_sync(
        LaunchSpec::new(testchild())
            .args(["--emit-stdout", "2", "--emit-stderr", "1"])
            .stdio(StdioConfig::piped()),
        &SyncOptions::default(),
    );
    assert_eq!(result.stdout.as_bytes(), b"out-0\nout-1\n");
    assert_eq!(result.stderr.as_bytes(), b"err-0\n");
    assert_eq!(result.status, Some(0));
}
