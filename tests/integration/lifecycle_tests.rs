//! Integration tests for a running plugin: streaming, teardown, and crashes.

use std::io::Cursor;
use std::time::Duration;

use cli_plugin_host::{AppError, Client, ClientOptions};

async fn launch() -> Client {
    let mut options = ClientOptions::new(env!("CARGO_BIN_EXE_echo-plugin"), Vec::new());
    options.kill_grace = Duration::from_secs(1);
    Client::new(options).await.expect("launch echo-plugin")
}

#[tokio::test]
async fn stdin_round_trips_through_the_plugin() {
    let client = launch().await;
    let input = b"line one\nline two\n".repeat(1000);
    let (mut out, mut err) = (Vec::new(), Vec::new());

    let outcome = client
        .exec_with_io("cat", &[], Cursor::new(input.clone()), &mut out, &mut err)
        .await
        .expect("exec cat");

    assert_eq!(out, input);
    assert_eq!(outcome.exit_code, Some(0));
    client.kill().await;
}

#[tokio::test]
async fn failing_command_reports_exit_code_and_stderr() {
    let client = launch().await;
    let (mut out, mut err) = (Vec::new(), Vec::new());

    let outcome = client
        .exec_with_io("fail", &["4".to_owned()], tokio::io::empty(), &mut out, &mut err)
        .await
        .expect("exec fail");

    assert_eq!(outcome.exit_code, Some(4));
    assert!(out.is_empty());
    assert!(String::from_utf8_lossy(&err).contains("code 4"));
    client.kill().await;
}

#[tokio::test]
async fn unknown_simple_command_is_remote_error() {
    let client = launch().await;

    let result = client.exec_simple("nonexistent", &[]).await;

    assert!(
        matches!(result, Err(AppError::Remote(ref msg)) if msg.contains("nonexistent")),
        "got {result:?}"
    );
    assert!(client.is_alive().await, "a remote error must not affect the process");
    client.kill().await;
}

#[tokio::test]
async fn kill_is_idempotent() {
    let client = launch().await;

    client.kill().await;
    client.kill().await;

    assert!(!client.is_alive().await);
}

#[tokio::test]
async fn calls_after_kill_fail_as_stream_errors() {
    let client = launch().await;
    client.kill().await;

    let result = client.exec_simple("echo", &[]).await;

    assert!(
        matches!(result, Err(AppError::Stream(ref msg)) if msg == "connection closed"),
        "got {result:?}"
    );
}

#[tokio::test]
async fn kill_returns_within_grace_period() {
    let client = launch().await;

    let started = std::time::Instant::now();
    client.kill().await;

    assert!(started.elapsed() < Duration::from_secs(5));
}

#[cfg(unix)]
mod signals {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    use cli_plugin_host::AppError;

    use super::launch;

    fn pid_of(client: &cli_plugin_host::Client) -> Pid {
        let raw = client.pid().expect("pid");
        Pid::from_raw(i32::try_from(raw).expect("pid fits i32"))
    }

    #[tokio::test]
    async fn call_after_plugin_death_is_a_crash() {
        let client = launch().await;
        kill(pid_of(&client), Signal::SIGKILL).expect("SIGKILL plugin");

        let result = client.exec_simple("echo", &["anyone".to_owned()]).await;

        assert!(
            matches!(result, Err(AppError::ProcessCrashed(ref msg)) if msg.contains("signal")),
            "got {result:?}"
        );
        client.kill().await;
    }

    #[tokio::test]
    async fn kill_after_natural_exit_is_safe() {
        let client = launch().await;
        kill(pid_of(&client), Signal::SIGTERM).expect("SIGTERM plugin");

        for _ in 0..100 {
            if !client.is_alive().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(!client.is_alive().await, "plugin must exit on SIGTERM");

        client.kill().await;
        client.kill().await;
    }
}
