//! Unit tests for the streaming exec bridge.
//!
//! Covers:
//! - stdout relay of a simple command
//! - stdin forwarding across several chunks, terminated by end-of-input
//! - stdout/stderr lane separation and ordering
//! - exit code propagation
//! - a still-open local stdin does not keep the call alive
//! - receive failure before and after the first response frame
//! - connection closed before and during a call

use std::io::Cursor;
use std::time::Duration;

use futures_util::SinkExt;

use cli_plugin_host::client::exec::STDIN_CHUNK_BYTES;
use cli_plugin_host::client::CliClient;
use cli_plugin_host::protocol::wire::{next_frame, send_frame, CallHeader, ExecRequest, ExecResponse};
use cli_plugin_host::AppError;

use super::fake_plugin::{start_raw, start_scripted};

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

// ── Relay ───────────────────────────────────────────────────────────────────

/// `echo hi` produces exactly `hi\n` on stdout and nothing on stderr.
#[tokio::test]
async fn echo_output_reaches_local_stdout() {
    let (conn, _ct) = start_scripted().await;
    let client = CliClient::new(conn);
    let (mut out, mut err) = (Vec::new(), Vec::new());

    let outcome = client
        .exec_with_io("echo", &args(&["hi"]), tokio::io::empty(), &mut out, &mut err)
        .await
        .expect("exec must succeed");

    assert_eq!(out, b"hi\n");
    assert!(err.is_empty(), "stderr must stay empty");
    assert_eq!(outcome.exit_code, Some(0));
    assert!(outcome.success());
}

/// Input larger than several stdin chunks arrives intact and in order.
#[tokio::test]
async fn stdin_is_forwarded_across_chunks() {
    let (conn, _ct) = start_scripted().await;
    let client = CliClient::new(conn);
    let input: Vec<u8> = (0..STDIN_CHUNK_BYTES * 3 + 17)
        .map(|i| b'a' + u8::try_from(i % 26).expect("fits"))
        .collect();
    let (mut out, mut err) = (Vec::new(), Vec::new());

    let outcome = client
        .exec_with_io("cat", &[], Cursor::new(input.clone()), &mut out, &mut err)
        .await
        .expect("exec must succeed");

    assert_eq!(out, input, "cat must echo stdin byte for byte");
    assert!(outcome.received_frames >= 2, "expected data plus exit frames");
}

/// Empty stdin half-closes immediately; `cat` returns with no output.
#[tokio::test]
async fn empty_stdin_ends_cat_immediately() {
    let (conn, _ct) = start_scripted().await;
    let client = CliClient::new(conn);
    let (mut out, mut err) = (Vec::new(), Vec::new());

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        client.exec_with_io("cat", &[], tokio::io::empty(), &mut out, &mut err),
    )
    .await
    .expect("cat must observe end-of-input")
    .expect("exec must succeed");

    assert!(out.is_empty());
    assert_eq!(outcome.exit_code, Some(0));
}

/// Stdout and stderr bytes land on their own streams in arrival order.
#[tokio::test]
async fn stdout_and_stderr_are_kept_apart() {
    let (conn, _ct) = start_scripted().await;
    let client = CliClient::new(conn);
    let (mut out, mut err) = (Vec::new(), Vec::new());

    client
        .exec_with_io("split", &[], tokio::io::empty(), &mut out, &mut err)
        .await
        .expect("exec must succeed");

    assert_eq!(out, b"out\nmore\n");
    assert_eq!(err, b"err\n");
}

/// A non-zero exit code is reported on the outcome.
#[tokio::test]
async fn exit_code_is_reported() {
    let (conn, _ct) = start_scripted().await;
    let client = CliClient::new(conn);
    let (mut out, mut err) = (Vec::new(), Vec::new());

    let outcome = client
        .exec_with_io("exit", &args(&["3"]), tokio::io::empty(), &mut out, &mut err)
        .await
        .expect("exec must succeed");

    assert_eq!(outcome.exit_code, Some(3));
    assert!(!outcome.success());
}

/// A handler error is shown on stderr and reported as exit code 1.
#[tokio::test]
async fn unknown_command_reports_on_stderr() {
    let (conn, _ct) = start_scripted().await;
    let client = CliClient::new(conn);
    let (mut out, mut err) = (Vec::new(), Vec::new());

    let outcome = client
        .exec_with_io("nope", &[], tokio::io::empty(), &mut out, &mut err)
        .await
        .expect("exec must succeed");

    assert_eq!(String::from_utf8_lossy(&err), "unknown command 'nope'\n");
    assert_eq!(outcome.exit_code, Some(1));
}

/// The call returns once the plugin closes its stream, even though the
/// local stdin is still open.
#[tokio::test]
async fn open_local_stdin_does_not_block_return() {
    let (conn, _ct) = start_scripted().await;
    let client = CliClient::new(conn);
    let (stdin, _keep_open) = tokio::io::duplex(64);
    let (mut out, mut err) = (Vec::new(), Vec::new());

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        client.exec_with_io("echo", &args(&["done"]), stdin, &mut out, &mut err),
    )
    .await
    .expect("exec must not wait for local stdin")
    .expect("exec must succeed");

    assert_eq!(out, b"done\n");
    assert_eq!(outcome.exit_code, Some(0));
}

// ── Failure paths ───────────────────────────────────────────────────────────

/// A malformed first response frame fails the call.
#[tokio::test]
async fn receive_failure_before_any_frame_is_an_error() {
    let conn = start_raw(|mut reader, mut writer| async move {
        let _ = next_frame::<_, CallHeader>(&mut reader).await;
        let _ = next_frame::<_, ExecRequest>(&mut reader).await;
        let _ = writer.send("this is not json".to_owned()).await;
    })
    .await;
    let client = CliClient::new(conn);
    let (mut out, mut err) = (Vec::new(), Vec::new());

    let result = client
        .exec_with_io("echo", &[], tokio::io::empty(), &mut out, &mut err)
        .await;

    assert!(
        matches!(result, Err(AppError::Stream(ref msg)) if msg.contains("before any response")),
        "got {result:?}"
    );
}

/// After one good frame, a receive failure ends the call with `Ok`.
#[tokio::test]
async fn receive_failure_after_first_frame_keeps_output() {
    let conn = start_raw(|mut reader, mut writer| async move {
        let _ = next_frame::<_, CallHeader>(&mut reader).await;
        let _ = next_frame::<_, ExecRequest>(&mut reader).await;
        let _ = send_frame(&mut writer, &ExecResponse::stdout("partial\n")).await;
        let _ = writer.send("{broken".to_owned()).await;
    })
    .await;
    let client = CliClient::new(conn);
    let (mut out, mut err) = (Vec::new(), Vec::new());

    let outcome = client
        .exec_with_io("echo", &[], tokio::io::empty(), &mut out, &mut err)
        .await
        .expect("late failures are logged, not returned");

    assert_eq!(out, b"partial\n");
    assert_eq!(outcome.received_frames, 1);
    assert_eq!(outcome.exit_code, None);
}

/// A plugin that closes without sending anything yields an empty outcome.
#[tokio::test]
async fn silent_close_yields_empty_outcome() {
    let conn = start_raw(|mut reader, writer| async move {
        let _ = next_frame::<_, CallHeader>(&mut reader).await;
        let _ = next_frame::<_, ExecRequest>(&mut reader).await;
        drop(writer);
        drop(reader);
    })
    .await;
    let client = CliClient::new(conn);
    let (mut out, mut err) = (Vec::new(), Vec::new());

    let outcome = client
        .exec_with_io("echo", &[], tokio::io::empty(), &mut out, &mut err)
        .await
        .expect("clean end-of-stream is not an error");

    assert_eq!(outcome.received_frames, 0);
    assert!(out.is_empty());
}

/// A closed connection refuses new calls.
#[tokio::test]
async fn closed_connection_refuses_exec() {
    let (conn, _ct) = start_scripted().await;
    let client = CliClient::new(conn.clone());
    conn.close();
    let (mut out, mut err) = (Vec::new(), Vec::new());

    let result = client
        .exec_with_io("echo", &[], tokio::io::empty(), &mut out, &mut err)
        .await;

    assert!(
        matches!(result, Err(AppError::Stream(ref msg)) if msg == "connection closed"),
        "got {result:?}"
    );
}

/// Closing the connection during a silent call ends it with an error.
#[tokio::test]
async fn closing_connection_mid_call_ends_exec() {
    let conn = start_raw(|reader, writer| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop((reader, writer));
    })
    .await;
    let client = CliClient::new(conn.clone());

    let closer = conn.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        closer.close();
    });

    let (mut out, mut err) = (Vec::new(), Vec::new());
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.exec_with_io("echo", &[], tokio::io::empty(), &mut out, &mut err),
    )
    .await
    .expect("close must interrupt the call");

    assert!(
        matches!(result, Err(AppError::Stream(ref msg)) if msg.contains("closed during exec")),
        "got {result:?}"
    );
}
