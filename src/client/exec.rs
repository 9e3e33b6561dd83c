//! Streaming exec bridge.
//!
//! One exec call is one RPC stream carrying two independent lanes:
//!
//! - a forwarder task reads local stdin in chunks and sends each as an
//!   [`ExecRequest`] with empty command/args, half-closing the stream when
//!   stdin reaches EOF;
//! - the calling task receives [`ExecResponse`] frames and writes their
//!   stdout and stderr bytes to the local streams as they arrive.
//!
//! The forwarder is bound to a per-call [`CancellationToken`] and a per-call
//! error channel. It is cancelled and joined when the receive lane ends, so it
//! never outlives the call. Forwarding failures after the first response are
//! logged, not returned.

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{CliClient, ExecOutcome};
use crate::protocol::endpoint::{FrameReader, FrameWriter};
use crate::protocol::wire::{
    next_frame, send_frame, CallHeader, ExecRequest, ExecResponse, Method,
};
use crate::{AppError, Result};

/// Largest stdin slice carried by one request frame.
pub const STDIN_CHUNK_BYTES: usize = 4096;

impl CliClient {
    /// Run `command` in the plugin, relaying this process's standard streams.
    ///
    /// Blocks until the plugin closes the stream.
    ///
    /// # Errors
    ///
    /// See [`CliClient::exec_with_io`].
    pub async fn exec(&self, command: &str, args: &[String]) -> Result<ExecOutcome> {
        let mut stdout = tokio::io::stdout();
        let mut stderr = tokio::io::stderr();
        self.exec_with_io(command, args, tokio::io::stdin(), &mut stdout, &mut stderr)
            .await
    }

    /// Run `command` in the plugin, relaying the given streams.
    ///
    /// `stdin` is moved into the forwarder task. `stdout` and `stderr`
    /// receive the plugin's output in arrival order, flushed after each frame.
    ///
    /// # Errors
    ///
    /// - [`AppError::Stream`] if the stream cannot be opened, the request
    ///   cannot be sent, or the stream fails before any response frame.
    ///
    /// Receive failures after at least one response frame end the call with
    /// `Ok`, carrying whatever output already arrived.
    pub async fn exec_with_io<I, O, E>(
        &self,
        command: &str,
        args: &[String],
        stdin: I,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<ExecOutcome>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = self.connection.open_stream().await?;

        send_frame(
            &mut writer,
            &CallHeader {
                method: Method::Exec,
            },
        )
        .await?;
        send_frame(&mut writer, &ExecRequest::initial(command, args.to_vec())).await?;
        debug!(command, args = ?args, "exec: request sent");

        let cancel = self.connection.closed_token().child_token();
        let (error_tx, mut error_rx) = mpsc::channel::<AppError>(1);
        let forwarder = tokio::spawn(forward_stdin(stdin, writer, error_tx, cancel.clone()));

        let result = receive_output(&mut reader, stdout, stderr, &cancel).await;

        cancel.cancel();
        if let Err(err) = forwarder.await {
            warn!(%err, "exec: stdin forwarder did not shut down cleanly");
        }
        while let Ok(err) = error_rx.try_recv() {
            warn!(%err, "exec: stdin forwarding stopped");
        }

        match &result {
            Ok(outcome) => debug!(
                command,
                exit_code = ?outcome.exit_code,
                frames = outcome.received_frames,
                "exec: stream closed"
            ),
            Err(err) => warn!(command, %err, "exec: stream failed"),
        }
        result
    }
}

/// Receive lane: relay response frames until end-of-stream.
async fn receive_output<O, E>(
    reader: &mut FrameReader,
    stdout: &mut O,
    stderr: &mut E,
    cancel: &CancellationToken,
) -> Result<ExecOutcome>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut outcome = ExecOutcome::default();

    loop {
        let frame = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                if outcome.received_frames == 0 {
                    return Err(AppError::Stream("connection closed during exec".into()));
                }
                debug!("exec: connection closed, stopping receive");
                break;
            }

            frame = next_frame::<_, ExecResponse>(reader) => frame,
        };

        match frame {
            Ok(None) => break,
            Ok(Some(chunk)) => {
                outcome.received_frames += 1;
                relay(stdout, &chunk.stdout, "stdout").await;
                relay(stderr, &chunk.stderr, "stderr").await;
                if chunk.exit_code.is_some() {
                    outcome.exit_code = chunk.exit_code;
                }
            }
            Err(err) if outcome.received_frames == 0 => {
                return Err(AppError::Stream(format!(
                    "exec stream failed before any response: {err}"
                )));
            }
            Err(err) => {
                warn!(%err, "exec: receive failed, ending stream");
                break;
            }
        }
    }

    Ok(outcome)
}

/// Write one chunk to a local stream and flush it. Failures are logged.
async fn relay<W>(out: &mut W, bytes: &[u8], lane: &'static str)
where
    W: AsyncWrite + Unpin,
{
    if bytes.is_empty() {
        return;
    }
    if let Err(err) = out.write_all(bytes).await {
        warn!(lane, %err, "exec: local write failed");
        return;
    }
    if let Err(err) = out.flush().await {
        warn!(lane, %err, "exec: local flush failed");
    }
}

/// Send lane: forward local stdin until EOF, error, or cancellation.
///
/// On EOF or read failure the outbound half is closed so the plugin sees
/// end-of-input.
async fn forward_stdin<I>(
    mut stdin: I,
    mut writer: FrameWriter,
    errors: mpsc::Sender<AppError>,
    cancel: CancellationToken,
) where
    I: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = vec![0u8; STDIN_CHUNK_BYTES];

    loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            read = stdin.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                debug!("exec: local stdin closed");
                close_writer(&mut writer, &errors).await;
                return;
            }
            Ok(n) => n,
            Err(err) => {
                report(&errors, AppError::Io(format!("stdin read failed: {err}")));
                close_writer(&mut writer, &errors).await;
                return;
            }
        };

        let chunk = ExecRequest::stdin_chunk(buf[..n].to_vec());
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            sent = send_frame(&mut writer, &chunk) => sent,
        };

        if let Err(err) = sent {
            report(&errors, err);
            return;
        }
    }
}

async fn close_writer(writer: &mut FrameWriter, errors: &mpsc::Sender<AppError>) {
    if let Err(err) = SinkExt::<String>::close(writer).await {
        report(errors, err);
    }
}

fn report(errors: &mpsc::Sender<AppError>, err: AppError) {
    if let Err(mpsc::error::TrySendError::Full(err) | mpsc::error::TrySendError::Closed(err)) =
        errors.try_send(err)
    {
        warn!(%err, "exec: stdin forwarding error dropped");
    }
}
