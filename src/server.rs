//! Plugin-side serving of the CLI plugin contract.
//!
//! A plugin executable calls [`serve`] with its [`CliPlugin`]
//! implementation. `serve` refuses to run unless the host's magic cookie is
//! present, binds a listener, prints the handshake line on stdout, and then
//! answers RPC streams until SIGTERM or Ctrl-C.
//!
//! Each accepted connection is one RPC stream. The first frame names the
//! method; the rest of the stream follows the shapes in
//! [`wire`](crate::protocol::wire). A connection that closes without a header
//! is the host's reachability probe and is ignored.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::protocol::endpoint::{framed, BoxedIo, FrameReader, FrameWriter, PluginListener};
use crate::protocol::handshake::{HandshakeConfig, PROTOCOL_VERSIONS_ENV};
use crate::protocol::wire::{
    next_frame, send_frame, CallHeader, ExecRequest, ExecResponse, Method, SimpleExecRequest,
    SimpleExecResponse,
};
use crate::{AppError, Result};

/// Buffered stdin chunks per exec call before the reader applies backpressure.
const STDIN_QUEUE_DEPTH: usize = 16;

/// Listener flavour a plugin advertises in its handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transport {
    /// Loopback TCP on an ephemeral port.
    #[default]
    Tcp,
    /// Local socket (Unix domain socket or named pipe).
    Local,
}

/// Plugin-side serving configuration.
#[derive(Debug, Clone, Default)]
pub struct ServeConfig {
    /// Listener flavour.
    pub transport: Transport,
    /// Cookie and protocol version expected from the host.
    pub handshake: HandshakeConfig,
}

/// Subcommand invocation received on an exec stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Subcommand name.
    pub command: String,
    /// Subcommand arguments.
    pub args: Vec<String>,
}

/// Output lanes of one exec call.
pub struct ExecOutput {
    writer: FrameWriter,
}

impl ExecOutput {
    /// Send bytes to the host's stdout.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Stream`] if the host has gone away.
    pub async fn stdout(&mut self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        send_frame(&mut self.writer, &ExecResponse::stdout(bytes)).await
    }

    /// Send bytes to the host's stderr.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Stream`] if the host has gone away.
    pub async fn stderr(&mut self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        send_frame(&mut self.writer, &ExecResponse::stderr(bytes)).await
    }
}

/// Subcommand implementation served by a plugin.
pub trait CliPlugin: Send + Sync {
    /// Run a streaming subcommand and return its exit code.
    ///
    /// `stdin` yields the host's standard input in chunks and closes at
    /// end-of-input.
    fn exec<'a>(
        &'a self,
        invocation: Invocation,
        stdin: mpsc::Receiver<Vec<u8>>,
        output: &'a mut ExecOutput,
    ) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + 'a>>;

    /// Run a subcommand and return its whole output.
    fn exec_simple<'a>(
        &'a self,
        command: &'a str,
        args: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Check the environment the host launched this plugin with.
///
/// `cookie` and `versions` are the values of the cookie variable and
/// `PLUGIN_PROTOCOL_VERSIONS`. A missing version list is accepted.
///
/// # Errors
///
/// - [`AppError::IncompatiblePlugin`] if the cookie is missing or wrong.
/// - [`AppError::UnsupportedProtocolVersion`] if the host does not list this
///   plugin's protocol version.
pub fn verify_environment(
    config: &HandshakeConfig,
    cookie: Option<&str>,
    versions: Option<&str>,
) -> Result<()> {
    if cookie != Some(config.cookie_value.as_str()) {
        return Err(AppError::IncompatiblePlugin(
            "this binary is a plugin and is not meant to be executed directly; \
             run it through the host CLI"
                .into(),
        ));
    }

    if let Some(list) = versions {
        let supported = list
            .split(',')
            .filter_map(|v| v.trim().parse::<u32>().ok())
            .any(|v| v == config.protocol_version);
        if !supported {
            return Err(AppError::UnsupportedProtocolVersion(format!(
                "host accepts versions '{list}', plugin speaks {}",
                config.protocol_version
            )));
        }
    }

    Ok(())
}

/// Serve `plugin` until SIGTERM or Ctrl-C.
///
/// # Errors
///
/// Returns the [`verify_environment`] error when not launched by a host, or
/// [`AppError::Io`] if the listener cannot be bound or the handshake line
/// cannot be written.
pub async fn serve(config: &ServeConfig, plugin: Arc<dyn CliPlugin>) -> Result<()> {
    let cookie = std::env::var(&config.handshake.cookie_key).ok();
    let versions = std::env::var(PROTOCOL_VERSIONS_ENV).ok();
    verify_environment(&config.handshake, cookie.as_deref(), versions.as_deref())?;

    let (listener, endpoint) = match config.transport {
        Transport::Tcp => PluginListener::bind_tcp().await?,
        Transport::Local => {
            PluginListener::bind_local(&format!("cli-plugin-{}", uuid::Uuid::new_v4()))?
        }
    };

    let mut stdout = tokio::io::stdout();
    let line = config.handshake.handshake_line(&endpoint);
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    info!(%endpoint, "plugin serving");

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_ct.cancel();
    });

    serve_listener(listener, plugin, ct).await;
    info!("plugin shut down");
    Ok(())
}

/// Accept and answer connections on `listener` until `ct` is cancelled.
pub async fn serve_listener(
    listener: PluginListener,
    plugin: Arc<dyn CliPlugin>,
    ct: CancellationToken,
) {
    let span = info_span!("plugin_server");
    async move {
        loop {
            tokio::select! {
                () = ct.cancelled() => {
                    info!("plugin server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok(io) => {
                            let plugin = Arc::clone(&plugin);
                            tokio::spawn(async move {
                                if let Err(err) = handle_connection(io, plugin.as_ref()).await {
                                    warn!(%err, "rpc stream failed");
                                }
                            });
                        }
                        Err(err) => warn!(%err, "plugin accept failed"),
                    }
                }
            }
        }
    }
    .instrument(span)
    .await;
}

async fn handle_connection(io: BoxedIo, plugin: &dyn CliPlugin) -> Result<()> {
    let (mut reader, writer) = framed(io);

    let Some(header) = next_frame::<_, CallHeader>(&mut reader).await? else {
        debug!("connection closed without a call header");
        return Ok(());
    };

    let span = info_span!("rpc_stream", method = ?header.method);
    match header.method {
        Method::Exec => serve_exec(reader, writer, plugin).instrument(span).await,
        Method::ExecSimple => {
            serve_simple(reader, writer, plugin)
                .instrument(span)
                .await
        }
    }
}

async fn serve_exec(
    mut reader: FrameReader,
    writer: FrameWriter,
    plugin: &dyn CliPlugin,
) -> Result<()> {
    let request = next_frame::<_, ExecRequest>(&mut reader)
        .await?
        .ok_or_else(|| AppError::Stream("exec stream closed before the request".into()))?;

    let (stdin_tx, stdin_rx) = mpsc::channel(STDIN_QUEUE_DEPTH);
    if !request.stdin.is_empty() && stdin_tx.send(request.stdin).await.is_err() {
        debug!("exec: stdin receiver dropped early");
    }
    // Keeps draining after the handler stops reading so the host never
    // writes into a reset socket; ends when the host closes the stream.
    tokio::spawn(feed_stdin(reader, stdin_tx));

    let invocation = Invocation {
        command: request.command,
        args: request.args,
    };
    debug!(command = invocation.command.as_str(), "exec: invoked");

    let mut output = ExecOutput { writer };
    let code = match plugin.exec(invocation, stdin_rx, &mut output).await {
        Ok(code) => code,
        Err(err) => {
            let message = remote_message(err);
            warn!(error = message.as_str(), "exec: handler failed");
            output.stderr(format!("{message}\n")).await?;
            1
        }
    };

    send_frame(&mut output.writer, &ExecResponse::exit(code)).await?;
    SinkExt::<String>::close(&mut output.writer).await
}

async fn feed_stdin(mut reader: FrameReader, stdin: mpsc::Sender<Vec<u8>>) {
    let mut open = true;
    loop {
        match next_frame::<_, ExecRequest>(&mut reader).await {
            Ok(Some(chunk)) => {
                if open && !chunk.stdin.is_empty() && stdin.send(chunk.stdin).await.is_err() {
                    open = false;
                }
            }
            Ok(None) => {
                debug!("exec: host closed stdin");
                break;
            }
            Err(err) => {
                debug!(%err, "exec: stdin stream failed");
                break;
            }
        }
    }
}

async fn serve_simple(
    mut reader: FrameReader,
    mut writer: FrameWriter,
    plugin: &dyn CliPlugin,
) -> Result<()> {
    let request = next_frame::<_, SimpleExecRequest>(&mut reader)
        .await?
        .ok_or_else(|| AppError::Stream("exec_simple stream closed before the request".into()))?;

    let response = match plugin.exec_simple(&request.command, &request.args).await {
        Ok(output) => SimpleExecResponse {
            output,
            error: None,
        },
        Err(err) => SimpleExecResponse {
            output: String::new(),
            error: Some(remote_message(err)),
        },
    };

    send_frame(&mut writer, &response).await?;
    SinkExt::<String>::close(&mut writer).await
}

/// Text sent to the host for a handler error.
fn remote_message(err: AppError) -> String {
    match err {
        AppError::Remote(msg) => msg,
        other => other.to_string(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            warn!(%err, "ctrl-c signal handler failed");
        }
    }
}
