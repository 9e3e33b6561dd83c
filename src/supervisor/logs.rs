//! Plugin log forwarding.
//!
//! A plugin writes diagnostics to stderr, ideally as tracing-subscriber JSON
//! lines:
//!
//! ```json
//! {"timestamp":"…","level":"INFO","fields":{"message":"listening"},"target":"echo_plugin"}
//! ```
//!
//! The forwarder re-emits each line through the host's `tracing` subscriber
//! at the plugin's own level, tagged with the plugin command. Lines that are
//! not JSON are forwarded at `DEBUG`. Lines below the configured threshold
//! are dropped. Forwarding is advisory: nothing here can fail the RPC path.

use std::str::FromStr;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::LogLevel;
use crate::protocol::codec::FrameCodec;
use crate::AppError;

#[derive(Debug, Deserialize)]
struct JsonLogLine {
    level: String,
    #[serde(default)]
    fields: JsonLogFields,
    #[serde(default)]
    target: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonLogFields {
    #[serde(default)]
    message: Option<String>,
}

/// One plugin log line after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedLog {
    /// Severity reported by the plugin, or `Debug` for plain text.
    pub level: LogLevel,
    /// Log message.
    pub message: String,
    /// Module path the plugin logged from, when known.
    pub target: Option<String>,
}

/// Parse a plugin output line. Returns `None` for blank lines.
#[must_use]
pub fn parse_log_line(line: &str) -> Option<ForwardedLog> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(json) = serde_json::from_str::<JsonLogLine>(trimmed) {
        if let Ok(level) = LogLevel::from_str(&json.level) {
            return Some(ForwardedLog {
                level,
                message: json.fields.message.unwrap_or_default(),
                target: json.target,
            });
        }
    }

    Some(ForwardedLog {
        level: LogLevel::Debug,
        message: trimmed.to_owned(),
        target: None,
    })
}

/// Emit `log` through the host subscriber unless it is below `threshold`.
pub fn emit(plugin: &str, stream: &'static str, log: &ForwardedLog, threshold: LogLevel) {
    if log.level < threshold {
        return;
    }
    let target = log.target.as_deref().unwrap_or("");
    let message = log.message.as_str();
    match log.level {
        LogLevel::Trace => trace!(plugin, stream, plugin_target = target, "{message}"),
        LogLevel::Debug => debug!(plugin, stream, plugin_target = target, "{message}"),
        LogLevel::Info => info!(plugin, stream, plugin_target = target, "{message}"),
        LogLevel::Warn => warn!(plugin, stream, plugin_target = target, "{message}"),
        LogLevel::Error => error!(plugin, stream, plugin_target = target, "{message}"),
    }
}

/// Spawn a task forwarding every line of `output` to the host logger.
///
/// The task ends on EOF, on an I/O error, or when `cancel` fires. Overlong
/// lines are skipped.
#[must_use]
pub fn spawn_forwarder<R>(
    plugin: String,
    stream: &'static str,
    output: R,
    threshold: LogLevel,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut framed = FramedRead::new(output, FrameCodec::new());

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                item = framed.next() => match item {
                    None => {
                        trace!(plugin = plugin.as_str(), stream, "log forwarder: EOF");
                        break;
                    }
                    Some(Err(AppError::Stream(msg))) => {
                        debug!(plugin = plugin.as_str(), stream, error = msg.as_str(), "log forwarder: skipping line");
                    }
                    Some(Err(err)) => {
                        debug!(plugin = plugin.as_str(), stream, %err, "log forwarder: read failed, stopping");
                        break;
                    }
                    Some(Ok(line)) => {
                        if let Some(log) = parse_log_line(&line) {
                            emit(&plugin, stream, &log, threshold);
                        }
                    }
                },
            }
        }
    })
}
