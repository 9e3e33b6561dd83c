//! Message shapes exchanged between host and plugin.
//!
//! Each RPC stream starts with a [`CallHeader`] naming the method. An `exec`
//! stream then carries [`ExecRequest`] frames host → plugin and
//! [`ExecResponse`] frames plugin → host until the plugin closes the
//! connection. An `exec_simple` stream carries exactly one
//! [`SimpleExecRequest`] and one [`SimpleExecResponse`].
//!
//! | Frame                 | Direction       | Fields                         |
//! |-----------------------|-----------------|--------------------------------|
//! | `CallHeader`          | host → plugin   | `method`                       |
//! | `ExecRequest`         | host → plugin   | `command`, `args`, `stdin`     |
//! | `ExecResponse`        | plugin → host   | `stdout`, `stderr`, `exit_code`|
//! | `SimpleExecRequest`   | host → plugin   | `command`, `args`              |
//! | `SimpleExecResponse`  | plugin → host   | `output`, `error`              |

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// RPC method selected by the first frame of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Bidirectional streaming execution.
    Exec,
    /// Unary execution.
    ExecSimple,
}

/// First frame of every stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallHeader {
    /// Method this stream invokes.
    pub method: Method,
}

/// One host → plugin chunk of a streaming exec call.
///
/// The first chunk on a stream carries `command` and `args` with empty
/// `stdin`; every later chunk carries only stdin bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Subcommand name; empty on stdin chunks.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    /// Subcommand arguments; empty on stdin chunks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Slice of local standard input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stdin: Vec<u8>,
}

impl ExecRequest {
    /// The opening chunk of a stream.
    #[must_use]
    pub fn initial(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            stdin: Vec::new(),
        }
    }

    /// A follow-up chunk carrying only stdin bytes.
    #[must_use]
    pub fn stdin_chunk(bytes: Vec<u8>) -> Self {
        Self {
            stdin: bytes,
            ..Self::default()
        }
    }
}

/// One plugin → host chunk of a streaming exec call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResponse {
    /// Bytes for the host's standard output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stdout: Vec<u8>,
    /// Bytes for the host's standard error.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stderr: Vec<u8>,
    /// Terminal status of the command; sent at most once, on the last chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ExecResponse {
    /// A chunk carrying standard-output bytes.
    #[must_use]
    pub fn stdout(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: bytes.into(),
            ..Self::default()
        }
    }

    /// A chunk carrying standard-error bytes.
    #[must_use]
    pub fn stderr(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            stderr: bytes.into(),
            ..Self::default()
        }
    }

    /// The terminal chunk reporting the command's exit code.
    #[must_use]
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }
}

/// Unary exec request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleExecRequest {
    /// Subcommand name.
    pub command: String,
    /// Subcommand arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Unary exec response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleExecResponse {
    /// Command output, returned to the caller verbatim.
    #[serde(default)]
    pub output: String,
    /// Application-level failure reported by the plugin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serialise `frame` as one JSON line and write it to `sink`.
///
/// # Errors
///
/// Returns [`AppError::Stream`] if serialisation fails, or the sink's error
/// if the write fails.
pub async fn send_frame<S, T>(sink: &mut S, frame: &T) -> Result<()>
where
    S: Sink<String, Error = AppError> + Unpin,
    T: Serialize,
{
    let line = serde_json::to_string(frame)
        .map_err(|e| AppError::Stream(format!("failed to serialise frame: {e}")))?;
    sink.send(line).await
}

/// Read and decode the next frame from `stream`.
///
/// Returns `Ok(None)` on clean end-of-stream. Blank lines are skipped.
///
/// # Errors
///
/// Returns [`AppError::Stream`]`("malformed frame: …")` if the line is not a
/// valid `T`, or the codec's error on transport failure.
pub async fn next_frame<R, T>(stream: &mut R) -> Result<Option<T>>
where
    R: Stream<Item = Result<String>> + Unpin,
    T: DeserializeOwned,
{
    loop {
        match stream.next().await {
            None => return Ok(None),
            Some(Err(e)) => return Err(e),
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                return serde_json::from_str(&line)
                    .map(Some)
                    .map_err(|e| AppError::Stream(format!("malformed frame: {e}")));
            }
        }
    }
}
