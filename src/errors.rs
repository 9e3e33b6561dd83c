//! Error types shared across the plugin host.

use std::fmt::{Display, Formatter};

/// Shared plugin-host result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Plugin-host error enumeration covering launch, handshake, and RPC failures.
///
/// Launch, handshake, and dispense failures are structural and always reach
/// the caller. Mid-stream failures inside the exec bridge are logged instead
/// unless the stream never produced a response.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The plugin executable could not be started or its endpoint dialled.
    Launch(String),
    /// The plugin did not emit a handshake line within the startup window.
    HandshakeTimeout(String),
    /// The spawned process is not a compatible plugin (cookie or format mismatch).
    IncompatiblePlugin(String),
    /// The plugin speaks a protocol version the host does not support.
    UnsupportedProtocolVersion(String),
    /// No factory is registered for the requested plugin type.
    UnknownPluginType(String),
    /// Transport failure on an RPC stream.
    Stream(String),
    /// The plugin process exited unexpectedly.
    ProcessCrashed(String),
    /// The plugin answered a call with an application-level error.
    Remote(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::HandshakeTimeout(msg) => write!(f, "handshake timeout: {msg}"),
            Self::IncompatiblePlugin(msg) => write!(f, "incompatible plugin: {msg}"),
            Self::UnsupportedProtocolVersion(msg) => {
                write!(f, "unsupported protocol version: {msg}")
            }
            Self::UnknownPluginType(msg) => write!(f, "unknown plugin type: {msg}"),
            Self::Stream(msg) => write!(f, "stream: {msg}"),
            Self::ProcessCrashed(msg) => write!(f, "process crashed: {msg}"),
            Self::Remote(msg) => write!(f, "remote: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether this error was raised while starting a plugin.
    ///
    /// Launch-time errors are the ones a caller may retry with a different
    /// executable or report to the user as a missing/incompatible plugin.
    #[must_use]
    pub fn is_launch_error(&self) -> bool {
        matches!(
            self,
            Self::Launch(_)
                | Self::HandshakeTimeout(_)
                | Self::IncompatiblePlugin(_)
                | Self::UnsupportedProtocolVersion(_)
                | Self::UnknownPluginType(_)
                | Self::ProcessCrashed(_)
        )
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
