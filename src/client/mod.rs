//! Typed client for the CLI plugin service.
//!
//! [`CliClient`] is what the registry dispenses for
//! [`CLI_PLUGIN_TYPE`](crate::registry::CLI_PLUGIN_TYPE). It borrows the
//! plugin's [`PluginConnection`] and becomes unusable once the process
//! supervisor closes that connection.
//!
//! - `exec`: the streaming bridge relaying stdin, stdout, and stderr.
//! - `simple`: the unary request/response path.

pub mod exec;
pub mod simple;

use std::time::Duration;

use crate::registry::PluginConnection;

/// Result of a streaming exec call that reached end-of-stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Exit code reported by the plugin, if it sent one.
    pub exit_code: Option<i32>,
    /// Number of response frames received.
    pub received_frames: usize,
}

impl ExecOutcome {
    /// Whether the command reported success, or reported nothing at all.
    #[must_use]
    pub fn success(&self) -> bool {
        !matches!(self.exit_code, Some(code) if code != 0)
    }
}

/// Client handle for one plugin's CLI service.
#[derive(Debug, Clone)]
pub struct CliClient {
    connection: PluginConnection,
    call_timeout: Option<Duration>,
}

impl CliClient {
    /// Bind a client to `connection`.
    #[must_use]
    pub fn new(connection: PluginConnection) -> Self {
        Self {
            connection,
            call_timeout: None,
        }
    }

    /// Apply a deadline to every unary call made through this client.
    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Connection this client borrows.
    #[must_use]
    pub fn connection(&self) -> &PluginConnection {
        &self.connection
    }
}
