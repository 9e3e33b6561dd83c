//! Plugin handshake.
//!
//! The host starts the child with the magic cookie and its supported
//! protocol versions in the environment. A compatible plugin answers with a
//! single line on stdout before doing anything else:
//!
//! ```text
//! CORE-VERSION|APP-VERSION|NETWORK|ADDRESS|PROTOCOL|COOKIE
//! 1|1|tcp|127.0.0.1:43121|ndjson|4951e1a8-27fa-4fc0-b04c-308fc3ed5799
//! ```
//!
//! [`read_handshake`] waits for that line within the startup window and
//! validates it against a [`HandshakeConfig`]. The caller owns the child and
//! must kill it when this returns an error.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

use crate::protocol::endpoint::Endpoint;
use crate::{AppError, Result};

/// Version of the handshake line format itself.
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Version of the CLI plugin RPC contract.
pub const APP_PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the magic cookie.
pub const MAGIC_COOKIE_KEY: &str = "NEWRELIC_CLI_PLUGIN";

/// Value a plugin must echo to be accepted.
pub const MAGIC_COOKIE_VALUE: &str = "4951e1a8-27fa-4fc0-b04c-308fc3ed5799";

/// Environment variable listing the app protocol versions the host accepts.
pub const PROTOCOL_VERSIONS_ENV: &str = "PLUGIN_PROTOCOL_VERSIONS";

/// Environment variable carrying the requested plugin log level.
pub const LOG_LEVEL_ENV: &str = "PLUGIN_LOG_LEVEL";

/// Frame protocol spoken on the RPC channel.
pub const FRAME_PROTOCOL: &str = "ndjson";

/// Deadline used when a startup window is too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Shared secret and version negotiated once per plugin launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// App protocol version this side speaks.
    pub protocol_version: u32,
    /// Environment variable name carrying the cookie.
    pub cookie_key: String,
    /// Cookie value both sides must agree on.
    pub cookie_value: String,
}

impl HandshakeConfig {
    /// The fixed configuration shared by the host and every CLI plugin.
    #[must_use]
    pub fn cli_plugin() -> Self {
        Self {
            protocol_version: APP_PROTOCOL_VERSION,
            cookie_key: MAGIC_COOKIE_KEY.to_owned(),
            cookie_value: MAGIC_COOKIE_VALUE.to_owned(),
        }
    }

    /// Environment variables the host sets on the spawned plugin.
    #[must_use]
    pub fn child_env(&self) -> Vec<(String, String)> {
        vec![
            (self.cookie_key.clone(), self.cookie_value.clone()),
            (
                PROTOCOL_VERSIONS_ENV.to_owned(),
                self.protocol_version.to_string(),
            ),
        ]
    }

    /// Render the handshake line a plugin listening on `endpoint` must print.
    #[must_use]
    pub fn handshake_line(&self, endpoint: &Endpoint) -> String {
        format!(
            "{CORE_PROTOCOL_VERSION}|{}|{}|{}|{FRAME_PROTOCOL}|{}",
            self.protocol_version,
            endpoint.network(),
            endpoint.address(),
            self.cookie_value
        )
    }

    /// Validate a handshake line and extract the plugin's endpoint.
    ///
    /// Checks, in order: field count, cookie, core version, app version,
    /// frame protocol, and endpoint.
    ///
    /// # Errors
    ///
    /// - [`AppError::IncompatiblePlugin`]: wrong field count, cookie
    ///   mismatch, unknown frame protocol, or bad endpoint.
    /// - [`AppError::UnsupportedProtocolVersion`]: core or app version is
    ///   not a number this host speaks.
    pub fn validate_line(&self, line: &str) -> Result<Endpoint> {
        let fields: Vec<&str> = line.trim().split('|').collect();
        let [core, app, network, address, protocol, cookie] = fields.as_slice() else {
            return Err(AppError::IncompatiblePlugin(format!(
                "unrecognised handshake line (expected 6 fields, got {}): {}",
                fields.len(),
                line.trim()
            )));
        };

        if *cookie != self.cookie_value {
            return Err(AppError::IncompatiblePlugin(
                "magic cookie mismatch; the executable is not a compatible plugin".into(),
            ));
        }

        let core_version = parse_version(core, "core")?;
        if core_version != CORE_PROTOCOL_VERSION {
            return Err(AppError::UnsupportedProtocolVersion(format!(
                "core protocol version {core_version}, host supports {CORE_PROTOCOL_VERSION}"
            )));
        }

        let app_version = parse_version(app, "app")?;
        if app_version != self.protocol_version {
            return Err(AppError::UnsupportedProtocolVersion(format!(
                "plugin protocol version {app_version}, host supports {}",
                self.protocol_version
            )));
        }

        if *protocol != FRAME_PROTOCOL {
            return Err(AppError::IncompatiblePlugin(format!(
                "unsupported frame protocol '{protocol}'"
            )));
        }

        Endpoint::parse(network, address)
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self::cli_plugin()
    }
}

/// Wait for the plugin's handshake line on `stdout` and validate it.
///
/// Blank lines are skipped; the first non-blank line must be the handshake.
///
/// # Errors
///
/// - [`AppError::HandshakeTimeout`]: no line within `timeout`.
/// - [`AppError::ProcessCrashed`]: `stdout` closed before a line arrived.
/// - [`AppError::Io`]: read failure.
/// - Any error from [`HandshakeConfig::validate_line`].
pub async fn read_handshake<R>(
    stdout: &mut R,
    config: &HandshakeConfig,
    timeout: Duration,
) -> Result<Endpoint>
where
    R: AsyncBufRead + Unpin,
{
    let now = tokio::time::Instant::now();
    let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);

    loop {
        let mut line = String::new();
        let n = tokio::time::timeout_at(deadline, stdout.read_line(&mut line))
            .await
            .map_err(|_| {
                AppError::HandshakeTimeout(format!(
                    "plugin did not emit a handshake line within {timeout:?}"
                ))
            })?
            .map_err(|e| AppError::Io(format!("failed to read handshake: {e}")))?;

        if n == 0 {
            return Err(AppError::ProcessCrashed(
                "plugin exited before completing the handshake".into(),
            ));
        }

        if line.trim().is_empty() {
            continue;
        }

        debug!(line = line.trim(), "handshake: line received");
        let endpoint = config.validate_line(&line)?;
        info!(%endpoint, "handshake: plugin accepted");
        return Ok(endpoint);
    }
}

fn parse_version(raw: &str, which: &str) -> Result<u32> {
    raw.trim().parse::<u32>().map_err(|_| {
        AppError::UnsupportedProtocolVersion(format!("non-numeric {which} version '{raw}'"))
    })
}
