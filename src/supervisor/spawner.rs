//! Plugin process launch.
//!
//! [`launch`] spawns the plugin executable with:
//! - `kill_on_drop(true)` so a dropped [`PluginProcess`] never leaves an orphan;
//! - the magic cookie, accepted protocol versions, and log level in its
//!   environment;
//! - a bounded startup window: if no handshake line arrives in time the
//!   process is killed and `AppError::HandshakeTimeout` is returned.
//!
//! Every failure after the spawn kills and reaps the child before the error
//! is returned.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ClientOptions, LogLevel};
use crate::protocol::endpoint::Endpoint;
use crate::protocol::handshake::{read_handshake, HandshakeConfig, LOG_LEVEL_ENV};
use crate::registry::PluginConnection;
use crate::supervisor::logs::spawn_forwarder;
use crate::supervisor::PluginProcess;
use crate::{AppError, Result};

/// How long a child whose stdout closed early gets to report its exit status.
const EXIT_STATUS_WAIT: Duration = Duration::from_millis(500);

/// Configuration for launching one plugin process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Plugin executable.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Cookie and protocol version the plugin must present.
    pub handshake: HandshakeConfig,
    /// Threshold for forwarded plugin logs.
    pub log_level: LogLevel,
    /// Maximum time to wait for the handshake line.
    pub startup_timeout: Duration,
    /// SIGTERM grace period used by [`PluginProcess::kill`].
    pub kill_grace: Duration,
}

impl SpawnConfig {
    /// Launch configuration for a CLI plugin described by `options`.
    #[must_use]
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            command: options.command.clone(),
            args: options.args.clone(),
            handshake: HandshakeConfig::cli_plugin(),
            log_level: options.log_level,
            startup_timeout: options.startup_timeout,
            kill_grace: options.kill_grace,
        }
    }
}

/// Spawn a plugin, complete the handshake, and open its RPC channel.
///
/// # Errors
///
/// - `AppError::Launch`: spawn failure (missing executable, permission
///   denied) or the negotiated endpoint cannot be dialled.
/// - `AppError::HandshakeTimeout`: no handshake line within the window.
/// - `AppError::IncompatiblePlugin`: cookie or format mismatch.
/// - `AppError::UnsupportedProtocolVersion`: version mismatch.
/// - `AppError::ProcessCrashed`: the child exited before the handshake.
pub async fn launch(config: &SpawnConfig) -> Result<PluginProcess> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    for (key, value) in config.handshake.child_env() {
        cmd.env(key, value);
    }
    cmd.env(LOG_LEVEL_ENV, config.log_level.as_str());

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Launch(format!(
            "failed to start plugin '{}': {err}",
            config.command
        ))
    })?;
    let pid = child.id();

    let (Some(stdout_raw), Some(stderr_raw)) = (child.stdout.take(), child.stderr.take()) else {
        let err = AppError::Launch("failed to capture plugin stdio".into());
        return Err(abort(&mut child, err).await);
    };

    // Stderr is drained from the start so a chatty plugin cannot block on a
    // full pipe before it reaches the handshake.
    let log_cancel = CancellationToken::new();
    let stderr_forwarder = spawn_forwarder(
        config.command.clone(),
        "stderr",
        stderr_raw,
        config.log_level,
        log_cancel.clone(),
    );

    let mut stdout = BufReader::new(stdout_raw);
    let endpoint = match negotiate(&mut child, &mut stdout, config).await {
        Ok(endpoint) => endpoint,
        Err(err) => {
            log_cancel.cancel();
            return Err(err);
        }
    };

    info!(
        command = config.command.as_str(),
        pid,
        %endpoint,
        "plugin launched"
    );

    let stdout_forwarder = spawn_forwarder(
        config.command.clone(),
        "stdout",
        stdout,
        config.log_level,
        log_cancel.clone(),
    );

    Ok(PluginProcess::new(
        config.command.clone(),
        child,
        PluginConnection::new(endpoint),
        vec![stderr_forwarder, stdout_forwarder],
        log_cancel,
        config.kill_grace,
    ))
}

/// Run the handshake and probe the endpoint, killing the child on failure.
async fn negotiate(
    child: &mut Child,
    stdout: &mut BufReader<ChildStdout>,
    config: &SpawnConfig,
) -> Result<Endpoint> {
    let endpoint = match read_handshake(stdout, &config.handshake, config.startup_timeout).await {
        Ok(endpoint) => endpoint,
        Err(AppError::ProcessCrashed(msg)) => {
            return Err(match wait_briefly(child).await {
                Some(status) => {
                    AppError::ProcessCrashed(format!("{msg} ({})", describe_exit(status)))
                }
                None => abort(child, AppError::ProcessCrashed(msg)).await,
            });
        }
        Err(err) => return Err(abort(child, err).await),
    };

    if let Err(err) = endpoint.connect().await {
        let err = AppError::Launch(format!("plugin endpoint {endpoint} is unreachable: {err}"));
        return Err(abort(child, err).await);
    }

    Ok(endpoint)
}

/// Kill and reap a partially started child, returning `err` for propagation.
async fn abort(child: &mut Child, err: AppError) -> AppError {
    warn!(pid = child.id(), %err, "plugin launch failed, killing process");
    if let Err(kill_err) = child.kill().await {
        warn!(%kill_err, "failed to kill plugin process");
    }
    err
}

async fn wait_briefly(child: &mut Child) -> Option<ExitStatus> {
    match tokio::time::timeout(EXIT_STATUS_WAIT, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        _ => None,
    }
}

/// Human-readable exit status text.
pub(crate) fn describe_exit(status: ExitStatus) -> String {
    if status.success() {
        "exited normally (code 0)".to_owned()
    } else {
        status.code().map_or_else(
            || "terminated by signal".to_owned(),
            |c| format!("exited with code {c}"),
        )
    }
}
