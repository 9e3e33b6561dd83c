//! Host-side plugin client.
//!
//! [`Client`] binds one supervised plugin process to the typed
//! [`CliClient`] dispensed for it. It is what the host CLI uses to run a
//! plugin subcommand:
//!
//! ```text
//! Client::new(options) ── launch ── handshake ── dispense("cli_plugin")
//!        │
//!        ├── exec / exec_simple (any number of calls)
//!        └── kill (exactly once, idempotent)
//! ```
//!
//! Stream failures observed after the plugin process has exited are
//! reported as [`AppError::ProcessCrashed`] so callers can tell a dead
//! plugin apart from a transport hiccup.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{CliClient, ExecOutcome};
use crate::config::ClientOptions;
use crate::protocol::endpoint::Endpoint;
use crate::registry::{cli_plugin_registry, CLI_PLUGIN_TYPE};
use crate::supervisor::spawner::describe_exit;
use crate::supervisor::{launch, PluginProcess, SpawnConfig};
use crate::{AppError, Result};

/// A launched CLI plugin and its dispensed client.
#[derive(Debug)]
pub struct Client {
    command: String,
    pid: Option<u32>,
    endpoint: Endpoint,
    cli: CliClient,
    process: Mutex<PluginProcess>,
}

impl Client {
    /// Launch the plugin described by `options` and dispense its CLI client.
    ///
    /// # Errors
    ///
    /// Any launch or handshake error from [`launch`], or
    /// [`AppError::UnknownPluginType`] if the CLI plugin type is not
    /// registered. The process is killed before a dispense error is returned.
    pub async fn new(options: ClientOptions) -> Result<Self> {
        let spawn = SpawnConfig::from_options(&options);
        let mut process = launch(&spawn).await?;

        let cli = match cli_plugin_registry().dispense(CLI_PLUGIN_TYPE, process.connection()) {
            Ok(cli) => cli.with_call_timeout(options.call_timeout),
            Err(err) => {
                process.kill().await;
                return Err(err);
            }
        };

        debug!(command = options.command.as_str(), "cli plugin dispensed");

        Ok(Self {
            command: options.command,
            pid: process.pid(),
            endpoint: process.endpoint().clone(),
            cli,
            process: Mutex::new(process),
        })
    }

    /// Plugin executable this client launched.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id of the plugin.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Endpoint negotiated during the handshake.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Stream `command` through the plugin using this process's stdio.
    ///
    /// # Errors
    ///
    /// [`AppError::Stream`] for transport failures, or
    /// [`AppError::ProcessCrashed`] when the plugin process has exited.
    pub async fn exec(&self, command: &str, args: &[String]) -> Result<ExecOutcome> {
        let result = self.cli.exec(command, args).await;
        self.classify(result).await
    }

    /// Stream `command` through the plugin using the given streams.
    ///
    /// # Errors
    ///
    /// See [`Client::exec`].
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
        let result = self
            .cli
            .exec_with_io(command, args, stdin, stdout, stderr)
            .await;
        self.classify(result).await
    }

    /// Run `command` through the plugin's unary call.
    ///
    /// # Errors
    ///
    /// [`AppError::Remote`] when the plugin reports an error, otherwise as
    /// for [`Client::exec`].
    pub async fn exec_simple(&self, command: &str, args: &[String]) -> Result<String> {
        let result = self.cli.exec_simple(command, args).await;
        self.classify(result).await
    }

    /// Whether the plugin process is still running.
    pub async fn is_alive(&self) -> bool {
        self.process.lock().await.is_alive()
    }

    /// Terminate the plugin process. Safe to call more than once.
    pub async fn kill(&self) {
        let mut process = self.process.lock().await;
        if !process.is_alive() {
            debug!(command = self.command.as_str(), "kill: plugin already stopped");
        }
        process.kill().await;
    }

    /// Rewrite transport errors as crashes when the process is gone.
    async fn classify<T>(&self, result: Result<T>) -> Result<T> {
        let Err(AppError::Stream(msg)) = result else {
            return result;
        };

        let status = {
            let mut process = self.process.lock().await;
            if process.was_killed() {
                return Err(AppError::Stream(msg));
            }
            match process.exit_status() {
                Some(status) => Some(status),
                None => wait_for_exit(&mut process).await,
            }
        };

        match status {
            Some(status) => {
                let detail = describe_exit(status);
                warn!(
                    command = self.command.as_str(),
                    error = msg.as_str(),
                    detail = detail.as_str(),
                    "plugin process crashed"
                );
                Err(AppError::ProcessCrashed(format!(
                    "plugin '{}' {detail}: {msg}",
                    self.command
                )))
            }
            None => Err(AppError::Stream(msg)),
        }
    }
}

/// Give a dying process a moment to be reaped before classifying.
async fn wait_for_exit(process: &mut PluginProcess) -> Option<std::process::ExitStatus> {
    const POLL: Duration = Duration::from_millis(20);
    const ATTEMPTS: u32 = 10;

    for _ in 0..ATTEMPTS {
        tokio::time::sleep(POLL).await;
        if let Some(status) = process.exit_status() {
            info!(status = %status, "plugin exit observed after stream failure");
            return Some(status);
        }
    }
    None
}
