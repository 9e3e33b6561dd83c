//! Plugin process supervision.
//!
//! A [`PluginProcess`] exclusively owns one spawned plugin: the OS process,
//! its log forwarders, and the [`PluginConnection`] negotiated by the
//! handshake. Other components only ever see clones of the connection.
//!
//! - `spawner`: [`launch`]: spawn, handshake, endpoint probe.
//! - `logs`: forwarding of plugin stderr/stdout into the host logger.

pub mod logs;
pub mod spawner;

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::endpoint::Endpoint;
use crate::registry::PluginConnection;

pub use spawner::{launch, SpawnConfig};

/// One running plugin process.
#[derive(Debug)]
pub struct PluginProcess {
    command: String,
    pid: Option<u32>,
    child: Child,
    connection: PluginConnection,
    forwarders: Vec<JoinHandle<()>>,
    log_cancel: CancellationToken,
    kill_grace: Duration,
    exit_status: Option<ExitStatus>,
    killed: bool,
}

impl PluginProcess {
    pub(crate) fn new(
        command: String,
        child: Child,
        connection: PluginConnection,
        forwarders: Vec<JoinHandle<()>>,
        log_cancel: CancellationToken,
        kill_grace: Duration,
    ) -> Self {
        Self {
            command,
            pid: child.id(),
            child,
            connection,
            forwarders,
            log_cancel,
            kill_grace,
            exit_status: None,
            killed: false,
        }
    }

    /// OS process id, captured at launch.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Endpoint negotiated during the handshake.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        self.connection.endpoint()
    }

    /// A handle to the RPC channel for dispensing typed clients.
    #[must_use]
    pub fn connection(&self) -> PluginConnection {
        self.connection.clone()
    }

    /// Exit status if the process has exited, without blocking.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit_status = status,
                Err(err) => warn!(pid = self.pid, %err, "failed to poll plugin process"),
            }
        }
        self.exit_status
    }

    /// Whether the process is still running and has not been killed.
    pub fn is_alive(&mut self) -> bool {
        !self.killed && self.exit_status().is_none()
    }

    /// Whether [`PluginProcess::kill`] has been called.
    #[must_use]
    pub fn was_killed(&self) -> bool {
        self.killed
    }

    /// Terminate the plugin and release its RPC channel.
    ///
    /// Closes the connection, sends SIGTERM (on Unix), waits up to the grace
    /// period, then force-kills. Idempotent, and safe after the process has
    /// already exited.
    pub async fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        self.connection.close();

        if self.exit_status().is_none() {
            self.terminate().await;
        }

        self.log_cancel.cancel();
        for handle in self.forwarders.drain(..) {
            if let Err(err) = handle.await {
                debug!(%err, "log forwarder ended abnormally");
            }
        }

        info!(
            command = self.command.as_str(),
            pid = self.pid,
            status = ?self.exit_status,
            "plugin process stopped"
        );
    }

    async fn terminate(&mut self) {
        if send_sigterm(self.pid) {
            match tokio::time::timeout(self.kill_grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    self.exit_status = Some(status);
                    return;
                }
                Ok(Err(err)) => warn!(pid = self.pid, %err, "error waiting for plugin process"),
                Err(_) => warn!(
                    pid = self.pid,
                    grace = ?self.kill_grace,
                    "plugin did not exit within grace period, forcing kill"
                ),
            }
        }

        if let Err(err) = self.child.kill().await {
            warn!(pid = self.pid, %err, "failed to force-kill plugin process");
        }
        self.exit_status = self.child.try_wait().ok().flatten();
    }
}

impl Drop for PluginProcess {
    fn drop(&mut self) {
        // `kill_on_drop` takes care of the OS process itself.
        self.connection.close();
        self.log_cancel.cancel();
    }
}

#[cfg(unix)]
fn send_sigterm(pid: Option<u32>) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            debug!(pid = raw, %err, "SIGTERM delivery failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: Option<u32>) -> bool {
    false
}
