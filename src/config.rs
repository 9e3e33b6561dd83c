//! Host configuration: client options, log levels, and the TOML plugin table.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Severity threshold for logs forwarded from a plugin process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Diagnostic detail.
    Debug,
    /// Normal operational messages.
    #[default]
    Info,
    /// Recoverable problems.
    Warn,
    /// Failures.
    Error,
}

impl LogLevel {
    /// Lower-case name, as passed to plugins in `PLUGIN_LOG_LEVEL`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = AppError;

    /// Parse a level name case-insensitively (`"Info"`, `"INFO"`, `"info"`).
    ///
    /// `"warning"` is accepted as an alias for `warn`.
    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(AppError::Config(format!("unknown log level '{other}'"))),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = AppError;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

/// Default window for the plugin to emit its handshake line.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time a plugin gets to exit after SIGTERM before it is force-killed.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Options for launching one plugin process.
///
/// Created by the caller before launch and not mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Minimum level of plugin log lines forwarded to the host logger.
    pub log_level: LogLevel,
    /// Plugin executable path or name resolved via `PATH`.
    pub command: String,
    /// Arguments passed to the plugin executable.
    pub args: Vec<String>,
    /// Maximum time to wait for the handshake line.
    pub startup_timeout: Duration,
    /// Grace period between SIGTERM and force-kill on teardown.
    pub kill_grace: Duration,
    /// Optional deadline applied to each unary call.
    pub call_timeout: Option<Duration>,
}

impl ClientOptions {
    /// Options for `command` with every other field at its default.
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            ..Self::default()
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            command: String::new(),
            args: Vec::new(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
            call_timeout: None,
        }
    }
}

/// One `[plugins.<name>]` entry of the host configuration file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PluginEntry {
    /// Plugin executable.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-plugin override of the global log level.
    #[serde(default)]
    pub log_level: Option<LogLevel>,
}

fn default_startup_timeout_seconds() -> u64 {
    DEFAULT_STARTUP_TIMEOUT.as_secs()
}

fn default_kill_grace_seconds() -> u64 {
    DEFAULT_KILL_GRACE.as_secs()
}

/// Host configuration parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HostConfig {
    /// Default forwarded-log threshold for every plugin.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Handshake window in seconds.
    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,
    /// SIGTERM grace period in seconds.
    #[serde(default = "default_kill_grace_seconds")]
    pub kill_grace_seconds: u64,
    /// Unary call deadline in seconds; 0 means no deadline.
    #[serde(default)]
    pub call_timeout_seconds: u64,
    /// Known plugins keyed by name.
    #[serde(default)]
    pub plugins: HashMap<String, PluginEntry>,
}

impl HostConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build launch options for the plugin registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no plugin with that name is configured.
    pub fn client_options(&self, name: &str) -> Result<ClientOptions> {
        let entry = self
            .plugins
            .get(name)
            .ok_or_else(|| AppError::Config(format!("plugin '{name}' is not configured")))?;

        let mut options = self.command_options(&entry.command, entry.args.clone());
        if let Some(level) = entry.log_level {
            options.log_level = level;
        }
        Ok(options)
    }

    /// Build launch options for an unconfigured plugin executable, using the
    /// global settings of this file.
    #[must_use]
    pub fn command_options(&self, command: &str, args: Vec<String>) -> ClientOptions {
        ClientOptions {
            log_level: self.log_level,
            command: command.to_owned(),
            args,
            startup_timeout: Duration::from_secs(self.startup_timeout_seconds),
            kill_grace: Duration::from_secs(self.kill_grace_seconds),
            call_timeout: (self.call_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.call_timeout_seconds)),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.startup_timeout_seconds == 0 {
            return Err(AppError::Config(
                "startup_timeout_seconds must be greater than zero".into(),
            ));
        }

        for (name, entry) in &self.plugins {
            if entry.command.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "plugin '{name}' must set a non-empty command"
                )));
            }
        }

        Ok(())
    }
}
