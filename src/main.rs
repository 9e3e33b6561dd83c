#![forbid(unsafe_code)]

//! `cli-plugin-host`: runs subcommands provided by out-of-process plugins.
//!
//! Resolves the plugin from the configuration file (or treats the name as an
//! executable path), launches it, relays one subcommand, and tears the
//! plugin down again.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use cli_plugin_host::{AppError, Client, ClientOptions, HostConfig, LogLevel, Result};

/// Time blocked stdin readers get to finish when the runtime shuts down.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "cli-plugin-host",
    about = "Run subcommands provided by CLI plugins",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file listing known plugins.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured log level for host and plugin logs.
    #[arg(long)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a subcommand with stdin, stdout, and stderr relayed live.
    Exec {
        /// Configured plugin name, or a path to the plugin executable.
        plugin: String,
        /// Subcommand to run inside the plugin.
        command: String,
        /// Arguments passed to the subcommand.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run a subcommand and print its collected output.
    ExecSimple {
        /// Configured plugin name, or a path to the plugin executable.
        plugin: String,
        /// Subcommand to run inside the plugin.
        command: String,
        /// Arguments passed to the subcommand.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let config = match args.config.as_deref().map(HostConfig::load_from_path).transpose() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let log_level = args
        .log_level
        .or_else(|| config.as_ref().map(|c| c.log_level))
        .unwrap_or_default();
    if let Err(err) = init_tracing(args.log_format, log_level) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to build tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(args.command, config.as_ref(), args.log_level));
    // A blocking stdin read cannot be cancelled; do not wait for it.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    match result {
        Ok(code) => code,
        Err(err) => {
            error!(%err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    command: Command,
    config: Option<&HostConfig>,
    log_level: Option<LogLevel>,
) -> Result<ExitCode> {
    let (plugin, subcommand, args, simple) = match command {
        Command::Exec {
            plugin,
            command,
            args,
        } => (plugin, command, args, false),
        Command::ExecSimple {
            plugin,
            command,
            args,
        } => (plugin, command, args, true),
    };

    let mut options = resolve_plugin(config, &plugin)?;
    if let Some(level) = log_level {
        options.log_level = level;
    }

    let client = Client::new(options).await.map_err(|err| {
        if err.is_launch_error() {
            AppError::Launch(format!(
                "could not start plugin '{plugin}'; check that it is installed and built \
                 for this host ({err})"
            ))
        } else {
            err
        }
    })?;
    info!(plugin = plugin.as_str(), pid = client.pid(), "plugin ready");

    let result = if simple {
        client
            .exec_simple(&subcommand, &args)
            .await
            .map(|output| {
                print!("{output}");
                ExitCode::SUCCESS
            })
    } else {
        client
            .exec(&subcommand, &args)
            .await
            .map(|outcome| exit_code(outcome.exit_code))
    };

    client.kill().await;
    result
}

/// Launch options for a configured plugin, or for an executable path.
fn resolve_plugin(config: Option<&HostConfig>, plugin: &str) -> Result<ClientOptions> {
    match config {
        Some(config) if config.plugins.contains_key(plugin) => config.client_options(plugin),
        Some(config) => Ok(config.command_options(plugin, Vec::new())),
        None => Ok(ClientOptions::new(plugin, Vec::new())),
    }
}

fn exit_code(code: Option<i32>) -> ExitCode {
    match code {
        None | Some(0) => ExitCode::SUCCESS,
        Some(code) => u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from),
    }
}

fn init_tracing(log_format: LogFormat, level: LogLevel) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
