#![forbid(unsafe_code)]

//! `echo-plugin`: reference CLI plugin served over the plugin contract.
//!
//! Streaming subcommands:
//! - `echo ARGS…` prints its arguments joined by spaces;
//! - `cat` copies stdin to stdout until end-of-input;
//! - `warn ARGS…` prints its arguments to stderr;
//! - `fail [CODE]` reports an error on stderr and exits with `CODE` (default 1).
//!
//! Unary subcommands: `echo` and `upper`.

use std::future::Future;
use std::pin::Pin;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use cli_plugin_host::protocol::handshake::LOG_LEVEL_ENV;
use cli_plugin_host::server::{self, CliPlugin, ExecOutput, Invocation, ServeConfig, Transport};
use cli_plugin_host::{AppError, LogLevel, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum Network {
    Tcp,
    Unix,
}

#[derive(Debug, Parser)]
#[command(name = "echo-plugin", about = "Reference CLI plugin", version, long_about = None)]
struct Cli {
    /// Listener to advertise in the handshake.
    #[arg(long, value_enum, default_value_t = Network::Tcp)]
    network: Network,
}

struct EchoPlugin;

impl CliPlugin for EchoPlugin {
    fn exec<'a>(
        &'a self,
        invocation: Invocation,
        mut stdin: mpsc::Receiver<Vec<u8>>,
        output: &'a mut ExecOutput,
    ) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + 'a>> {
        Box::pin(async move {
            debug!(command = invocation.command.as_str(), "exec");
            match invocation.command.as_str() {
                "echo" => {
                    output.stdout(format!("{}\n", invocation.args.join(" "))).await?;
                    Ok(0)
                }
                "cat" => {
                    while let Some(chunk) = stdin.recv().await {
                        output.stdout(chunk).await?;
                    }
                    Ok(0)
                }
                "warn" => {
                    output.stderr(format!("{}\n", invocation.args.join(" "))).await?;
                    Ok(0)
                }
                "fail" => {
                    let code = invocation
                        .args
                        .first()
                        .and_then(|arg| arg.parse::<i32>().ok())
                        .unwrap_or(1);
                    output.stderr(format!("fail: exiting with code {code}\n")).await?;
                    Ok(code)
                }
                other => Err(AppError::Remote(format!("unknown command '{other}'"))),
            }
        })
    }

    fn exec_simple<'a>(
        &'a self,
        command: &'a str,
        args: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            match command {
                "echo" => Ok(args.join(" ")),
                "upper" => Ok(args.join(" ").to_uppercase()),
                other => Err(AppError::Remote(format!("unknown command '{other}'"))),
            }
        })
    }
}

fn main() -> ExitCode {
    let args = Cli::parse();
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("echo-plugin: failed to build tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let config = ServeConfig {
        transport: match args.network {
            Network::Tcp => Transport::Tcp,
            Network::Unix => Transport::Local,
        },
        ..ServeConfig::default()
    };

    match runtime.block_on(server::serve(&config, Arc::new(EchoPlugin))) {
        Ok(()) => {
            info!("echo-plugin exiting");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("echo-plugin: {err}");
            ExitCode::FAILURE
        }
    }
}

/// JSON logs on stderr at the level the host requested.
fn init_tracing() {
    let level = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|raw| raw.parse::<LogLevel>().ok())
        .unwrap_or_default();

    let _ = fmt()
        .with_env_filter(EnvFilter::new(level.as_str()))
        .with_writer(std::io::stderr)
        .json()
        .try_init();
}
