#![forbid(unsafe_code)]

//! Host-side runtime for out-of-process CLI subcommand plugins.
//!
//! A plugin is a separate executable. The host launches it, verifies a
//! one-line handshake, and then talks to it over newline-delimited JSON
//! streams:
//!
//! - [`supervisor`]: process launch, log forwarding, termination.
//! - [`protocol`]: handshake, framing, wire messages, endpoints.
//! - [`registry`]: plugin-type registry and dispense.
//! - [`client`]: the typed CLI client (`exec`, `exec_simple`).
//! - [`host`]: [`Client`], tying one process to its dispensed client.
//! - [`server`]: the plugin side of the same contract.

pub mod client;
pub mod config;
pub mod errors;
pub mod host;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod supervisor;

pub use config::{ClientOptions, HostConfig, LogLevel};
pub use errors::{AppError, Result};
pub use host::Client;
