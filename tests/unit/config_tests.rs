//! Unit tests for host configuration parsing and client options.

use std::io::Write;
use std::time::Duration;

use cli_plugin_host::config::{DEFAULT_KILL_GRACE, DEFAULT_STARTUP_TIMEOUT};
use cli_plugin_host::{AppError, ClientOptions, HostConfig, LogLevel};

const SAMPLE: &str = r#"
log_level = "debug"
startup_timeout_seconds = 5
kill_grace_seconds = 1
call_timeout_seconds = 30

[plugins.nr1]
command = "/usr/local/bin/nr1-plugin"
args = ["--network", "unix"]

[plugins.quiet]
command = "quiet-plugin"
log_level = "error"
"#;

#[test]
fn parses_full_config() {
    let config = HostConfig::from_toml_str(SAMPLE).expect("valid config");

    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.startup_timeout_seconds, 5);
    assert_eq!(config.kill_grace_seconds, 1);
    assert_eq!(config.plugins.len(), 2);
}

#[test]
fn empty_config_uses_defaults() {
    let config = HostConfig::from_toml_str("").expect("empty config is valid");

    assert_eq!(config.log_level, LogLevel::Info);
    assert_eq!(config.startup_timeout_seconds, DEFAULT_STARTUP_TIMEOUT.as_secs());
    assert_eq!(config.kill_grace_seconds, DEFAULT_KILL_GRACE.as_secs());
    assert_eq!(config.call_timeout_seconds, 0);
    assert!(config.plugins.is_empty());
}

#[test]
fn client_options_combine_global_and_plugin_settings() {
    let config = HostConfig::from_toml_str(SAMPLE).expect("valid config");

    let options = config.client_options("nr1").expect("nr1 is configured");
    assert_eq!(options.command, "/usr/local/bin/nr1-plugin");
    assert_eq!(options.args, vec!["--network".to_owned(), "unix".to_owned()]);
    assert_eq!(options.log_level, LogLevel::Debug);
    assert_eq!(options.startup_timeout, Duration::from_secs(5));
    assert_eq!(options.kill_grace, Duration::from_secs(1));
    assert_eq!(options.call_timeout, Some(Duration::from_secs(30)));

    let quiet = config.client_options("quiet").expect("quiet is configured");
    assert_eq!(quiet.log_level, LogLevel::Error, "per-plugin level wins");
}

#[test]
fn zero_call_timeout_means_no_deadline() {
    let config = HostConfig::from_toml_str("[plugins.p]\ncommand = \"p\"\n").expect("valid");
    let options = config.client_options("p").expect("configured");
    assert_eq!(options.call_timeout, None);
}

#[test]
fn unknown_plugin_name_is_a_config_error() {
    let config = HostConfig::from_toml_str(SAMPLE).expect("valid config");
    let result = config.client_options("missing");
    assert!(
        matches!(result, Err(AppError::Config(ref msg)) if msg.contains("'missing'")),
        "got {result:?}"
    );
}

#[test]
fn zero_startup_timeout_is_rejected() {
    let result = HostConfig::from_toml_str("startup_timeout_seconds = 0");
    assert!(
        matches!(result, Err(AppError::Config(ref msg)) if msg.contains("startup_timeout_seconds")),
        "got {result:?}"
    );
}

#[test]
fn blank_plugin_command_is_rejected() {
    let result = HostConfig::from_toml_str("[plugins.bad]\ncommand = \"  \"\n");
    assert!(
        matches!(result, Err(AppError::Config(ref msg)) if msg.contains("'bad'")),
        "got {result:?}"
    );
}

#[test]
fn invalid_toml_is_a_config_error() {
    let result = HostConfig::from_toml_str("log_level = ");
    assert!(matches!(result, Err(AppError::Config(_))), "got {result:?}");
}

#[test]
fn unknown_log_level_in_toml_is_rejected() {
    let result = HostConfig::from_toml_str("log_level = \"loud\"");
    assert!(matches!(result, Err(AppError::Config(_))), "got {result:?}");
}

#[test]
fn log_level_in_toml_is_case_insensitive() {
    let raw = r#"
log_level = "INFO"

[plugins.loud]
command = "loud-plugin"
log_level = "Warning"
"#;
    let config = HostConfig::from_toml_str(raw).expect("mixed-case levels load");

    assert_eq!(config.log_level, LogLevel::Info);
    assert_eq!(config.plugins["loud"].log_level, Some(LogLevel::Warn));
}

#[test]
fn command_options_carry_every_global_setting() {
    let config = HostConfig::from_toml_str(SAMPLE).expect("valid config");

    let options = config.command_options("./target/debug/echo-plugin", Vec::new());
    assert_eq!(options.command, "./target/debug/echo-plugin");
    assert!(options.args.is_empty());
    assert_eq!(options.log_level, LogLevel::Debug);
    assert_eq!(options.startup_timeout, Duration::from_secs(5));
    assert_eq!(options.kill_grace, Duration::from_secs(1));
    assert_eq!(options.call_timeout, Some(Duration::from_secs(30)));
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(SAMPLE.as_bytes()).expect("write config");

    let config = HostConfig::load_from_path(file.path()).expect("load config");
    assert!(config.plugins.contains_key("nr1"));
}

#[test]
fn missing_file_is_a_config_error() {
    let result = HostConfig::load_from_path("/nonexistent/cli-plugin-host.toml");
    assert!(
        matches!(result, Err(AppError::Config(ref msg)) if msg.contains("failed to read config")),
        "got {result:?}"
    );
}

#[test]
fn log_level_parses_case_insensitively() {
    assert_eq!("INFO".parse::<LogLevel>().ok(), Some(LogLevel::Info));
    assert_eq!("Warning".parse::<LogLevel>().ok(), Some(LogLevel::Warn));
    assert_eq!(" trace ".parse::<LogLevel>().ok(), Some(LogLevel::Trace));
    assert!("verbose".parse::<LogLevel>().is_err());
}

#[test]
fn log_levels_order_by_severity() {
    assert!(LogLevel::Trace < LogLevel::Debug);
    assert!(LogLevel::Warn < LogLevel::Error);
    assert_eq!(LogLevel::Warn.to_string(), "warn");
}

#[test]
fn client_options_defaults() {
    let options = ClientOptions::new("plugin", vec!["--x".to_owned()]);
    assert_eq!(options.command, "plugin");
    assert_eq!(options.log_level, LogLevel::Info);
    assert_eq!(options.startup_timeout, DEFAULT_STARTUP_TIMEOUT);
    assert_eq!(options.kill_grace, DEFAULT_KILL_GRACE);
    assert_eq!(options.call_timeout, None);
}
