//! Logging utilities for CLI commands and the daemon

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracesync_core::{DaemonConfig, default_data_dir};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "tracesync.log";

/// The file the daemon is logging to at `now`.
///
/// Rotating appenders suffix the name with the UTC period (`tracesync.log.2024-01-31` for daily,
/// `tracesync.log.2024-01-31-09` for hourly); only `never` writes to `tracesync.log` itself.
pub fn current_log_file(config: &DaemonConfig, now: DateTime<Utc>) -> PathBuf {
  let name = match config.log_rotation.as_str() {
    "never" => LOG_FILE_NAME.to_string(),
    "hourly" => format!("{}.{}", LOG_FILE_NAME, now.format("%Y-%m-%d-%H")),
    _ => format!("{}.{}", LOG_FILE_NAME, now.format("%Y-%m-%d")),
  };
  default_data_dir().join(name)
}

/// Initialize logging for one-shot commands (stderr only, so `--json` output stays clean)
pub fn init_cli_logging(config: &DaemonConfig) {
  let env_filter = EnvFilter::builder()
    .with_default_directive(parse_log_level(&config.log_level).into())
    .from_env_lossy();

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr)
    .init();
}

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize logging for the daemon.
///
/// In foreground mode: Logs to console only with colors
/// In background mode: Logs to a rolling file in the data directory (no ANSI)
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_daemon_logging(config: &DaemonConfig, foreground: bool) -> Option<WorkerGuard> {
  let level = parse_log_level(&config.log_level);

  // Build env filter (allows RUST_LOG override)
  let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

  if foreground {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_ansi(true)
      .init();
    return None;
  }

  let log_dir = default_data_dir();
  if std::fs::create_dir_all(&log_dir).is_err() {
    // Fall back to console-only logging
    init_cli_logging(config);
    return None;
  }

  let file_appender = match config.log_rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(&log_dir, LOG_FILE_NAME),
    "never" => tracing_appender::rolling::never(&log_dir, LOG_FILE_NAME),
    _ => tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME),
  };

  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}
