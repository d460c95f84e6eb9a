//! Configuration for tracesync.
//!
//! Config priority: `--config <FILE>` > `$CONFIG_DIR/config.toml` > user (~/.config/tracesync/config.toml)
//! > built-in defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Tier Directories
// ============================================================================

/// The three tier directories a record passes through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
  /// One file per retrieved message, deposited by the retrieval collaborator
  pub raw_dir: PathBuf,

  /// Day files rebuilt from the raw tier every cycle
  pub intermediate_dir: PathBuf,

  /// Day files read by the search tool
  pub viewing_dir: PathBuf,
}

impl Default for TierConfig {
  fn default() -> Self {
    let data_dir = default_data_dir();
    Self {
      raw_dir: data_dir.join("raw"),
      intermediate_dir: data_dir.join("intermediate"),
      viewing_dir: data_dir.join("viewing"),
    }
  }
}

impl TierConfig {
  pub fn all(&self) -> [&Path; 3] {
    [&self.raw_dir, &self.intermediate_dir, &self.viewing_dir]
  }
}

// ============================================================================
// Retention Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
  /// Files dated more than this many days ago are deleted (default: 21)
  pub retention_days: u32,

  /// Report what would be deleted without deleting (default: false)
  pub dry_run: bool,
}

impl Default for RetentionConfig {
  fn default() -> Self {
    Self {
      retention_days: 21,
      dry_run: false,
    }
  }
}

// ============================================================================
// Schedule Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
  /// Shortest wait between cycles in seconds (default: 270)
  pub min_interval_secs: u64,

  /// Longest wait between cycles in seconds (default: 330)
  pub max_interval_secs: u64,

  /// How often cancellation is checked while waiting, in milliseconds (default: 1000)
  pub poll_interval_ms: u64,
}

impl Default for ScheduleConfig {
  fn default() -> Self {
    Self {
      min_interval_secs: 270,
      max_interval_secs: 330,
      poll_interval_ms: 1000,
    }
  }
}

impl ScheduleConfig {
  /// Interval bounds, swapped if configured backwards.
  pub fn interval_range(&self) -> (Duration, Duration) {
    let min = Duration::from_secs(self.min_interval_secs.min(self.max_interval_secs));
    let max = Duration::from_secs(self.min_interval_secs.max(self.max_interval_secs));
    (min, max)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(1))
  }
}

// ============================================================================
// Retrieval Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
  /// Command that deposits raw message files before each cycle.
  /// When unset, files are expected to appear in the raw tier on their own.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub command: Option<Vec<String>>,

  /// Seconds the command may run before it is killed and the cycle skipped (default: 120)
  pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
  fn default() -> Self {
    Self {
      command: None,
      timeout_secs: 120,
    }
  }
}

impl RetrievalConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs.max(1))
  }
}

// ============================================================================
// Daemon Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
  /// Log level: error, warn, info, debug, trace (default: info)
  pub log_level: String,

  /// Log file rotation: daily, hourly, never (default: daily)
  pub log_rotation: String,
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self {
      log_level: "info".to_string(),
      log_rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub tiers: TierConfig,
  pub retention: RetentionConfig,
  pub schedule: ScheduleConfig,
  pub retrieval: RetrievalConfig,
  pub daemon: DaemonConfig,
}

impl Config {
  /// Load from an explicit file. Missing or malformed files are errors.
  pub fn load_from(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    toml::from_str(&content).map_err(|e| Error::Config {
      path: path.to_path_buf(),
      message: e.to_string(),
    })
  }

  /// Load the user config, falling back to defaults.
  pub fn load() -> Self {
    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
    {
      match Self::load_from(&user_config_path) {
        Ok(config) => return config,
        Err(e) => tracing::warn!("Ignoring unreadable config: {}", e),
      }
    }

    Self::default()
  }

  /// Load `path` when given, otherwise the user config.
  pub fn resolve(path: Option<&Path>) -> Result<Self> {
    match path {
      Some(path) => Self::load_from(path),
      None => Ok(Self::load()),
    }
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    Some(default_config_dir().join("config.toml"))
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let defaults = Self::default();
    format!(
      r#"# tracesync configuration
# Place in ~/.config/tracesync/config.toml or pass --config <FILE>

# ============================================================================
# Tier Directories (must already exist)
# ============================================================================

[tiers]
raw_dir = "{raw}"
intermediate_dir = "{intermediate}"
viewing_dir = "{viewing}"

# ============================================================================
# Retention
# ============================================================================

[retention]
# Files dated more than this many days ago are deleted
retention_days = {retention_days}

# Only report what would be deleted
dry_run = false

# ============================================================================
# Schedule
# ============================================================================

[schedule]
# Each wait between cycles is picked at random in this range (seconds)
min_interval_secs = {min_interval}
max_interval_secs = {max_interval}

# How often Ctrl-C is checked while waiting (milliseconds)
poll_interval_ms = {poll}

# ============================================================================
# Retrieval
# ============================================================================

[retrieval]
# Command run before every cycle to deposit raw message files.
# Exit status 0 means files are ready; anything else skips the cycle.
# "{{raw_dir}}" in an argument is replaced with the raw tier path, which is
# also passed in the TRACESYNC_RAW_DIR environment variable.
# command = ["pull-messages", "--dest", "{{raw_dir}}"]

# A command still running after this many seconds is killed and the cycle skipped
timeout_secs = {retrieval_timeout}

# ============================================================================
# Daemon
# ============================================================================

[daemon]
# error, warn, info, debug, trace
log_level = "info"

# daily, hourly, never
log_rotation = "daily"
"#,
      raw = toml_path(&defaults.tiers.raw_dir),
      intermediate = toml_path(&defaults.tiers.intermediate_dir),
      viewing = toml_path(&defaults.tiers.viewing_dir),
      retention_days = defaults.retention.retention_days,
      min_interval = defaults.schedule.min_interval_secs,
      max_interval = defaults.schedule.max_interval_secs,
      poll = defaults.schedule.poll_interval_ms,
      retrieval_timeout = defaults.retrieval.timeout_secs,
    )
  }
}

/// Render a path for a TOML basic string.
fn toml_path(path: &Path) -> String {
  path.display().to_string().replace('\\', "\\\\")
}

/// Get the default base path for tracesync data
///
/// Respects the following environment variables (in order of precedence):
/// 1. DATA_DIR - explicit data directory override
/// 2. XDG_DATA_HOME - standard XDG data home directory
/// 3. dirs::data_local_dir() - platform default
pub fn default_data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("DATA_DIR") {
    return PathBuf::from(dir);
  }

  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg_data).join("tracesync");
  }

  dirs::data_local_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("tracesync")
}

/// Get the default config directory
///
/// Respects XDG_CONFIG_HOME, then falls back to dirs::config_dir().
pub fn default_config_dir() -> PathBuf {
  if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
    return PathBuf::from(xdg_config).join("tracesync");
  }

  dirs::config_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("tracesync")
}
