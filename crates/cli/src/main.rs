//! tracesync - keep per-day message files in sync across three storage tiers

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracesync_core::Config;

mod commands;
mod logging;

use commands::{
  cmd_bucket, cmd_config_init, cmd_config_path, cmd_config_show, cmd_merge, cmd_once, cmd_run, cmd_status, cmd_sweep,
};
use logging::{init_cli_logging, init_daemon_logging};

#[derive(Parser)]
#[command(name = "tracesync")]
#[command(about = "Bucket, merge and expire retrieved messages as per-day files")]
#[command(after_help = "\
QUICK START:
  tracesync config init           # Write ~/.config/tracesync/config.toml
  tracesync once                  # Run one cycle now
  tracesync run --foreground      # Run a cycle every 4.5 to 5.5 minutes

SINGLE STAGES:
  tracesync bucket                # raw -> intermediate
  tracesync merge                 # intermediate -> viewing
  tracesync sweep --dry-run       # Show what retention would delete")]
struct Cli {
  /// Config file (default: ~/.config/tracesync/config.toml)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `tracesync config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show current effective configuration
  Show,
  /// Write a commented config file with the defaults
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
  /// Print the config file location
  Path,
}

#[derive(Subcommand)]
enum Commands {
  /// Run cycles until Ctrl-C
  #[command(after_help = "\
Without --foreground, logs go to a rolling file in the data directory.
Ctrl-C stops the loop after the cycle in progress finishes.")]
  Run {
    /// Stop after this many cycles
    #[arg(long, value_name = "N")]
    cycles: Option<u64>,
    /// Log to the console instead of the log file
    #[arg(long)]
    foreground: bool,
  },
  /// Run a single cycle now
  Once {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Rebuild intermediate day files from the raw tier
  Bucket {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Merge intermediate day files into the viewing tier
  Merge {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Delete files older than the retention window
  #[command(after_help = "\
EXAMPLES:
  tracesync sweep --dry-run                  # Preview deletions
  tracesync sweep --dry-run --now 2023-06-01 # Preview as of a given day")]
  Sweep {
    /// Report what would be deleted without deleting
    #[arg(long)]
    dry_run: bool,
    /// Evaluate retention as of this day (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    now: Option<NaiveDate>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Show daemon and tier status
  Status,
  /// Manage configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
  Config::resolve(path).context("Failed to load config")
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let explicit = cli.config.as_deref();

  // `config init` and `config path` must work before a config file exists
  if let Commands::Config { command } = &cli.command {
    match command {
      ConfigCommand::Init { force } => return cmd_config_init(explicit, *force),
      ConfigCommand::Path => return cmd_config_path(explicit),
      ConfigCommand::Show => {}
    }
  }

  let config = load_config(explicit)?;

  // Use file logging for the daemon, stderr for other commands
  let _guard = match &cli.command {
    Commands::Run { foreground, .. } => init_daemon_logging(&config.daemon, *foreground),
    _ => {
      init_cli_logging(&config.daemon);
      None
    }
  };

  match cli.command {
    Commands::Run { cycles, .. } => cmd_run(config, cycles).await,
    Commands::Once { json } => cmd_once(config, json).await,
    Commands::Bucket { json } => cmd_bucket(&config, json),
    Commands::Merge { json } => cmd_merge(&config, json),
    Commands::Sweep { dry_run, now, json } => cmd_sweep(&config, dry_run, now, json),
    Commands::Status => cmd_status(&config),
    Commands::Config { .. } => cmd_config_show(explicit, &config),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory;

  #[test]
  fn test_cli_definition() {
    Cli::command().debug_assert();
  }

  #[test]
  fn test_parse_sweep_flags() {
    let cli = Cli::parse_from(["tracesync", "--config", "/tmp/t.toml", "sweep", "--dry-run", "--now", "2023-05-22"]);
    assert_eq!(cli.config, Some(PathBuf::from("/tmp/t.toml")));
    match cli.command {
      Commands::Sweep { dry_run, now, json } => {
        assert!(dry_run);
        assert!(!json);
        assert_eq!(now, NaiveDate::from_ymd_opt(2023, 5, 22));
      }
      _ => panic!("expected sweep"),
    }
  }

  #[test]
  fn test_global_config_after_subcommand() {
    let cli = Cli::parse_from(["tracesync", "run", "--cycles", "2", "--config", "x.toml"]);
    assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    assert!(matches!(cli.command, Commands::Run { cycles: Some(2), foreground: false }));
  }

  #[test]
  fn test_bad_date_is_rejected() {
    assert!(Cli::try_parse_from(["tracesync", "sweep", "--now", "22/05/2023"]).is_err());
  }

  #[test]
  fn test_explicit_missing_config_is_an_error() {
    let temp = tempfile::TempDir::new().unwrap();
    assert!(load_config(Some(&temp.path().join("missing.toml"))).is_err());
  }
}
