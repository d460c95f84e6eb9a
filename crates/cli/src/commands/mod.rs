//! CLI command implementations

mod config;
mod run;
mod stages;

pub use config::{cmd_config_init, cmd_config_path, cmd_config_show};
pub use run::{cmd_once, cmd_run, cmd_status};
pub use stages::{cmd_bucket, cmd_merge, cmd_sweep};

use anyhow::{Result, bail};
use daemon::running_pid;
use serde::Serialize;
use std::path::Path;
use tracesync_core::{CollectingObserver, EventKind};

#[derive(Serialize)]
struct JsonEvent {
  kind: EventKind,
  message: String,
}

#[derive(Serialize)]
struct JsonOutput<'a, T: Serialize> {
  report: &'a T,
  events: Vec<JsonEvent>,
}

/// Print a report together with the events collected while producing it.
fn print_json<T: Serialize>(report: &T, events: &CollectingObserver) -> Result<()> {
  let output = JsonOutput {
    report,
    events: events
      .events()
      .into_iter()
      .map(|(kind, message)| JsonEvent { kind, message })
      .collect(),
  };
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

/// Refuse to touch the tiers while a daemon is cycling over them.
fn ensure_no_daemon(pid_path: &Path) -> Result<()> {
  if let Some(pid) = running_pid(pid_path) {
    bail!(
      "tracesync daemon is running (pid {}); stop it before running stages by hand",
      pid
    );
  }
  Ok(())
}
