//! Driver commands

use super::{ensure_no_daemon, print_json};
use crate::logging::current_log_file;
use anyhow::{Context, Result, bail};
use chrono::{Local, Utc};
use daemon::{Daemon, Driver, DriverConfig, DriverExit, Retrieval, pid_file_path, running_pid, source_from_config};
use pipeline::list_files;
use std::sync::Arc;
use tracesync_core::{CollectingObserver, Config, Tee, TracingObserver};
use tracing::info;

/// Run cycles until Ctrl-C, a halted retrieval, or `cycles` cycles
pub async fn cmd_run(config: Config, cycles: Option<u64>) -> Result<()> {
  let daemon = Daemon::new(config).with_max_cycles(cycles);

  info!("Starting tracesync");
  let exit = daemon.run().await.context("Failed to run daemon")?;

  match exit {
    DriverExit::Halted { reason } => bail!("Retrieval halted: {}", reason),
    DriverExit::Completed { cycles } => info!("Completed {} cycles", cycles),
    DriverExit::Cancelled => info!("Stopped"),
  }
  Ok(())
}

/// Run exactly one cycle now
pub async fn cmd_once(config: Config, json: bool) -> Result<()> {
  ensure_no_daemon(&pid_file_path())?;

  let events = Arc::new(CollectingObserver::new());
  let observer = Arc::new(Tee(TracingObserver, Arc::clone(&events)));
  let source = Arc::from(source_from_config(&config.retrieval));
  let driver = Driver::new(DriverConfig::from(&config), source, observer);

  let report = tokio::task::spawn_blocking(move || driver.run_cycle(Local::now().naive_local()))
    .await
    .context("Cycle task failed")?;

  if json {
    print_json(&report, &events)?;
  } else {
    match &report.retrieval {
      Retrieval::Ready => {
        if let Some(bucket) = &report.bucket {
          println!("Bucketed {} records into {} day files", bucket.records_written, bucket.days.len());
        }
        if let Some(merge) = &report.merge {
          println!(
            "Merged {} days ({} deferred, {} failed)",
            merge.days.len(),
            merge.deferred(),
            merge.failed()
          );
        }
        if let Some(sweep) = &report.sweep {
          println!("Swept {} files ({} deleted)", sweep.files.len(), sweep.deleted());
        }
        for failure in &report.failures {
          println!("{} stage failed: {}", failure.stage, failure.reason);
        }
      }
      Retrieval::Skipped { reason } => println!("Retrieval skipped: {}", reason),
      Retrieval::Halted { .. } => {}
    }
  }

  if let Retrieval::Halted { reason } = report.retrieval {
    bail!("Retrieval halted: {}", reason);
  }
  Ok(())
}

/// Show daemon and tier status
pub fn cmd_status(config: &Config) -> Result<()> {
  let pid_path = pid_file_path();
  match running_pid(&pid_path) {
    Some(pid) => println!("Daemon: running (pid {})", pid),
    None => println!("Daemon: not running"),
  }
  println!("Log file: {:?}", current_log_file(&config.daemon, Utc::now()));
  println!();

  let tiers = &config.tiers;
  for (name, dir) in [("raw", &tiers.raw_dir), ("intermediate", &tiers.intermediate_dir), ("viewing", &tiers.viewing_dir)] {
    match list_files(dir) {
      Ok(files) => println!("{:<13} {:>6} files  {:?}", name, files.len(), dir),
      Err(e) => println!("{:<13} {:>6}  {}", name, "-", e),
    }
  }
  Ok(())
}
