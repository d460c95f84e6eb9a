//! Single-stage commands

use super::{ensure_no_daemon, print_json};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use daemon::pid_file_path;
use pipeline::{MergeOutcome, RetentionPolicy, SweepOutcome};
use tracesync_core::{CollectingObserver, Config, Tee, TracingObserver};

/// Rebuild the intermediate tier from the raw tier
pub fn cmd_bucket(config: &Config, json: bool) -> Result<()> {
  ensure_no_daemon(&pid_file_path())?;
  let events = CollectingObserver::new();
  let observer = Tee(TracingObserver, &events);
  let tiers = &config.tiers;

  let report = pipeline::bucket(&tiers.raw_dir, &tiers.intermediate_dir, &observer).context("Bucketing failed")?;

  if json {
    return print_json(&report, &events);
  }

  println!(
    "Bucketed {} of {} raw files into {} day files ({} skipped)",
    report.records_written,
    report.scanned,
    report.days.len(),
    report.skipped
  );
  for day in &report.days {
    println!("  {}", day.file_name());
  }
  Ok(())
}

/// Merge the intermediate tier into the viewing tier
pub fn cmd_merge(config: &Config, json: bool) -> Result<()> {
  ensure_no_daemon(&pid_file_path())?;
  let events = CollectingObserver::new();
  let observer = Tee(TracingObserver, &events);
  let tiers = &config.tiers;

  let report = pipeline::merge(&tiers.intermediate_dir, &tiers.viewing_dir, &observer).context("Merge failed")?;

  if json {
    return print_json(&report, &events);
  }

  if report.days.is_empty() {
    println!("No intermediate day files to merge");
    return Ok(());
  }

  for day in &report.days {
    match &day.outcome {
      MergeOutcome::Created { written } => println!("  {}  created, {} records", day.day, written),
      MergeOutcome::Merged { written, added } => {
        println!("  {}  {} new, {} records", day.day, added, written)
      }
      MergeOutcome::Deferred { reason } => println!("  {}  deferred: {}", day.day, reason),
      MergeOutcome::Failed { reason } => println!("  {}  FAILED: {}", day.day, reason),
    }
  }
  println!(
    "Merged {} days ({} deferred, {} failed)",
    report.days.len(),
    report.deferred(),
    report.failed()
  );
  Ok(())
}

/// Delete files older than the retention window from every tier
pub fn cmd_sweep(config: &Config, dry_run: bool, now: Option<NaiveDate>, json: bool) -> Result<()> {
  let events = CollectingObserver::new();
  let observer = Tee(TracingObserver, &events);

  let mut policy = RetentionPolicy::from(&config.retention);
  policy.dry_run |= dry_run;
  if !policy.dry_run {
    ensure_no_daemon(&pid_file_path())?;
  }
  let now = sweep_time(now);

  let report = pipeline::sweep(&config.tiers.all(), &policy, now, &observer);

  if json {
    return print_json(&report, &events);
  }

  for file in &report.files {
    let label = match &file.outcome {
      SweepOutcome::Deleted => "deleted".to_string(),
      SweepOutcome::WouldDelete => "would delete".to_string(),
      SweepOutcome::UnknownDate => "kept (date unknown)".to_string(),
      SweepOutcome::DeleteFailed { reason } => format!("FAILED: {}", reason),
      SweepOutcome::Retained => continue,
    };
    println!("  {}  {}", label, file.path.display());
  }

  let cutoff = report.cutoff.map(|d| d.to_string()).unwrap_or_default();
  if policy.dry_run {
    println!(
      "Dry run: {} files older than {} would be deleted, {} kept",
      report.would_delete(),
      cutoff,
      report.retained() + report.unknown()
    );
  } else {
    println!(
      "Deleted {} files older than {}, {} kept, {} failed",
      report.deleted(),
      cutoff,
      report.retained() + report.unknown(),
      report.failed()
    );
  }
  Ok(())
}

/// `--now` pins the sweep to the start of that day instead of the current local time.
fn sweep_time(now: Option<NaiveDate>) -> NaiveDateTime {
  match now {
    Some(date) => date.and_time(chrono::NaiveTime::MIN),
    None => Local::now().naive_local(),
  }
}
