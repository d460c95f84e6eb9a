//! Merge intermediate day files into the viewing tier.
//!
//! The viewing file for a day only ever grows: its existing records are kept as they are, and an
//! intermediate record is added when no record with the same body is present yet. Running the
//! merge again with the same input changes nothing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracesync_core::{DayKey, Error, PipelineEvent, PipelineObserver, Record, Result};
use tracing::info;

use crate::dayfile::{list_files, read_day_file, write_day_file};

/// Result of folding incoming records into an existing list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRecords {
  /// Union sorted by timestamp; ties keep their earlier relative order
  pub records: Vec<Record>,
  /// Incoming records that were not already present
  pub added: usize,
}

/// Append every `incoming` record whose dedup key is not yet in `existing`, then sort by time.
///
/// Records already in `existing` are never dropped, even if two of them share a key.
pub fn merge_records(existing: Vec<Record>, incoming: Vec<Record>) -> MergedRecords {
  let mut seen: HashSet<String> = existing.iter().map(|r| r.dedup_key().to_string()).collect();
  let mut records = existing;
  let mut added = 0;

  for record in incoming {
    if seen.insert(record.dedup_key().to_string()) {
      records.push(record);
      added += 1;
    }
  }

  records.sort_by_key(|r| r.timestamp);
  MergedRecords { records, added }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
  /// No viewing file existed; one was written from the intermediate records.
  Created { written: usize },
  /// The viewing file was rewritten with the union.
  Merged { written: usize, added: usize },
  /// Another process had a file open. Nothing was written; retried next cycle.
  Deferred { reason: String },
  /// Nothing was written for this day.
  Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayMerge {
  pub day: DayKey,
  #[serde(flatten)]
  pub outcome: MergeOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
  pub days: Vec<DayMerge>,
}

impl MergeReport {
  pub fn written(&self) -> usize {
    self
      .days
      .iter()
      .map(|d| match d.outcome {
        MergeOutcome::Created { written } | MergeOutcome::Merged { written, .. } => written,
        _ => 0,
      })
      .sum()
  }

  pub fn deferred(&self) -> usize {
    self
      .days
      .iter()
      .filter(|d| matches!(d.outcome, MergeOutcome::Deferred { .. }))
      .count()
  }

  pub fn failed(&self) -> usize {
    self
      .days
      .iter()
      .filter(|d| matches!(d.outcome, MergeOutcome::Failed { .. }))
      .count()
  }
}

/// What [`merge_day`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWrite {
  pub written: usize,
  pub added: usize,
  pub created: bool,
}

/// Merge one intermediate day file into `viewing_dir`.
///
/// Both files are read in full before anything is written, and the viewing file is replaced in a
/// single rename, so an error at any point leaves the viewing file as it was.
pub fn merge_day(
  intermediate_path: &Path,
  viewing_dir: &Path,
  day: DayKey,
  observer: &dyn PipelineObserver,
) -> Result<DayWrite> {
  merge_day_with(intermediate_path, viewing_dir, day, observer, &write_day_file)
}

/// [`merge_day`] with the step that replaces the viewing file supplied by the caller.
///
/// `write` receives the viewing file path and the full merged record list and returns the number
/// of records written. It must leave the previous file in place when it fails.
pub fn merge_day_with<W>(
  intermediate_path: &Path,
  viewing_dir: &Path,
  day: DayKey,
  observer: &dyn PipelineObserver,
  write: &W,
) -> Result<DayWrite>
where
  W: Fn(&Path, &[Record]) -> Result<usize>,
{
  let viewing_path = viewing_dir.join(day.file_name());
  let incoming = read_day_file(intermediate_path, day, observer)?;

  let (existing, created) = if viewing_path.is_file() {
    (read_day_file(&viewing_path, day, observer)?, false)
  } else {
    (Vec::new(), true)
  };

  let merged = merge_records(existing, incoming);
  let written = write(&viewing_path, &merged.records)?;

  Ok(DayWrite {
    written,
    added: merged.added,
    created,
  })
}

/// Merge every intermediate day file into the viewing tier.
///
/// Fails only when `intermediate_dir` cannot be listed. Each day succeeds or fails on its own.
pub fn merge(intermediate_dir: &Path, viewing_dir: &Path, observer: &dyn PipelineObserver) -> Result<MergeReport> {
  merge_with(intermediate_dir, viewing_dir, observer, &write_day_file)
}

/// [`merge`] with a caller-supplied viewing file writer, see [`merge_day_with`].
pub fn merge_with<W>(
  intermediate_dir: &Path,
  viewing_dir: &Path,
  observer: &dyn PipelineObserver,
  write: &W,
) -> Result<MergeReport>
where
  W: Fn(&Path, &[Record]) -> Result<usize>,
{
  let mut report = MergeReport::default();

  for (path, day) in day_files(intermediate_dir, observer)? {
    let outcome = match merge_day_with(&path, viewing_dir, day, observer, write) {
      Ok(write) => {
        observer.on_event(&PipelineEvent::DayMerged {
          day,
          written: write.written,
          added: write.added,
          created: write.created,
        });
        if write.created {
          MergeOutcome::Created { written: write.written }
        } else {
          MergeOutcome::Merged {
            written: write.written,
            added: write.added,
          }
        }
      }
      Err(error) if error.is_transient() => {
        observer.on_event(&PipelineEvent::DayMergeDeferred { day, error: &error });
        MergeOutcome::Deferred {
          reason: error.to_string(),
        }
      }
      Err(error) => {
        observer.on_event(&PipelineEvent::DayMergeFailed { day, error: &error });
        MergeOutcome::Failed {
          reason: error.to_string(),
        }
      }
    };
    report.days.push(DayMerge { day, outcome });
  }

  info!(
    days = report.days.len(),
    written = report.written(),
    deferred = report.deferred(),
    failed = report.failed(),
    "Merge complete"
  );
  Ok(report)
}

/// Day files in `dir`, oldest first. Files not named `yyyy.MM.dd.csv` are reported and skipped.
fn day_files(dir: &Path, observer: &dyn PipelineObserver) -> Result<Vec<(PathBuf, DayKey)>> {
  let mut days = Vec::new();
  for path in list_files(dir)? {
    match DayKey::from_day_file(&path) {
      Ok(day) => days.push((path, day)),
      Err(e) => {
        let error = Error::parse(path, e);
        observer.on_event(&PipelineEvent::RecordSkipped { error: &error });
      }
    }
  }
  days.sort_by_key(|(_, day)| *day);
  Ok(days)
}
