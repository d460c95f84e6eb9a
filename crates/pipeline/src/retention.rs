//! Age-based deletion across the tiers.
//!
//! Each file is dated by its name when the name is a day key, otherwise by the first record it
//! holds. A file whose date cannot be worked out is never deleted. Temporary files left behind by
//! an interrupted day-file write are dated by their modification time.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Days, Local, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracesync_core::{
  DAY_FILE_HEADER, DayKey, Error, PipelineEvent, PipelineObserver, Record, RetentionConfig, Result, Stage,
};
use tracing::{debug, info};

use crate::dayfile::{is_temp_file, list_files};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
  pub retention_days: u32,
  pub dry_run: bool,
}

impl Default for RetentionPolicy {
  fn default() -> Self {
    Self::from(&RetentionConfig::default())
  }
}

impl From<&RetentionConfig> for RetentionPolicy {
  fn from(config: &RetentionConfig) -> Self {
    Self {
      retention_days: config.retention_days,
      dry_run: config.dry_run,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
  Deleted,
  Retained,
  /// Old enough to delete, left in place because of dry-run.
  WouldDelete,
  UnknownDate,
  DeleteFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweptFile {
  pub path: PathBuf,
  pub effective_date: Option<NaiveDate>,
  #[serde(flatten)]
  pub outcome: SweepOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
  pub cutoff: Option<NaiveDate>,
  pub files: Vec<SweptFile>,
  /// Directories that could not be listed
  pub skipped_dirs: Vec<PathBuf>,
}

impl SweepReport {
  fn count(&self, pred: impl Fn(&SweepOutcome) -> bool) -> usize {
    self.files.iter().filter(|f| pred(&f.outcome)).count()
  }

  pub fn deleted(&self) -> usize {
    self.count(|o| matches!(o, SweepOutcome::Deleted))
  }

  pub fn retained(&self) -> usize {
    self.count(|o| matches!(o, SweepOutcome::Retained))
  }

  pub fn would_delete(&self) -> usize {
    self.count(|o| matches!(o, SweepOutcome::WouldDelete))
  }

  pub fn unknown(&self) -> usize {
    self.count(|o| matches!(o, SweepOutcome::UnknownDate))
  }

  pub fn failed(&self) -> usize {
    self.count(|o| matches!(o, SweepOutcome::DeleteFailed { .. }))
  }
}

/// Oldest date that is still kept: `today - retention_days`.
pub fn cutoff(today: NaiveDate, retention_days: u32) -> NaiveDate {
  today
    .checked_sub_days(Days::new(u64::from(retention_days)))
    .unwrap_or(NaiveDate::MIN)
}

/// The date a file is attributed to for retention.
///
/// Tries the file name as a day key first. Otherwise the content is parsed as a raw record: the
/// first line that is neither blank nor the day-file header, and failing that all lines joined
/// (raw files may wrap).
pub fn effective_date(path: &Path) -> Result<NaiveDate> {
  if let Ok(day) = DayKey::from_path(path) {
    return Ok(day.date());
  }
  if is_temp_file(path) {
    return modified_date(path);
  }

  let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
  let mut data_lines = content
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty() && *line != DAY_FILE_HEADER);

  if let Some(Ok(record)) = data_lines.next().map(Record::parse_raw) {
    return Ok(record.timestamp.date());
  }

  let joined: String = content.lines().collect();
  Record::parse_raw(&joined)
    .map(|record| record.timestamp.date())
    .map_err(|_| Error::UnknownEffectiveDate {
      path: path.to_path_buf(),
    })
}

fn modified_date(path: &Path) -> Result<NaiveDate> {
  let modified = fs::metadata(path)
    .and_then(|m| m.modified())
    .map_err(|e| Error::io(path, e))?;
  Ok(DateTime::<Local>::from(modified).date_naive())
}

/// Delete every file in `dirs` dated before the policy's cutoff.
///
/// Never fails as a whole: unlistable directories, undatable files and failed deletions are
/// reported and the sweep moves on.
pub fn sweep(
  dirs: &[&Path],
  policy: &RetentionPolicy,
  now: NaiveDateTime,
  observer: &dyn PipelineObserver,
) -> SweepReport {
  let cutoff = cutoff(now.date(), policy.retention_days);
  let mut report = SweepReport {
    cutoff: Some(cutoff),
    ..Default::default()
  };

  for dir in dirs {
    let files = match list_files(dir) {
      Ok(files) => files,
      Err(error) => {
        observer.on_event(&PipelineEvent::StageFailed {
          stage: Stage::Sweep,
          error: &error,
        });
        report.skipped_dirs.push(dir.to_path_buf());
        continue;
      }
    };

    for path in files {
      let swept = sweep_file(path, cutoff, policy.dry_run, observer);
      report.files.push(swept);
    }
  }

  info!(
    %cutoff,
    deleted = report.deleted(),
    would_delete = report.would_delete(),
    retained = report.retained(),
    unknown = report.unknown(),
    failed = report.failed(),
    "Retention sweep complete"
  );
  report
}

fn sweep_file(path: PathBuf, cutoff: NaiveDate, dry_run: bool, observer: &dyn PipelineObserver) -> SweptFile {
  let date = match effective_date(&path) {
    Ok(date) => date,
    Err(error) => {
      match error {
        Error::UnknownEffectiveDate { .. } => observer.on_event(&PipelineEvent::UnknownEffectiveDate { path: &path }),
        _ => observer.on_event(&PipelineEvent::RecordSkipped { error: &error }),
      }
      return SweptFile {
        path,
        effective_date: None,
        outcome: SweepOutcome::UnknownDate,
      };
    }
  };

  let outcome = if date >= cutoff {
    debug!(path = %path.display(), %date, "Retained");
    SweepOutcome::Retained
  } else if dry_run {
    observer.on_event(&PipelineEvent::FileDeleted {
      path: &path,
      effective_date: date,
      dry_run: true,
    });
    SweepOutcome::WouldDelete
  } else {
    match fs::remove_file(&path) {
      Ok(()) => {
        observer.on_event(&PipelineEvent::FileDeleted {
          path: &path,
          effective_date: date,
          dry_run: false,
        });
        SweepOutcome::Deleted
      }
      Err(e) => {
        let error = Error::io(&path, e);
        observer.on_event(&PipelineEvent::DeleteFailed {
          path: &path,
          error: &error,
        });
        SweepOutcome::DeleteFailed {
          reason: error.to_string(),
        }
      }
    }
  };

  SweptFile {
    path,
    effective_date: Some(date),
    outcome,
  }
}
