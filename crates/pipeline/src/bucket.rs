//! Day bucketing: raw message files into per-day intermediate files.
//!
//! Raw files are visited in sequence-id order and streamed into the day file of the current
//! cursor day. A new day file is started only when a record's day is strictly later than the
//! cursor, so the stage relies on sequence ids already being chronological. A record that arrives
//! out of order is written into whatever day file is open at that point.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracesync_core::{DayKey, Error, ParseError, PipelineEvent, PipelineObserver, Record, Result};
use tracing::{debug, info, warn};

use crate::dayfile::{DayFileWriter, list_files, read_raw_file};

/// Outcome of one bucketing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BucketReport {
  /// Raw files found in the raw tier
  pub scanned: usize,
  /// Records that reached an intermediate day file on disk
  pub records_written: usize,
  /// Files or records left out (unreadable, malformed, or their day file could not be opened)
  pub skipped: usize,
  /// Day files created this pass, in creation order
  pub days: Vec<DayKey>,
}

/// A raw file paired with the sequence id taken from its name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RawFile {
  pub sequence_id: u64,
  pub path: PathBuf,
}

impl RawFile {
  pub fn from_path(path: PathBuf) -> std::result::Result<Self, ParseError> {
    let stem = path
      .file_stem()
      .and_then(|s| s.to_str())
      .ok_or_else(|| ParseError::SequenceId(path.display().to_string()))?;
    let sequence_id = stem
      .parse::<u64>()
      .map_err(|_| ParseError::SequenceId(stem.to_string()))?;
    Ok(Self { sequence_id, path })
  }
}

/// Order raw files by sequence id. Files without a numeric name are reported and dropped.
pub fn order_raw_files(paths: Vec<PathBuf>, observer: &dyn PipelineObserver) -> Vec<RawFile> {
  let mut raw_files = Vec::new();
  for path in paths {
    match RawFile::from_path(path.clone()) {
      Ok(raw) => raw_files.push(raw),
      Err(e) => {
        let error = Error::parse(path, e);
        observer.on_event(&PipelineEvent::RecordSkipped { error: &error });
      }
    }
  }
  raw_files.sort();
  raw_files
}

/// Rebuild the intermediate day files from every raw file in `raw_dir`.
///
/// Fails only when `raw_dir` cannot be listed. Individual files that cannot be read, parsed or
/// written are reported to `observer` and counted in [`BucketReport::skipped`].
pub fn bucket(raw_dir: &Path, intermediate_dir: &Path, observer: &dyn PipelineObserver) -> Result<BucketReport> {
  let paths = list_files(raw_dir)?;
  let scanned = paths.len();
  let raw_files = order_raw_files(paths, observer);
  let mut report = BucketReport {
    scanned,
    skipped: scanned - raw_files.len(),
    ..Default::default()
  };

  let mut partition = DayPartition::new(intermediate_dir);

  for raw in &raw_files {
    let record = match read_raw_file(&raw.path) {
      Ok(record) => record,
      Err(error) => {
        observer.on_event(&PipelineEvent::RecordSkipped { error: &error });
        report.skipped += 1;
        continue;
      }
    };

    if partition.advance(record.day(), observer) {
      report.days.push(record.day());
    }

    match partition.append(&record) {
      Ok(day) => {
        report.records_written += 1;
        observer.on_event(&PipelineEvent::RecordBucketed {
          sequence_id: raw.sequence_id,
          day,
          sender: &record.sender,
        });
      }
      Err(error) => {
        observer.on_event(&PipelineEvent::RecordSkipped { error: &error });
        report.skipped += 1;
      }
    }
  }

  partition.close();

  info!(
    scanned = report.scanned,
    written = report.records_written,
    skipped = report.skipped,
    days = report.days.len(),
    "Bucketing complete"
  );
  Ok(report)
}

/// The day cursor and the day file currently open for it.
struct DayPartition<'a> {
  dir: &'a Path,
  /// `None` sorts before every real day.
  cursor: Option<DayKey>,
  current: Option<DayFileWriter>,
  /// Why the current day's file could not be opened.
  open_error: Option<String>,
}

impl<'a> DayPartition<'a> {
  fn new(dir: &'a Path) -> Self {
    Self {
      dir,
      cursor: None,
      current: None,
      open_error: None,
    }
  }

  /// Move to `day` if it is later than the cursor. Returns true when a new day file was started.
  fn advance(&mut self, day: DayKey, observer: &dyn PipelineObserver) -> bool {
    if self.cursor.is_some_and(|cursor| day <= cursor) {
      return false;
    }

    self.close();
    self.cursor = Some(day);

    match DayFileWriter::create(self.dir, day) {
      Ok(writer) => {
        observer.on_event(&PipelineEvent::DayFileOpened {
          day,
          path: writer.path(),
        });
        self.current = Some(writer);
        true
      }
      Err(error) => {
        self.open_error = Some(error.to_string());
        observer.on_event(&PipelineEvent::RecordSkipped { error: &error });
        false
      }
    }
  }

  /// Append to the open day file, returning the day it went into.
  ///
  /// A failed write closes the day file; later records for the same day are skipped with the same
  /// reason instead of being written behind a gap.
  fn append(&mut self, record: &Record) -> Result<DayKey> {
    match self.current.as_mut() {
      Some(writer) => match writer.append(record) {
        Ok(()) => Ok(writer.day()),
        Err(error) => {
          self.open_error = Some(error.to_string());
          if let Some(writer) = self.current.take() {
            let day = writer.day();
            let written = writer.abandon();
            warn!(%day, written, "Intermediate day file write failed, closing it");
          }
          Err(error)
        }
      },
      None => {
        let path = self.cursor.map(|day| self.dir.join(day.file_name())).unwrap_or_else(|| self.dir.to_path_buf());
        let reason = self.open_error.clone().unwrap_or_else(|| "no day file open".to_string());
        Err(Error::io(path, std::io::Error::other(reason)))
      }
    }
  }

  fn close(&mut self) {
    self.open_error = None;
    if let Some(writer) = self.current.take() {
      let day = writer.day();
      // Every counted record was flushed by `append`, so a failure here loses nothing counted.
      match writer.finish() {
        Ok(written) => debug!(%day, written, "Closed intermediate day file"),
        Err(error) => warn!(%day, error = %error, "Failed to close intermediate day file"),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;
  use tracesync_core::{CollectingObserver, EventKind};

  fn tiers() -> (TempDir, PathBuf, PathBuf) {
    let temp = TempDir::new().unwrap();
    let raw = temp.path().join("raw");
    let out = temp.path().join("intermediate");
    fs::create_dir_all(&raw).unwrap();
    fs::create_dir_all(&out).unwrap();
    (temp, raw, out)
  }

  fn day_lines(dir: &Path, name: &str) -> Vec<String> {
    fs::read_to_string(dir.join(name))
      .unwrap()
      .lines()
      .map(String::from)
      .collect()
  }

  #[test]
  fn test_raw_file_sequence_id() {
    assert_eq!(RawFile::from_path(PathBuf::from("/raw/42.txt")).unwrap().sequence_id, 42);
    assert!(RawFile::from_path(PathBuf::from("/raw/notes.txt")).is_err());
    assert!(RawFile::from_path(PathBuf::from("/raw/-3.txt")).is_err());
  }

  #[test]
  fn test_orders_by_sequence_id_not_name() {
    let (_temp, raw, _out) = tiers();
    for id in [10, 9, 100, 1] {
      fs::write(raw.join(format!("{}.txt", id)), "").unwrap();
    }
    let observer = CollectingObserver::new();
    let ids: Vec<u64> = order_raw_files(list_files(&raw).unwrap(), &observer)
      .iter()
      .map(|r| r.sequence_id)
      .collect();
    assert_eq!(ids, vec![1, 9, 10, 100]);
  }

  #[test]
  fn test_splits_days() {
    let (_temp, raw, out) = tiers();
    fs::write(raw.join("1.txt"), "a,01,23:50,01/05/2023").unwrap();
    fs::write(raw.join("2.txt"), "b,02,00:10,02/05/2023").unwrap();
    fs::write(raw.join("3.txt"), "c,03,08:00,02/05/2023").unwrap();

    let observer = CollectingObserver::new();
    let report = bucket(&raw, &out, &observer).unwrap();

    assert_eq!(report.records_written, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.days.iter().map(|d| d.to_string()).collect::<Vec<_>>(), vec!["2023.05.01", "2023.05.02"]);
    assert_eq!(day_lines(&out, "2023.05.01.csv"), vec!["Name,Number,Hour,Minute", "a,01,23,50"]);
    assert_eq!(
      day_lines(&out, "2023.05.02.csv"),
      vec!["Name,Number,Hour,Minute", "b,02,00,10", "c,03,08,00"]
    );
  }

  #[test]
  fn test_year_boundary_opens_new_day() {
    let (_temp, raw, out) = tiers();
    fs::write(raw.join("1.txt"), "a,01,12:00,31/12/2022").unwrap();
    fs::write(raw.join("2.txt"), "b,02,12:00,01/01/2023").unwrap();

    let observer = CollectingObserver::new();
    let report = bucket(&raw, &out, &observer).unwrap();
    assert_eq!(report.days.len(), 2);
    assert!(out.join("2023.01.01.csv").exists());
  }

  #[test]
  fn test_out_of_order_record_stays_in_open_day() {
    let (_temp, raw, out) = tiers();
    fs::write(raw.join("1.txt"), "a,01,09:00,02/05/2023").unwrap();
    fs::write(raw.join("2.txt"), "late,02,22:00,01/05/2023").unwrap();

    let observer = CollectingObserver::new();
    let report = bucket(&raw, &out, &observer).unwrap();

    assert_eq!(report.days.len(), 1);
    assert!(!out.join("2023.05.01.csv").exists());
    assert_eq!(
      day_lines(&out, "2023.05.02.csv"),
      vec!["Name,Number,Hour,Minute", "a,01,09,00", "late,02,22,00"]
    );
  }

  #[test]
  fn test_malformed_files_are_skipped() {
    let (_temp, raw, out) = tiers();
    fs::write(raw.join("1.txt"), "Hello,0712345678,09:15").unwrap();
    fs::write(raw.join("2.txt"), "Hi,0798765432,10:05,01/05/2023").unwrap();
    fs::write(raw.join("readme.txt"), "not a message").unwrap();

    let observer = CollectingObserver::new();
    let report = bucket(&raw, &out, &observer).unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.records_written, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(observer.count(EventKind::RecordSkipped), 2);
    assert_eq!(day_lines(&out, "2023.05.01.csv"), vec!["Name,Number,Hour,Minute", "Hi,0798765432,10,05"]);
  }

  #[test]
  fn test_rebucketing_overwrites() {
    let (_temp, raw, out) = tiers();
    fs::write(raw.join("1.txt"), "a,01,09:00,01/05/2023").unwrap();
    let observer = CollectingObserver::new();
    bucket(&raw, &out, &observer).unwrap();
    bucket(&raw, &out, &observer).unwrap();

    assert_eq!(day_lines(&out, "2023.05.01.csv"), vec!["Name,Number,Hour,Minute", "a,01,09,00"]);
  }

  #[test]
  fn test_missing_intermediate_dir_skips_records() {
    let (temp, raw, _out) = tiers();
    fs::write(raw.join("1.txt"), "a,01,09:00,01/05/2023").unwrap();
    fs::write(raw.join("2.txt"), "b,01,10:00,01/05/2023").unwrap();

    let observer = CollectingObserver::new();
    let report = bucket(&raw, &temp.path().join("absent"), &observer).unwrap();
    assert_eq!(report.records_written, 0);
    assert_eq!(report.skipped, 2);
    assert!(report.days.is_empty());
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn test_failed_day_file_write_counts_as_skipped() {
    let (_temp, raw, out) = tiers();
    std::os::unix::fs::symlink("/dev/full", out.join("2023.05.01.csv")).unwrap();
    fs::write(raw.join("1.txt"), "a,01,09:00,01/05/2023").unwrap();
    fs::write(raw.join("2.txt"), "b,02,10:00,01/05/2023").unwrap();
    fs::write(raw.join("3.txt"), "c,03,08:00,02/05/2023").unwrap();

    let observer = CollectingObserver::new();
    let report = bucket(&raw, &out, &observer).unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.records_written, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(observer.count(EventKind::RecordBucketed), 1);
    assert_eq!(observer.count(EventKind::RecordSkipped), 2);
    assert_eq!(day_lines(&out, "2023.05.02.csv"), vec!["Name,Number,Hour,Minute", "c,03,08,00"]);
  }

  #[test]
  fn test_missing_raw_dir_is_error() {
    let (temp, _raw, out) = tiers();
    let observer = CollectingObserver::new();
    assert!(bucket(&temp.path().join("absent"), &out, &observer).is_err());
  }
}
