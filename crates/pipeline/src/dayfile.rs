//! Reading and writing tier files.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracesync_core::{DAY_FILE_HEADER, DayKey, Error, PipelineEvent, PipelineObserver, Record, Result};

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

/// Name prefix of the temporary file a day file is written to before it replaces the target.
pub const TEMP_FILE_PREFIX: &str = ".tracesync-";
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Whether `path` is a temporary day file, normally renamed away unless a write was interrupted.
pub fn is_temp_file(path: &Path) -> bool {
  path
    .file_name()
    .and_then(|n| n.to_str())
    .is_some_and(|name| name.starts_with(TEMP_FILE_PREFIX) && name.ends_with(TEMP_FILE_SUFFIX))
}

/// Regular files directly inside `dir`, sorted by name. Sub-directories are ignored.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
  let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
  let mut files = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|e| Error::io(dir, e))?;
    let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
    if is_file {
      files.push(entry.path());
    }
  }
  files.sort();
  Ok(files)
}

/// Read one raw message file. Line breaks inside the file are dropped before parsing.
pub fn read_raw_file(path: &Path) -> Result<Record> {
  let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
  let line: String = content.lines().collect();
  Record::parse_raw(&line).map_err(|e| Error::parse(path, e))
}

/// Read every parsable record of a day file.
///
/// The header line is skipped. Lines that do not parse are reported and left out; they never fail
/// the whole file.
pub fn read_day_file(path: &Path, day: DayKey, observer: &dyn PipelineObserver) -> Result<Vec<Record>> {
  let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
  let mut lines = content.lines().peekable();
  if lines.peek().is_some_and(|first| first.trim() == DAY_FILE_HEADER) {
    lines.next();
  }

  let mut records = Vec::new();
  for line in lines {
    if line.trim().is_empty() {
      continue;
    }
    match Record::parse_day_line(line, day) {
      Ok(record) => records.push(record),
      Err(e) => {
        let error = Error::parse(path, e);
        observer.on_event(&PipelineEvent::RecordSkipped { error: &error });
      }
    }
  }
  Ok(records)
}

/// Replace `path` with a day file holding `records`, in order.
///
/// The content is written to a temporary file next to the target and renamed over it, so readers
/// see either the old file or the new one and a failure leaves the old file untouched.
pub fn write_day_file(path: &Path, records: &[Record]) -> Result<usize> {
  let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
  let mut tmp = tempfile::Builder::new()
    .prefix(TEMP_FILE_PREFIX)
    .suffix(TEMP_FILE_SUFFIX)
    .tempfile_in(dir)
    .map_err(|e| Error::io(dir, e))?;

  {
    let mut writer = BufWriter::new(tmp.as_file_mut());
    write_lines(&mut writer, records).map_err(|e| Error::io(path, e))?;
    writer.flush().map_err(|e| Error::io(path, e))?;
  }
  tmp.as_file().sync_all().map_err(|e| Error::io(path, e))?;
  tmp.persist(path).map_err(|e| Error::io(path, e.error))?;

  Ok(records.len())
}

fn write_lines(writer: &mut impl Write, records: &[Record]) -> std::io::Result<()> {
  write!(writer, "{}{}", DAY_FILE_HEADER, LINE_ENDING)?;
  for record in records {
    write!(writer, "{}{}", record.to_day_line(), LINE_ENDING)?;
  }
  Ok(())
}

/// Streaming writer for one intermediate day file.
pub struct DayFileWriter {
  day: DayKey,
  path: PathBuf,
  writer: BufWriter<File>,
  written: usize,
}

impl DayFileWriter {
  /// Create or truncate `<dir>/<day>.csv` and write the header.
  pub fn create(dir: &Path, day: DayKey) -> Result<Self> {
    let path = dir.join(day.file_name());
    let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
    let mut writer = BufWriter::new(file);
    write!(writer, "{}{}", DAY_FILE_HEADER, LINE_ENDING).map_err(|e| Error::io(&path, e))?;
    Ok(Self {
      day,
      path,
      writer,
      written: 0,
    })
  }

  /// Write one record through to the file. The record only counts once the flush succeeded.
  pub fn append(&mut self, record: &Record) -> Result<()> {
    write!(self.writer, "{}{}", record.to_day_line(), LINE_ENDING).map_err(|e| Error::io(&self.path, e))?;
    self.writer.flush().map_err(|e| Error::io(&self.path, e))?;
    self.written += 1;
    Ok(())
  }

  /// Close after a failed write. Buffered bytes that never reached the file are discarded so they
  /// cannot land later behind records that were counted as skipped.
  pub fn abandon(self) -> usize {
    let (_file, _unwritten) = self.writer.into_parts();
    self.written
  }

  /// Flush and close, returning the number of records appended.
  pub fn finish(mut self) -> Result<usize> {
    self.writer.flush().map_err(|e| Error::io(&self.path, e))?;
    Ok(self.written)
  }

  pub fn day(&self) -> DayKey {
    self.day
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;
  use tracesync_core::{CollectingObserver, EventKind};

  fn record(body: &str, h: u32, m: u32) -> Record {
    let ts = NaiveDate::from_ymd_opt(2023, 5, 1).unwrap().and_hms_opt(h, m, 0).unwrap();
    Record::new(body, "0712345678", ts).unwrap()
  }

  fn day() -> DayKey {
    DayKey::from_ymd(2023, 5, 1).unwrap()
  }

  #[test]
  fn test_write_then_read_day_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(day().file_name());
    let records = vec![record("Hello", 9, 15), record("Hi", 10, 5)];

    assert_eq!(write_day_file(&path, &records).unwrap(), 2);

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines, vec!["Name,Number,Hour,Minute", "Hello,0712345678,09,15", "Hi,0712345678,10,05"]);

    let observer = CollectingObserver::new();
    assert_eq!(read_day_file(&path, day(), &observer).unwrap(), records);
  }

  #[test]
  fn test_write_leaves_no_temp_files() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(day().file_name());
    write_day_file(&path, &[record("a", 1, 0)]).unwrap();
    write_day_file(&path, &[record("b", 2, 0)]).unwrap();

    let files = list_files(temp.path()).unwrap();
    assert_eq!(files, vec![path]);
  }

  #[test]
  fn test_is_temp_file() {
    assert!(is_temp_file(Path::new("/view/.tracesync-a1B2c3.tmp")));
    assert!(!is_temp_file(Path::new("/view/2023.05.01.csv")));
    assert!(!is_temp_file(Path::new("/view/.tracesync-notes")));
  }

  #[test]
  fn test_read_day_file_skips_bad_lines() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(day().file_name());
    fs::write(
      &path,
      "Name,Number,Hour,Minute\nHello,0712345678,09,15\nbroken line\n\nHi,0712345678,25,00\nBye,07,23,59\n",
    )
    .unwrap();

    let observer = CollectingObserver::new();
    let records = read_day_file(&path, day(), &observer).unwrap();
    let bodies: Vec<&str> = records.iter().map(|r| r.body.as_str()).collect();
    assert_eq!(bodies, vec!["Hello", "Bye"]);
    assert_eq!(observer.count(EventKind::RecordSkipped), 2);
  }

  #[test]
  fn test_read_day_file_without_header_keeps_first_line() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(day().file_name());
    fs::write(&path, "Hello,0712345678,09,15\r\n").unwrap();

    let observer = CollectingObserver::new();
    let records = read_day_file(&path, day(), &observer).unwrap();
    assert_eq!(records, vec![record("Hello", 9, 15)]);
  }

  #[test]
  fn test_read_raw_file_joins_lines() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("7.txt");
    fs::write(&path, "Hello,0712345678,\n09:15,01/05/2023\n").unwrap();
    assert_eq!(read_raw_file(&path).unwrap(), record("Hello", 9, 15));
  }

  #[test]
  fn test_read_missing_file_is_io_error() {
    let temp = TempDir::new().unwrap();
    let err = read_raw_file(&temp.path().join("missing.txt")).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
  }

  #[test]
  fn test_list_files_ignores_directories() {
    let temp = TempDir::new().unwrap();
    fs::create_dir(temp.path().join("nested")).unwrap();
    fs::write(temp.path().join("b.txt"), "").unwrap();
    fs::write(temp.path().join("a.txt"), "").unwrap();

    let names: Vec<String> = list_files(temp.path())
      .unwrap()
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
  }

  #[test]
  fn test_day_file_writer_truncates() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(day().file_name());
    fs::write(&path, "stale content\nmore stale content\n").unwrap();

    let mut writer = DayFileWriter::create(temp.path(), day()).unwrap();
    writer.append(&record("Hello", 9, 15)).unwrap();
    assert_eq!(writer.path(), path.as_path());
    assert_eq!(writer.finish().unwrap(), 1);

    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().collect::<Vec<_>>(), vec!["Name,Number,Hour,Minute", "Hello,0712345678,09,15"]);
  }

  #[test]
  fn test_append_is_on_disk_before_finish() {
    let temp = TempDir::new().unwrap();
    let mut writer = DayFileWriter::create(temp.path(), day()).unwrap();
    writer.append(&record("Hello", 9, 15)).unwrap();

    let content = fs::read_to_string(writer.path()).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert_eq!(writer.abandon(), 1);
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn test_append_reports_full_disk() {
    let temp = TempDir::new().unwrap();
    std::os::unix::fs::symlink("/dev/full", temp.path().join(day().file_name())).unwrap();

    let mut writer = DayFileWriter::create(temp.path(), day()).unwrap();
    let err = writer.append(&record("Hello", 9, 15)).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
    assert_eq!(writer.abandon(), 0);
  }
}
