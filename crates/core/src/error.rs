use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[cfg(windows)]
const ERROR_SHARING_VIOLATION: i32 = 32;
#[cfg(windows)]
const ERROR_LOCK_VIOLATION: i32 = 33;

/// Failure to turn a line of text into a record or key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
  #[error("expected {expected} fields, found {found}")]
  FieldCount { expected: usize, found: usize },

  #[error("invalid time {0:?} (expected HH:mm)")]
  Time(String),

  #[error("invalid date {0:?} (expected dd/MM/yyyy)")]
  Date(String),

  #[error("invalid hour/minute {hour:?}/{minute:?}")]
  HourMinute { hour: String, minute: String },

  #[error("invalid day key {0:?} (expected yyyy.MM.dd)")]
  DayKey(String),

  #[error("invalid sequence id {0:?}")]
  SequenceId(String),

  #[error("{field} contains the field delimiter: {value:?}")]
  Delimiter { field: &'static str, value: String },

  #[error("no data line found")]
  Empty,
}

#[derive(Error, Debug)]
pub enum Error {
  /// Another process holds the file open. Retried on the next cycle.
  #[error("{} is held open by another process: {source}", path.display())]
  ShareViolation { path: PathBuf, source: io::Error },

  #[error("Parse {}: {source}", path.display())]
  Parse { path: PathBuf, source: ParseError },

  #[error("cannot determine the effective date of {}", path.display())]
  UnknownEffectiveDate { path: PathBuf },

  #[error("IO {}: {source}", path.display())]
  Io { path: PathBuf, source: io::Error },

  #[error("Config {}: {message}", path.display())]
  Config { path: PathBuf, message: String },
}

impl Error {
  /// Attach a path to an I/O error, separating sharing violations from real failures.
  pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    let path = path.into();
    if is_share_violation(&source) {
      Error::ShareViolation { path, source }
    } else {
      Error::Io { path, source }
    }
  }

  pub fn parse(path: impl Into<PathBuf>, source: ParseError) -> Self {
    Error::Parse {
      path: path.into(),
      source,
    }
  }

  /// Whether retrying on a later cycle can be expected to succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, Error::ShareViolation { .. })
  }

  pub fn path(&self) -> &Path {
    match self {
      Error::ShareViolation { path, .. }
      | Error::Parse { path, .. }
      | Error::UnknownEffectiveDate { path }
      | Error::Io { path, .. }
      | Error::Config { path, .. } => path,
    }
  }
}

/// Detect the "file is in use by another process" family of OS errors.
pub fn is_share_violation(err: &io::Error) -> bool {
  err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error().is_some_and(is_share_violation_code)
}

#[cfg(windows)]
fn is_share_violation_code(code: i32) -> bool {
  code == ERROR_SHARING_VIOLATION || code == ERROR_LOCK_VIOLATION
}

#[cfg(unix)]
fn is_share_violation_code(code: i32) -> bool {
  code == libc::EBUSY || code == libc::ETXTBSY
}

#[cfg(not(any(unix, windows)))]
fn is_share_violation_code(_code: i32) -> bool {
  false
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_not_found_is_fatal_io() {
    let err = Error::io("/tmp/missing.csv", io::Error::from(io::ErrorKind::NotFound));
    assert!(matches!(err, Error::Io { .. }));
    assert!(!err.is_transient());
    assert_eq!(err.path(), Path::new("/tmp/missing.csv"));
  }

  #[test]
  fn test_would_block_is_share_violation() {
    let err = Error::io("/tmp/locked.csv", io::Error::from(io::ErrorKind::WouldBlock));
    assert!(matches!(err, Error::ShareViolation { .. }));
    assert!(err.is_transient());
  }

  #[cfg(unix)]
  #[test]
  fn test_ebusy_is_share_violation() {
    let err = io::Error::from_raw_os_error(libc::EBUSY);
    assert!(is_share_violation(&err));
    assert!(!is_share_violation(&io::Error::from_raw_os_error(libc::EACCES)));
  }

  #[cfg(windows)]
  #[test]
  fn test_sharing_violation_code() {
    assert!(is_share_violation(&io::Error::from_raw_os_error(32)));
    assert!(!is_share_violation(&io::Error::from_raw_os_error(5)));
  }

  #[test]
  fn test_parse_error_display() {
    let err = Error::parse("1.txt", ParseError::FieldCount { expected: 4, found: 3 });
    assert_eq!(err.to_string(), "Parse 1.txt: expected 4 fields, found 3");
  }
}
