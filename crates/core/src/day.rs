//! Calendar-day keys used to name day files.

use crate::error::ParseError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Extension of every day file, without the dot.
pub const DAY_FILE_EXTENSION: &str = "csv";

/// A calendar day, rendered as `yyyy.MM.dd`.
///
/// Ordering follows the calendar, which is the same as comparing year and then day of year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(NaiveDate);

impl DayKey {
  pub fn new(date: NaiveDate) -> Self {
    Self(date)
  }

  pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
    NaiveDate::from_ymd_opt(year, month, day).map(Self)
  }

  pub fn date(&self) -> NaiveDate {
    self.0
  }

  pub fn year(&self) -> i32 {
    self.0.year()
  }

  pub fn ordinal(&self) -> u32 {
    self.0.ordinal()
  }

  /// `yyyy.MM.dd.csv`
  pub fn file_name(&self) -> String {
    format!("{}.{}", self, DAY_FILE_EXTENSION)
  }

  /// Parse the key out of a file's base name (extension ignored).
  pub fn from_path(path: &Path) -> Result<Self, ParseError> {
    let stem = path
      .file_stem()
      .and_then(|s| s.to_str())
      .ok_or_else(|| ParseError::DayKey(path.display().to_string()))?;
    stem.parse()
  }

  /// Like [`DayKey::from_path`] but also requires the `.csv` extension.
  pub fn from_day_file(path: &Path) -> Result<Self, ParseError> {
    let is_csv = path
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|e| e.eq_ignore_ascii_case(DAY_FILE_EXTENSION));
    if !is_csv {
      return Err(ParseError::DayKey(path.display().to_string()));
    }
    Self::from_path(path)
  }
}

impl From<NaiveDate> for DayKey {
  fn from(date: NaiveDate) -> Self {
    Self(date)
  }
}

impl fmt::Display for DayKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.format("%Y.%m.%d"))
  }
}

impl FromStr for DayKey {
  type Err = ParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let err = || ParseError::DayKey(s.to_string());
    let mut parts = s.split('.');
    let (Some(year), Some(month), Some(day), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
      return Err(err());
    };
    if !is_digits(year, 4) || !is_digits(month, 2) || !is_digits(day, 2) {
      return Err(err());
    }
    let year = year.parse().map_err(|_| err())?;
    let month = month.parse().map_err(|_| err())?;
    let day = day.parse().map_err(|_| err())?;
    Self::from_ymd(year, month, day).ok_or_else(err)
  }
}

impl Serialize for DayKey {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for DayKey {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

/// True when `s` is exactly `len` ASCII digits.
pub(crate) fn is_digits(s: &str, len: usize) -> bool {
  s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}
