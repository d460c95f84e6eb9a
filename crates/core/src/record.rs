//! One message record and its two line formats.
//!
//! Raw files hold `body,sender,HH:mm,dd/MM/yyyy`. Day files hold a header followed by
//! `body,sender,HH,mm` lines; the date comes from the day file's name. Fields are never quoted or
//! escaped, so a body or sender containing [`DELIMITER`] cannot be represented.

use crate::day::{DayKey, is_digits};
use crate::error::ParseError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;

pub const DELIMITER: char = ',';

/// Number of fields in both the raw and the day-file line formats.
pub const FIELD_COUNT: usize = 4;

/// First line of every day file.
///
/// The column names do not describe the fields (body, sender, hour, minute). The downstream
/// search tool expects this exact line, so it stays as is.
pub const DAY_FILE_HEADER: &str = "Name,Number,Hour,Minute";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
  pub body: String,
  pub sender: String,
  /// Local wall-clock time, minute precision.
  pub timestamp: NaiveDateTime,
}

impl Record {
  /// Build a record, rejecting values that would corrupt the line format.
  pub fn new(
    body: impl Into<String>,
    sender: impl Into<String>,
    timestamp: NaiveDateTime,
  ) -> Result<Self, ParseError> {
    let body = body.into();
    let sender = sender.into();
    if body.contains(DELIMITER) {
      return Err(ParseError::Delimiter { field: "body", value: body });
    }
    if sender.contains(DELIMITER) {
      return Err(ParseError::Delimiter {
        field: "sender",
        value: sender,
      });
    }
    let timestamp = timestamp.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(timestamp);
    Ok(Self { body, sender, timestamp })
  }

  /// Parse the content of a raw message file: `body,sender,HH:mm,dd/MM/yyyy`.
  pub fn parse_raw(line: &str) -> Result<Self, ParseError> {
    let [body, sender, time, date] = split_fields(line)?;
    let time = parse_clock(time)?;
    let date = parse_slash_date(date)?;
    Ok(Self {
      body: body.to_string(),
      sender: sender.to_string(),
      timestamp: date.and_time(time),
    })
  }

  /// Parse a day-file data line: `body,sender,HH,mm`.
  pub fn parse_day_line(line: &str, day: DayKey) -> Result<Self, ParseError> {
    let [body, sender, hour, minute] = split_fields(line)?;
    let time = parse_hour_minute(hour, minute)?;
    Ok(Self {
      body: body.to_string(),
      sender: sender.to_string(),
      timestamp: day.date().and_time(time),
    })
  }

  /// Serialize as a day-file line, `body,sender,HH,mm` on a 24 hour clock.
  pub fn to_day_line(&self) -> String {
    format!(
      "{}{d}{}{d}{:02}{d}{:02}",
      self.body,
      self.sender,
      self.timestamp.hour(),
      self.timestamp.minute(),
      d = DELIMITER
    )
  }

  /// Serialize in the raw message file layout.
  pub fn to_raw_line(&self) -> String {
    format!(
      "{}{d}{}{d}{}{d}{}",
      self.body,
      self.sender,
      self.timestamp.format("%H:%M"),
      self.timestamp.format("%d/%m/%Y"),
      d = DELIMITER
    )
  }

  pub fn day(&self) -> DayKey {
    DayKey::new(self.timestamp.date())
  }

  /// Two records with equal keys are the same message as far as merging goes.
  ///
  /// Only the body counts. Sender and time are ignored, so identical wording from two senders on
  /// the same day collapses into one record.
  pub fn dedup_key(&self) -> &str {
    &self.body
  }
}

fn split_fields(line: &str) -> Result<[&str; FIELD_COUNT], ParseError> {
  let fields: Vec<&str> = line.split(DELIMITER).map(str::trim).collect();
  <[&str; FIELD_COUNT]>::try_from(fields).map_err(|fields| ParseError::FieldCount {
    expected: FIELD_COUNT,
    found: fields.len(),
  })
}

fn parse_clock(value: &str) -> Result<NaiveTime, ParseError> {
  let err = || ParseError::Time(value.to_string());
  let (hour, minute) = value.split_once(':').ok_or_else(err)?;
  if !is_digits(hour, 2) || !is_digits(minute, 2) {
    return Err(err());
  }
  let hour = hour.parse().map_err(|_| err())?;
  let minute = minute.parse().map_err(|_| err())?;
  NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(err)
}

fn parse_slash_date(value: &str) -> Result<NaiveDate, ParseError> {
  let err = || ParseError::Date(value.to_string());
  let mut parts = value.split('/');
  let (Some(day), Some(month), Some(year), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
    return Err(err());
  };
  if !is_digits(day, 2) || !is_digits(month, 2) || !is_digits(year, 4) {
    return Err(err());
  }
  let day = day.parse().map_err(|_| err())?;
  let month = month.parse().map_err(|_| err())?;
  let year = year.parse().map_err(|_| err())?;
  NaiveDate::from_ymd_opt(year, month, day).ok_or_else(err)
}

fn parse_hour_minute(hour: &str, minute: &str) -> Result<NaiveTime, ParseError> {
  let err = || ParseError::HourMinute {
    hour: hour.to_string(),
    minute: minute.to_string(),
  };
  if !is_digits(hour, 2) || !is_digits(minute, 2) {
    return Err(err());
  }
  let h = hour.parse().map_err(|_| err())?;
  let m = minute.parse().map_err(|_| err())?;
  NaiveTime::from_hms_opt(h, m, 0).ok_or_else(err)
}
