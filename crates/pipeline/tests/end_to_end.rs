//! Bucketing, merging and sweeping real tier directories.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use pipeline::{MergeOutcome, RetentionPolicy, bucket, merge, sweep};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tracesync_core::{CollectingObserver, EventKind};

struct Tiers {
  _temp: TempDir,
  raw: PathBuf,
  intermediate: PathBuf,
  viewing: PathBuf,
}

impl Tiers {
  fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let raw = temp.path().join("raw");
    let intermediate = temp.path().join("intermediate");
    let viewing = temp.path().join("viewing");
    for dir in [&raw, &intermediate, &viewing] {
      fs::create_dir_all(dir).unwrap();
    }
    Self {
      _temp: temp,
      raw,
      intermediate,
      viewing,
    }
  }

  fn deposit(&self, id: u64, content: &str) {
    fs::write(self.raw.join(format!("{}.txt", id)), content).unwrap();
  }

  fn cycle(&self, observer: &CollectingObserver) {
    bucket(&self.raw, &self.intermediate, observer).unwrap();
    merge(&self.intermediate, &self.viewing, observer).unwrap();
  }
}

fn read(dir: &Path, name: &str) -> String {
  fs::read_to_string(dir.join(name)).unwrap()
}

#[test]
fn test_two_messages_reach_the_viewing_tier() {
  let tiers = Tiers::new();
  tiers.deposit(1, "Hello,0712345678,09:15,01/05/2023");
  tiers.deposit(2, "Hi,0798765432,10:05,01/05/2023");

  let observer = CollectingObserver::new();
  let bucketed = bucket(&tiers.raw, &tiers.intermediate, &observer).unwrap();
  assert_eq!(bucketed.records_written, 2);

  let intermediate = read(&tiers.intermediate, "2023.05.01.csv");
  assert_eq!(
    intermediate.lines().collect::<Vec<_>>(),
    vec!["Name,Number,Hour,Minute", "Hello,0712345678,09,15", "Hi,0798765432,10,05"]
  );

  let merged = merge(&tiers.intermediate, &tiers.viewing, &observer).unwrap();
  assert_eq!(merged.days.len(), 1);
  assert_eq!(merged.days[0].outcome, MergeOutcome::Created { written: 2 });
  assert_eq!(read(&tiers.viewing, "2023.05.01.csv"), intermediate);
}

#[test]
fn test_repeated_cycles_change_nothing() {
  let tiers = Tiers::new();
  tiers.deposit(1, "Hello,0712345678,09:15,01/05/2023");
  tiers.deposit(2, "Hi,0798765432,10:05,01/05/2023");

  let observer = CollectingObserver::new();
  tiers.cycle(&observer);
  let first = read(&tiers.viewing, "2023.05.01.csv");

  tiers.cycle(&observer);
  tiers.cycle(&observer);
  assert_eq!(read(&tiers.viewing, "2023.05.01.csv"), first);

  let report = merge(&tiers.intermediate, &tiers.viewing, &observer).unwrap();
  assert_eq!(report.days[0].outcome, MergeOutcome::Merged { written: 2, added: 0 });
}

#[test]
fn test_new_messages_are_merged_in_time_order() {
  let tiers = Tiers::new();
  tiers.deposit(1, "Hello,0712345678,09:15,01/05/2023");
  let observer = CollectingObserver::new();
  tiers.cycle(&observer);

  // The raw tier is swept independently of the viewing tier, so later cycles may see only new files.
  fs::remove_file(tiers.raw.join("1.txt")).unwrap();
  tiers.deposit(2, "Early,0700000000,07:30,01/05/2023");
  tiers.deposit(3, "Hello,0712345678,09:15,01/05/2023");
  tiers.cycle(&observer);

  assert_eq!(
    read(&tiers.viewing, "2023.05.01.csv").lines().collect::<Vec<_>>(),
    vec!["Name,Number,Hour,Minute", "Early,0700000000,07,30", "Hello,0712345678,09,15"]
  );
}

#[test]
fn test_malformed_raw_file_does_not_block_others() {
  let tiers = Tiers::new();
  tiers.deposit(1, "Hello,0712345678,09:15");
  tiers.deposit(2, "Hi,0798765432,10:05,01/05/2023");
  tiers.deposit(3, "Bye,0798765432,22:40,02/05/2023");

  let observer = CollectingObserver::new();
  tiers.cycle(&observer);

  assert_eq!(observer.count(EventKind::RecordSkipped), 1);
  assert_eq!(
    read(&tiers.viewing, "2023.05.01.csv").lines().collect::<Vec<_>>(),
    vec!["Name,Number,Hour,Minute", "Hi,0798765432,10,05"]
  );
  assert_eq!(
    read(&tiers.viewing, "2023.05.02.csv").lines().collect::<Vec<_>>(),
    vec!["Name,Number,Hour,Minute", "Bye,0798765432,22,40"]
  );
}

#[test]
fn test_failed_day_does_not_block_other_days() {
  let tiers = Tiers::new();
  tiers.deposit(1, "Hi,0798765432,10:05,01/05/2023");
  tiers.deposit(2, "Bye,0798765432,22:40,02/05/2023");
  // A directory where the viewing file should go cannot be replaced by a file.
  fs::create_dir(tiers.viewing.join("2023.05.01.csv")).unwrap();

  let observer = CollectingObserver::new();
  bucket(&tiers.raw, &tiers.intermediate, &observer).unwrap();
  let report = merge(&tiers.intermediate, &tiers.viewing, &observer).unwrap();

  assert!(matches!(report.days[0].outcome, MergeOutcome::Failed { .. }));
  assert_eq!(report.days[1].outcome, MergeOutcome::Created { written: 1 });
  assert_eq!(observer.count(EventKind::DayMergeFailed), 1);
  assert!(tiers.viewing.join("2023.05.01.csv").is_dir());
  assert!(tiers.viewing.join("2023.05.02.csv").is_file());
}

#[cfg(unix)]
#[test]
fn test_unwritable_viewing_tier_keeps_existing_file() {
  use std::os::unix::fs::PermissionsExt;

  let tiers = Tiers::new();
  let existing = "Name,Number,Hour,Minute\nHello,0712345678,09,15\n";
  fs::write(tiers.viewing.join("2023.05.01.csv"), existing).unwrap();
  tiers.deposit(1, "Hi,0798765432,10:05,01/05/2023");
  let observer = CollectingObserver::new();
  bucket(&tiers.raw, &tiers.intermediate, &observer).unwrap();

  fs::set_permissions(&tiers.viewing, fs::Permissions::from_mode(0o555)).unwrap();
  // Privileged users write through directory permissions, so there is nothing to observe.
  if fs::write(tiers.viewing.join("write-check"), "").is_ok() {
    fs::set_permissions(&tiers.viewing, fs::Permissions::from_mode(0o755)).unwrap();
    return;
  }

  let report = merge(&tiers.intermediate, &tiers.viewing, &observer).unwrap();
  fs::set_permissions(&tiers.viewing, fs::Permissions::from_mode(0o755)).unwrap();

  assert!(matches!(report.days[0].outcome, MergeOutcome::Failed { .. }));
  assert_eq!(read(&tiers.viewing, "2023.05.01.csv"), existing);
  assert_eq!(fs::read_dir(&tiers.viewing).unwrap().count(), 1);
}

#[test]
fn test_unreadable_viewing_file_is_left_as_is() {
  let tiers = Tiers::new();
  let existing: &[u8] = b"Name,Number,Hour,Minute\n\xff\xfe,0712345678,09,15\n";
  fs::write(tiers.viewing.join("2023.05.01.csv"), existing).unwrap();
  tiers.deposit(1, "Hi,0798765432,10:05,01/05/2023");
  tiers.deposit(2, "Bye,0798765432,22:40,02/05/2023");

  let observer = CollectingObserver::new();
  bucket(&tiers.raw, &tiers.intermediate, &observer).unwrap();
  let report = merge(&tiers.intermediate, &tiers.viewing, &observer).unwrap();

  assert!(matches!(report.days[0].outcome, MergeOutcome::Failed { .. }));
  assert_eq!(report.days[1].outcome, MergeOutcome::Created { written: 1 });
  assert_eq!(fs::read(tiers.viewing.join("2023.05.01.csv")).unwrap(), existing);
}

#[test]
fn test_sweep_clears_every_tier() {
  let tiers = Tiers::new();
  tiers.deposit(1, "Old,0712345678,09:15,01/03/2023");
  tiers.deposit(2, "New,0712345678,09:15,20/05/2023");
  let observer = CollectingObserver::new();
  tiers.cycle(&observer);

  let now = NaiveDate::from_ymd_opt(2023, 5, 22).unwrap().and_hms_opt(8, 0, 0).unwrap();
  let report = sweep(
    &[tiers.raw.as_path(), tiers.intermediate.as_path(), tiers.viewing.as_path()],
    &RetentionPolicy::default(),
    now,
    &observer,
  );

  assert_eq!(report.deleted(), 3);
  assert_eq!(report.retained(), 3);
  assert!(!tiers.raw.join("1.txt").exists());
  assert!(!tiers.intermediate.join("2023.03.01.csv").exists());
  assert!(!tiers.viewing.join("2023.03.01.csv").exists());
  assert!(tiers.viewing.join("2023.05.20.csv").exists());
}
