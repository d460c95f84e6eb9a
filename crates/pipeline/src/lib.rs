pub mod bucket;
pub mod dayfile;
pub mod merge;
pub mod retention;

pub use bucket::{BucketReport, RawFile, bucket, order_raw_files};
pub use dayfile::{DayFileWriter, list_files, read_day_file, read_raw_file, write_day_file};
pub use merge::{
  DayMerge, DayWrite, MergeOutcome, MergeReport, MergedRecords, merge, merge_day, merge_day_with, merge_records, merge_with,
};
pub use retention::{RetentionPolicy, SweepOutcome, SweepReport, SweptFile, cutoff, effective_date, sweep};
