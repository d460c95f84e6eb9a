pub mod config;
pub mod day;
pub mod error;
pub mod events;
pub mod record;

pub use config::{
  Config, DaemonConfig, RetentionConfig, RetrievalConfig, ScheduleConfig, TierConfig, default_config_dir,
  default_data_dir,
};
pub use day::{DAY_FILE_EXTENSION, DayKey};
pub use error::{Error, ParseError, Result, is_share_violation};
pub use events::{CollectingObserver, EventKind, PipelineEvent, PipelineObserver, Stage, Tee, TracingObserver};
pub use record::{DAY_FILE_HEADER, DELIMITER, FIELD_COUNT, Record};
