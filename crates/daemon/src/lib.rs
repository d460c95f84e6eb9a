pub mod driver;
pub mod lifecycle;
pub mod source;

pub use driver::{CycleReport, Driver, DriverConfig, DriverExit, StageFailure};
pub use lifecycle::{Daemon, LifecycleError, pid_file_path, running_pid};
pub use source::{CommandSource, PassiveSource, RAW_DIR_ENV, RAW_DIR_PLACEHOLDER, RawSource, Retrieval, source_from_config};
