use crate::driver::{Driver, DriverConfig, DriverExit};
use crate::source::{RawSource, source_from_config};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracesync_core::{Config, PipelineObserver, TracingObserver, default_data_dir};
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("daemon already running (pid {pid}, pid file {})", path.display())]
  AlreadyRunning { pid: u32, path: PathBuf },
  #[error("PID file {}: {source}", path.display())]
  PidFile { path: PathBuf, source: std::io::Error },
}

/// Daemon lifecycle manager
pub struct Daemon {
  config: Config,
  source: Arc<dyn RawSource>,
  observer: Arc<dyn PipelineObserver>,
  max_cycles: Option<u64>,
  pid_file: Option<PathBuf>,
  cancel: CancellationToken,
}

impl Daemon {
  pub fn new(config: Config) -> Self {
    let source = Arc::from(source_from_config(&config.retrieval));
    Self {
      config,
      source,
      observer: Arc::new(TracingObserver),
      max_cycles: None,
      pid_file: Some(pid_file_path()),
      cancel: CancellationToken::new(),
    }
  }

  pub fn with_source(mut self, source: Arc<dyn RawSource>) -> Self {
    self.source = source;
    self
  }

  pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
    self.observer = observer;
    self
  }

  pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
    self.max_cycles = max_cycles;
    self
  }

  /// `None` skips the single-instance check.
  pub fn with_pid_file(mut self, pid_file: Option<PathBuf>) -> Self {
    self.pid_file = pid_file;
    self
  }

  /// Cancelling this token stops the daemon after the current cycle.
  pub fn cancel_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Run the daemon
  pub async fn run(&self) -> Result<DriverExit, LifecycleError> {
    info!("Starting tracesync daemon");
    for (name, dir) in ["raw", "intermediate", "viewing"].iter().zip(self.config.tiers.all()) {
      if dir.is_dir() {
        info!("{} tier: {:?}", name, dir);
      } else {
        warn!("{} tier {:?} does not exist; its stage will fail until it is created", name, dir);
      }
    }

    let _pid_guard = match &self.pid_file {
      Some(path) => Some(PidGuard::acquire(path)?),
      None => None,
    };

    // Handle ctrl-c gracefully
    let cancel = self.cancel.clone();
    let signal_task = tokio::spawn(async move {
      if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        return;
      }
      info!("Received ctrl-c, finishing current cycle...");
      cancel.cancel();
    });

    let mut driver_config = DriverConfig::from(&self.config);
    driver_config.max_cycles = self.max_cycles;
    let driver = Driver::new(driver_config, Arc::clone(&self.source), Arc::clone(&self.observer));

    let exit = driver.run(self.cancel.clone()).await;
    signal_task.abort();

    info!("Daemon shutdown complete ({:?})", exit);
    Ok(exit)
  }
}

/// Get the PID file path
pub fn pid_file_path() -> PathBuf {
  default_data_dir().join("tracesync.pid")
}

/// PID of the live daemon recorded in `path`, if any.
pub fn running_pid(path: &Path) -> Option<u32> {
  let pid: u32 = std::fs::read_to_string(path).ok()?.trim().parse().ok()?;
  process_alive(pid).then_some(pid)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
  let Ok(pid) = libc::pid_t::try_from(pid) else {
    return false;
  };
  // Signal 0 only checks that the process exists; EPERM means it exists under another user.
  let rc = unsafe { libc::kill(pid, 0) };
  rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
  true
}

/// Holds the PID file for the life of the daemon and removes it on drop.
struct PidGuard {
  path: PathBuf,
}

impl PidGuard {
  fn acquire(path: &Path) -> Result<Self, LifecycleError> {
    match running_pid(path) {
      Some(pid) if pid != std::process::id() => {
        return Err(LifecycleError::AlreadyRunning {
          pid,
          path: path.to_path_buf(),
        });
      }
      _ => {}
    }

    let pid_err = |source: std::io::Error| LifecycleError::PidFile {
      path: path.to_path_buf(),
      source,
    };
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(pid_err)?;
    }
    std::fs::write(path, std::process::id().to_string()).map_err(pid_err)?;
    Ok(Self {
      path: path.to_path_buf(),
    })
  }
}

impl Drop for PidGuard {
  fn drop(&mut self) {
    let _ = std::fs::remove_file(&self.path);
  }
}
