//! Where raw message files come from.
//!
//! The driver asks a [`RawSource`] for a fresh deposit at the start of every cycle. What the
//! source does to fill the raw tier (pulling from a phone, copying from a share) is its own
//! business; the pipeline only reads whatever files are present afterwards.

use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracesync_core::RetrievalConfig;
use tracing::{debug, warn};

/// Placeholder in a retrieval command's arguments, replaced with the raw tier path.
pub const RAW_DIR_PLACEHOLDER: &str = "{raw_dir}";

/// Environment variable carrying the raw tier path to a retrieval command.
pub const RAW_DIR_ENV: &str = "TRACESYNC_RAW_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Retrieval {
  /// The raw tier holds everything available; run the stages.
  Ready,
  /// Nothing could be retrieved this time. Stages are skipped and the driver tries again next cycle.
  Skipped { reason: String },
  /// Retrieval can never succeed. The driver stops.
  Halted { reason: String },
}

pub trait RawSource: Send + Sync {
  fn retrieve(&self, raw_dir: &Path) -> Retrieval;
}

/// Files are dropped into the raw tier by someone else.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassiveSource;

impl RawSource for PassiveSource {
  fn retrieve(&self, raw_dir: &Path) -> Retrieval {
    if raw_dir.is_dir() {
      Retrieval::Ready
    } else {
      Retrieval::Skipped {
        reason: format!("raw tier {} is not a directory", raw_dir.display()),
      }
    }
  }
}

/// Runs an external command that deposits raw message files, once per cycle.
///
/// A command still running when its timeout expires is killed and the cycle is skipped, so a hung
/// retriever can never hold the driver inside a cycle.
#[derive(Debug, Clone)]
pub struct CommandSource {
  program: String,
  args: Vec<String>,
  timeout: Duration,
}

/// How often a running retrieval command is checked for exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl CommandSource {
  /// `None` for an empty command line.
  pub fn new(command: &[String]) -> Option<Self> {
    let (program, args) = command.split_first()?;
    Some(Self {
      program: program.clone(),
      args: args.to_vec(),
      timeout: RetrievalConfig::default().timeout(),
    })
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  fn args_for(&self, raw_dir: &Path) -> Vec<String> {
    let raw = raw_dir.display().to_string();
    self.args.iter().map(|arg| arg.replace(RAW_DIR_PLACEHOLDER, &raw)).collect()
  }

  /// Wait for `child` until the timeout. `Ok(None)` means it was still running and has been killed.
  fn wait_with_timeout(&self, child: &mut Child) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + self.timeout;
    loop {
      if let Some(status) = child.try_wait()? {
        return Ok(Some(status));
      }
      let now = Instant::now();
      if now >= deadline {
        child.kill()?;
        child.wait()?;
        return Ok(None);
      }
      std::thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
    }
  }
}

impl RawSource for CommandSource {
  fn retrieve(&self, raw_dir: &Path) -> Retrieval {
    let args = self.args_for(raw_dir);
    debug!(program = %self.program, ?args, timeout = ?self.timeout, "Running retrieval command");

    let mut child = match Command::new(&self.program)
      .args(&args)
      .env(RAW_DIR_ENV, raw_dir)
      .stdin(Stdio::null())
      .spawn()
    {
      Ok(child) => child,
      Err(e) => return spawn_failure(&self.program, e),
    };

    match self.wait_with_timeout(&mut child) {
      Ok(Some(status)) if status.success() => Retrieval::Ready,
      Ok(Some(status)) => {
        warn!(program = %self.program, %status, "Retrieval command failed");
        Retrieval::Skipped {
          reason: format!("{} exited with {}", self.program, status),
        }
      }
      Ok(None) => {
        warn!(program = %self.program, timeout = ?self.timeout, "Retrieval command timed out, killed");
        Retrieval::Skipped {
          reason: format!("{} timed out after {:?}", self.program, self.timeout),
        }
      }
      Err(e) => {
        warn!(program = %self.program, error = %e, "Lost track of retrieval command");
        Retrieval::Skipped {
          reason: format!("waiting for {}: {}", self.program, e),
        }
      }
    }
  }
}

/// A missing or non-executable program will not fix itself; anything else is worth another try.
fn spawn_failure(program: &str, error: io::Error) -> Retrieval {
  let reason = format!("cannot run {}: {}", program, error);
  match error.kind() {
    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => Retrieval::Halted { reason },
    _ => {
      warn!(program, error = %error, "Retrieval command could not start, will retry");
      Retrieval::Skipped { reason }
    }
  }
}

/// The source described by the `[retrieval]` config section.
pub fn source_from_config(config: &RetrievalConfig) -> Box<dyn RawSource> {
  match config.command.as_deref().and_then(CommandSource::new) {
    Some(source) => Box::new(source.with_timeout(config.timeout())),
    None => Box::new(PassiveSource),
  }
}
