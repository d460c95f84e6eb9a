//! Pipeline event sink.
//!
//! Stages report what they did through a [`PipelineObserver`] handed to them by the caller instead
//! of writing to the console themselves.

use crate::day::DayKey;
use crate::error::Error;
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Something that happened while a stage was running.
#[derive(Debug)]
pub enum PipelineEvent<'a> {
  CycleStarted {
    cycle: u64,
  },
  RetrievalSkipped {
    reason: &'a str,
  },
  RecordBucketed {
    sequence_id: u64,
    day: DayKey,
    sender: &'a str,
  },
  /// A raw file, raw record or day-file line was left out.
  RecordSkipped {
    error: &'a Error,
  },
  DayFileOpened {
    day: DayKey,
    path: &'a Path,
  },
  DayMerged {
    day: DayKey,
    written: usize,
    added: usize,
    created: bool,
  },
  /// The file is held by another process; the day is retried next cycle.
  DayMergeDeferred {
    day: DayKey,
    error: &'a Error,
  },
  DayMergeFailed {
    day: DayKey,
    error: &'a Error,
  },
  FileDeleted {
    path: &'a Path,
    effective_date: NaiveDate,
    dry_run: bool,
  },
  DeleteFailed {
    path: &'a Path,
    error: &'a Error,
  },
  UnknownEffectiveDate {
    path: &'a Path,
  },
  /// A whole stage was abandoned for this cycle.
  StageFailed {
    stage: Stage,
    error: &'a Error,
  },
  CycleFinished {
    cycle: u64,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
  Retrieve,
  Bucket,
  Merge,
  Sweep,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Retrieve => "retrieve",
      Stage::Bucket => "bucket",
      Stage::Merge => "merge",
      Stage::Sweep => "sweep",
    };
    f.write_str(name)
  }
}

/// Field-less discriminant of [`PipelineEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
  CycleStarted,
  RetrievalSkipped,
  RecordBucketed,
  RecordSkipped,
  DayFileOpened,
  DayMerged,
  DayMergeDeferred,
  DayMergeFailed,
  FileDeleted,
  DeleteFailed,
  UnknownEffectiveDate,
  StageFailed,
  CycleFinished,
}

impl PipelineEvent<'_> {
  pub fn kind(&self) -> EventKind {
    match self {
      PipelineEvent::CycleStarted { .. } => EventKind::CycleStarted,
      PipelineEvent::RetrievalSkipped { .. } => EventKind::RetrievalSkipped,
      PipelineEvent::RecordBucketed { .. } => EventKind::RecordBucketed,
      PipelineEvent::RecordSkipped { .. } => EventKind::RecordSkipped,
      PipelineEvent::DayFileOpened { .. } => EventKind::DayFileOpened,
      PipelineEvent::DayMerged { .. } => EventKind::DayMerged,
      PipelineEvent::DayMergeDeferred { .. } => EventKind::DayMergeDeferred,
      PipelineEvent::DayMergeFailed { .. } => EventKind::DayMergeFailed,
      PipelineEvent::FileDeleted { .. } => EventKind::FileDeleted,
      PipelineEvent::DeleteFailed { .. } => EventKind::DeleteFailed,
      PipelineEvent::UnknownEffectiveDate { .. } => EventKind::UnknownEffectiveDate,
      PipelineEvent::StageFailed { .. } => EventKind::StageFailed,
      PipelineEvent::CycleFinished { .. } => EventKind::CycleFinished,
    }
  }
}

impl fmt::Display for PipelineEvent<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PipelineEvent::CycleStarted { cycle } => write!(f, "cycle {} started", cycle),
      PipelineEvent::RetrievalSkipped { reason } => write!(f, "retrieval skipped: {}", reason),
      PipelineEvent::RecordBucketed { sequence_id, day, sender } => {
        write!(f, "bucketed message {} from {} into {}", sequence_id, sender, day)
      }
      PipelineEvent::RecordSkipped { error } => write!(f, "skipped: {}", error),
      PipelineEvent::DayFileOpened { day, path } => write!(f, "opened day file {} at {}", day, path.display()),
      PipelineEvent::DayMerged {
        day,
        written,
        added,
        created,
      } => {
        let verb = if *created { "created" } else { "merged" };
        write!(f, "{} {}: {} new, {} total", verb, day, added, written)
      }
      PipelineEvent::DayMergeDeferred { day, error } => write!(f, "deferred {} to next cycle: {}", day, error),
      PipelineEvent::DayMergeFailed { day, error } => write!(f, "merge of {} failed: {}", day, error),
      PipelineEvent::FileDeleted {
        path,
        effective_date,
        dry_run,
      } => {
        let verb = if *dry_run { "would delete" } else { "deleted" };
        write!(f, "{} {} (dated {})", verb, path.display(), effective_date)
      }
      PipelineEvent::DeleteFailed { path, error } => write!(f, "could not delete {}: {}", path.display(), error),
      PipelineEvent::UnknownEffectiveDate { path } => {
        write!(f, "kept {}: effective date unknown", path.display())
      }
      PipelineEvent::StageFailed { stage, error } => write!(f, "{} stage abandoned: {}", stage, error),
      PipelineEvent::CycleFinished { cycle } => write!(f, "cycle {} finished", cycle),
    }
  }
}

/// Receives pipeline events. Implementations must be cheap; stages call this inline.
pub trait PipelineObserver: Send + Sync {
  fn on_event(&self, event: &PipelineEvent<'_>);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
  fn on_event(&self, event: &PipelineEvent<'_>) {
    match event {
      PipelineEvent::CycleStarted { cycle } => info!(cycle, "Cycle started"),
      PipelineEvent::CycleFinished { cycle } => info!(cycle, "Cycle finished"),
      PipelineEvent::RetrievalSkipped { reason } => warn!(reason, "Retrieval skipped, waiting for next cycle"),
      PipelineEvent::RecordBucketed { .. } | PipelineEvent::DayFileOpened { .. } => debug!("{}", event),
      PipelineEvent::DayMerged { .. } => info!("{}", event),
      PipelineEvent::FileDeleted { .. } => info!("{}", event),
      PipelineEvent::RecordSkipped { error } | PipelineEvent::DayMergeDeferred { error, .. } => {
        if error.is_transient() {
          warn!("{} (please close the file)", event);
        } else {
          warn!("{}", event);
        }
      }
      PipelineEvent::UnknownEffectiveDate { .. } => error!("{}", event),
      PipelineEvent::DayMergeFailed { .. } | PipelineEvent::DeleteFailed { .. } | PipelineEvent::StageFailed { .. } => {
        error!("{}", event)
      }
    }
  }
}

/// Keeps every event as `(kind, message)`, for tests and machine-readable output.
#[derive(Debug, Default)]
pub struct CollectingObserver {
  events: Mutex<Vec<(EventKind, String)>>,
}

impl CollectingObserver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn events(&self) -> Vec<(EventKind, String)> {
    self.events.lock().map(|events| events.clone()).unwrap_or_default()
  }

  pub fn count(&self, kind: EventKind) -> usize {
    self
      .events
      .lock()
      .map(|events| events.iter().filter(|(k, _)| *k == kind).count())
      .unwrap_or(0)
  }
}

impl PipelineObserver for CollectingObserver {
  fn on_event(&self, event: &PipelineEvent<'_>) {
    if let Ok(mut events) = self.events.lock() {
      events.push((event.kind(), event.to_string()));
    }
  }
}

/// Sends every event to two observers.
pub struct Tee<A, B>(pub A, pub B);

impl<A: PipelineObserver, B: PipelineObserver> PipelineObserver for Tee<A, B> {
  fn on_event(&self, event: &PipelineEvent<'_>) {
    self.0.on_event(event);
    self.1.on_event(event);
  }
}

impl<T: PipelineObserver + ?Sized> PipelineObserver for std::sync::Arc<T> {
  fn on_event(&self, event: &PipelineEvent<'_>) {
    (**self).on_event(event);
  }
}

impl<T: PipelineObserver + ?Sized> PipelineObserver for &T {
  fn on_event(&self, event: &PipelineEvent<'_>) {
    (**self).on_event(event);
  }
}
