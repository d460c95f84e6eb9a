//! The cycle loop: retrieve, bucket, merge, sweep, wait, repeat.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use pipeline::{BucketReport, MergeReport, RetentionPolicy, SweepReport};
use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracesync_core::{Config, PipelineEvent, PipelineObserver, Stage, TierConfig};
use tracing::{debug, error, info};

use crate::source::{RawSource, Retrieval};

/// Driver settings, taken from the config file or set directly in tests.
#[derive(Debug, Clone)]
pub struct DriverConfig {
  pub tiers: TierConfig,
  pub retention: RetentionPolicy,
  pub min_interval: Duration,
  pub max_interval: Duration,
  /// Granularity of the wait between cycles; cancellation is checked at each step
  pub poll_interval: Duration,
  /// Stop after this many cycles. `None` runs until cancelled or halted.
  pub max_cycles: Option<u64>,
}

impl From<&Config> for DriverConfig {
  fn from(config: &Config) -> Self {
    let (min_interval, max_interval) = config.schedule.interval_range();
    Self {
      tiers: config.tiers.clone(),
      retention: RetentionPolicy::from(&config.retention),
      min_interval,
      max_interval,
      poll_interval: config.schedule.poll_interval(),
      max_cycles: None,
    }
  }
}

/// Why [`Driver::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "exit", rename_all = "snake_case")]
pub enum DriverExit {
  Cancelled,
  Halted { reason: String },
  Completed { cycles: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
  pub stage: Stage,
  pub reason: String,
}

/// Everything one cycle did. Stages that did not run are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
  pub cycle: u64,
  pub started_at: NaiveDateTime,
  pub retrieval: Retrieval,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bucket: Option<BucketReport>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub merge: Option<MergeReport>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sweep: Option<SweepReport>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub failures: Vec<StageFailure>,
}

impl CycleReport {
  fn new(cycle: u64, started_at: NaiveDateTime, retrieval: Retrieval) -> Self {
    Self {
      cycle,
      started_at,
      retrieval,
      bucket: None,
      merge: None,
      sweep: None,
      failures: Vec::new(),
    }
  }

  /// Whether the bucketing, merge and sweep stages were attempted.
  pub fn ran_stages(&self) -> bool {
    self.retrieval == Retrieval::Ready
  }
}

/// Runs pipeline cycles against one set of tiers.
#[derive(Clone)]
pub struct Driver {
  config: Arc<DriverConfig>,
  source: Arc<dyn RawSource>,
  observer: Arc<dyn PipelineObserver>,
  cycles: Arc<AtomicU64>,
}

impl Driver {
  pub fn new(config: DriverConfig, source: Arc<dyn RawSource>, observer: Arc<dyn PipelineObserver>) -> Self {
    Self {
      config: Arc::new(config),
      source,
      observer,
      cycles: Arc::new(AtomicU64::new(0)),
    }
  }

  pub fn config(&self) -> &DriverConfig {
    &self.config
  }

  /// Cycles started so far.
  pub fn cycles(&self) -> u64 {
    self.cycles.load(Ordering::SeqCst)
  }

  /// Run one full cycle now. Blocks on file I/O.
  ///
  /// A failing stage is reported and the following stages still run. `now` dates the retention
  /// cutoff.
  pub fn run_cycle(&self, now: NaiveDateTime) -> CycleReport {
    let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
    let tiers = &self.config.tiers;
    self.observer.on_event(&PipelineEvent::CycleStarted { cycle });

    let retrieval = self.source.retrieve(&tiers.raw_dir);
    let mut report = CycleReport::new(cycle, now, retrieval);

    match &report.retrieval {
      Retrieval::Ready => {
        let observer = self.observer.as_ref();

        match pipeline::bucket(&tiers.raw_dir, &tiers.intermediate_dir, observer) {
          Ok(bucket) => report.bucket = Some(bucket),
          Err(error) => report.failures.push(self.stage_failed(Stage::Bucket, &error)),
        }

        match pipeline::merge(&tiers.intermediate_dir, &tiers.viewing_dir, observer) {
          Ok(merge) => report.merge = Some(merge),
          Err(error) => report.failures.push(self.stage_failed(Stage::Merge, &error)),
        }

        report.sweep = Some(pipeline::sweep(&tiers.all(), &self.config.retention, now, observer));
      }
      Retrieval::Skipped { reason } => {
        self.observer.on_event(&PipelineEvent::RetrievalSkipped { reason });
      }
      Retrieval::Halted { reason } => {
        error!(cycle, reason = %reason, "Retrieval halted");
      }
    }

    self.observer.on_event(&PipelineEvent::CycleFinished { cycle });
    report
  }

  fn stage_failed(&self, stage: Stage, error: &tracesync_core::Error) -> StageFailure {
    self.observer.on_event(&PipelineEvent::StageFailed { stage, error });
    StageFailure {
      stage,
      reason: error.to_string(),
    }
  }

  /// Run cycles until cancelled, halted, or `max_cycles` is reached.
  ///
  /// A cycle in progress is never interrupted; `cancel` is honoured while waiting between cycles.
  pub async fn run(&self, cancel: CancellationToken) -> DriverExit {
    let mut completed = 0u64;
    info!(
      raw = %self.config.tiers.raw_dir.display(),
      viewing = %self.config.tiers.viewing_dir.display(),
      "Driver started"
    );

    loop {
      if cancel.is_cancelled() {
        info!(completed, "Driver shutting down (cancelled)");
        return DriverExit::Cancelled;
      }

      let driver = self.clone();
      let result = tokio::task::spawn_blocking(move || driver.run_cycle(Local::now().naive_local())).await;
      completed += 1;

      match result {
        Ok(report) => {
          if let Retrieval::Halted { reason } = report.retrieval {
            info!(completed, "Driver stopped (retrieval halted)");
            return DriverExit::Halted { reason };
          }
        }
        // A panic inside a stage loses that cycle only.
        Err(e) => error!(error = %e, "Cycle task failed"),
      }

      if self.config.max_cycles.is_some_and(|max| completed >= max) {
        info!(completed, "Driver finished requested cycles");
        return DriverExit::Completed { cycles: completed };
      }

      let wait = self.next_wait();
      debug!(secs = wait.as_secs(), "Waiting for next cycle");
      if !wait_or_cancel(wait, self.config.poll_interval, &cancel).await {
        info!(completed, "Driver shutting down (cancelled)");
        return DriverExit::Cancelled;
      }
    }
  }

  /// A random wait in `[min_interval, max_interval]`.
  pub fn next_wait(&self) -> Duration {
    let (min, max) = (self.config.min_interval, self.config.max_interval);
    if min >= max {
      return min;
    }
    rand::thread_rng().gen_range(min..=max)
  }
}

/// Sleep for `total` in steps of `step`. Returns false if `cancel` fired first.
async fn wait_or_cancel(total: Duration, step: Duration, cancel: &CancellationToken) -> bool {
  let mut remaining = total;
  while !remaining.is_zero() {
    if cancel.is_cancelled() {
      return false;
    }
    let nap = step.min(remaining);
    tokio::select! {
      biased;

      _ = cancel.cancelled() => return false,
      _ = tokio::time::sleep(nap) => {}
    }
    remaining -= nap;
  }
  !cancel.is_cancelled()
}
