//! Order Producer - Pipeline Orchestration
//!
//! Generates work items in bursts, wraps each in a [`TimedTask`] and submits
//! it to the [`WorkerPool`]. A transient failure inside a task schedules the
//! item's single retry instead of propagating. After the last submission the
//! pool and then the retry scheduler go through two-phase shutdown, and a
//! [`SimulationReport`] is assembled.
//!
//! Per-item flow:
//!
//! ```text
//! Submitted ─▶ Queued | RunningInline ─▶ Running ─▶ CompletedOk
//!                                           │
//!                                           └▶ TransientFailure ─▶ RetryScheduled
//!                                                 ─▶ RetryRunning ─▶ CompletedOk | PermanentFailure
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::error::CoreResult;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::types::{Work, WorkItem, WorkOutcome};

use super::{
    CallerRunsPolicy, PoolError, PoolStatsSnapshot, RejectionPolicy, RetryScheduler,
    RetryStatsSnapshot, SimulatedWork, TimedTask, WorkerPool,
};

/// Outcome of one simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Final metrics snapshot
    pub metrics: MetricsSnapshot,
    /// Wall-clock time from first submission to full shutdown (milliseconds)
    pub elapsed_ms: u64,
    /// Pool occupancy after shutdown
    pub pool: PoolStatsSnapshot,
    /// Retry outcomes
    pub retries: RetryStatsSnapshot,
    /// Pool drain timed out and was forced
    pub forced_pool_termination: bool,
    /// Scheduler drain timed out and was forced
    pub forced_scheduler_termination: bool,
    /// Queued items discarded by forced termination
    pub abandoned: usize,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Metrics: {}", self.metrics)?;
        writeln!(f, "Total time: {} ms", self.elapsed_ms)?;
        writeln!(
            f,
            "Pool: size={} active={} queued={} completed={} largest={}",
            self.pool.pool_size,
            self.pool.active_count,
            self.pool.queued,
            self.pool.completed_tasks,
            self.pool.largest_pool_size
        )?;
        write!(
            f,
            "Retries: scheduled={} succeeded={} failed={} dropped={}",
            self.retries.scheduled, self.retries.succeeded, self.retries.failed, self.retries.dropped
        )?;
        if self.forced_pool_termination {
            write!(
                f,
                "\nForced termination: {} queued items abandoned",
                self.abandoned
            )?;
        }
        Ok(())
    }
}

/// Drives one simulation run
pub struct OrderProducer {
    config: SimulationConfig,
    metrics: Arc<Metrics>,
    pool: WorkerPool,
    scheduler: Arc<RetryScheduler>,
}

impl OrderProducer {
    /// Create producer with caller-runs backpressure
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or a thread cannot start.
    pub fn new(config: SimulationConfig) -> CoreResult<Self> {
        let metrics = Arc::new(Metrics::new());
        let policy = Arc::new(CallerRunsPolicy::new(Arc::clone(&metrics)));
        Self::with_policy(config, metrics, policy)
    }

    /// Create producer with an explicit rejection policy
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or a thread cannot start.
    pub fn with_policy(
        config: SimulationConfig,
        metrics: Arc<Metrics>,
        policy: Arc<dyn RejectionPolicy>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let pool = WorkerPool::new(&config.pool, policy)?;
        let scheduler = Arc::new(RetryScheduler::new(&config.retry)?);

        Ok(Self {
            config,
            metrics,
            pool,
            scheduler,
        })
    }

    /// Shared metrics
    #[must_use]
    pub const fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Underlying retry scheduler
    #[must_use]
    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    /// Run with simulated variable-latency, occasionally failing work
    ///
    /// # Errors
    ///
    /// Returns error only if setup failed; overload, transient faults and
    /// forced shutdown are reported in the [`SimulationReport`].
    pub fn run(self) -> CoreResult<SimulationReport> {
        let work = Arc::new(SimulatedWork::new(
            &self.config.workload,
            self.pool.interrupt_signal(),
        ));
        self.run_with(work)
    }

    /// Run with caller-supplied work logic
    ///
    /// # Errors
    ///
    /// Returns error only if setup failed.
    pub fn run_with(self, work: Arc<dyn Work>) -> CoreResult<SimulationReport> {
        let workload = &self.config.workload;
        let started = Instant::now();
        tracing::info!(
            items = workload.items,
            burst_size = workload.burst_size,
            burst_pause_ms = workload.burst_pause_ms,
            "Producer starting"
        );

        for n in 1..=workload.items {
            self.submit(WorkItem::new(format!("order-{n}"), Arc::clone(&work)));
            if n % workload.burst_size == 0 && n < workload.items {
                thread::sleep(workload.burst_pause());
            }
        }

        tracing::info!(
            submitted = self.metrics.submitted(),
            "All items submitted, shutting down"
        );

        let (forced_pool_termination, abandoned) =
            self.drain_pool(self.config.shutdown.pool_timeout());
        let forced_scheduler_termination =
            self.drain_scheduler(self.config.shutdown.scheduler_timeout());

        let report = SimulationReport {
            metrics: self.metrics.snapshot(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            pool: self.pool.stats(),
            retries: self.scheduler.stats(),
            forced_pool_termination,
            forced_scheduler_termination,
            abandoned,
        };

        tracing::info!(
            submitted = report.metrics.submitted,
            accepted = report.metrics.accepted,
            rejected = report.metrics.rejected,
            completed = report.metrics.completed,
            elapsed_ms = report.elapsed_ms,
            "Simulation finished"
        );
        Ok(report)
    }

    /// Submit one item
    fn submit(&self, item: WorkItem) {
        self.metrics.record_submitted();

        let item_id = item.id().to_string();
        let scheduler = Arc::clone(&self.scheduler);
        let task = TimedTask::new(item_id.clone(), Arc::clone(&self.metrics), move || {
            process(&item, &scheduler);
        });

        match self.pool.execute(task.into_job()) {
            Ok(admission) if admission.is_accepted() => self.metrics.record_accepted(),
            Ok(admission) => {
                tracing::debug!(item_id, ?admission, "Item not admitted by pool");
            }
            Err(PoolError::Saturated { job, .. }) => {
                self.metrics.record_rejected();
                tracing::debug!(item_id, "Pool handed item back, running inline");
                job.run();
            }
            Err(e) => {
                tracing::warn!(item_id, error = %e, "Item dropped");
            }
        }
    }

    /// Graceful drain, escalating to forced termination on timeout
    fn drain_pool(&self, timeout: Duration) -> (bool, usize) {
        self.pool.shutdown();
        if self.pool.await_termination(timeout) {
            return (false, 0);
        }

        tracing::warn!(
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Pool did not drain in time, forcing termination"
        );
        let abandoned = self.pool.shutdown_now();
        if !self.pool.await_termination(timeout) {
            tracing::warn!("Workers still running after forced termination");
        }
        (true, abandoned)
    }

    fn drain_scheduler(&self, timeout: Duration) -> bool {
        self.scheduler.shutdown();
        if self.scheduler.await_termination(timeout) {
            return false;
        }

        tracing::warn!("Retry scheduler did not drain in time, forcing termination");
        self.scheduler.shutdown_now();
        if !self.scheduler.await_termination(timeout) {
            tracing::warn!("Retry timer still running after forced termination");
        }
        true
    }
}

/// Task body: run the item once, route a transient failure to its single retry
fn process(item: &WorkItem, scheduler: &RetryScheduler) {
    match item.run() {
        WorkOutcome::Completed => {
            tracing::debug!(item_id = item.id(), "Item completed");
        }
        WorkOutcome::Retryable { reason } => {
            tracing::debug!(item_id = item.id(), %reason, "Transient failure, scheduling retry");
            if let Err(e) = scheduler.schedule_retry(item) {
                tracing::warn!(item_id = item.id(), error = %e, "Retry not scheduled");
            }
        }
        WorkOutcome::Interrupted => {
            tracing::debug!(item_id = item.id(), "Item interrupted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_test_config() -> CoreResult<()> {
        let config = SimulationConfig::test()?;
        let report = OrderProducer::new(config)?.run()?;

        assert_eq!(report.metrics.submitted, 20);
        assert!(report.metrics.is_balanced());
        assert!(!report.forced_pool_termination);
        assert_eq!(report.retries.scheduled, 0);
        assert_eq!(report.pool.pool_size, 0);
        Ok(())
    }

    #[test]
    fn test_report_display() -> CoreResult<()> {
        let mut config = SimulationConfig::test()?;
        config.workload.items = 3;
        let report = OrderProducer::new(config)?.run()?;
        let text = report.to_string();

        assert!(text.contains("submitted=3"));
        assert!(text.contains("Total time:"));
        assert!(text.contains("Pool: size=0 active=0 queued=0"));
        assert!(!text.contains("Forced termination"));
        Ok(())
    }
}
