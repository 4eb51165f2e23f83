//! Pipeline Metrics - Lock-Free Submission and Latency Accounting
//!
//! One [`Metrics`] instance is created per simulation run and shared by
//! `Arc` with the producer, the backpressure policy and every timed task.
//! All updates are commutative atomic additions, so no update ordering is
//! required and a [`MetricsSnapshot`] is only a point-in-time view.
//!
//! Every update is mirrored to the `metrics` facade; without an installed
//! recorder that is a no-op.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Facade metric names
pub mod names {
    /// Items handed to the pipeline by the producer
    pub const SUBMITTED: &str = "orderflow_items_submitted_total";
    /// Items admitted by the pool (queued or handed to a new worker)
    pub const ACCEPTED: &str = "orderflow_items_accepted_total";
    /// Items the pool could not admit
    pub const REJECTED: &str = "orderflow_items_rejected_total";
    /// Timed task executions
    pub const COMPLETED: &str = "orderflow_items_completed_total";
    /// Queue wait per execution, milliseconds
    pub const QUEUE_WAIT_MS: &str = "orderflow_queue_wait_ms";
    /// Execution time per execution, milliseconds
    pub const EXEC_MS: &str = "orderflow_exec_ms";
}

/// Shared pipeline counters
#[derive(Debug, Default)]
pub struct Metrics {
    submitted: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    /// Total queue wait in microseconds
    total_queue_wait_us: AtomicU64,
    /// Total execution time in microseconds
    total_exec_us: AtomicU64,
}

impl Metrics {
    /// Create new zeroed metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an item handed to the pipeline
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(names::SUBMITTED).increment(1);
    }

    /// Record an item admitted by the pool
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(names::ACCEPTED).increment(1);
    }

    /// Record an item the pool could not admit
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(names::REJECTED).increment(1);
    }

    /// Record one finished execution
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(names::COMPLETED).increment(1);
    }

    /// Add time spent between admission and execution start
    pub fn add_queue_wait(&self, wait: Duration) {
        self.total_queue_wait_us
            .fetch_add(duration_to_us(wait), Ordering::Relaxed);
        ::metrics::histogram!(names::QUEUE_WAIT_MS).record(wait.as_secs_f64() * 1000.0_f64);
    }

    /// Add time spent executing
    pub fn add_exec_time(&self, exec: Duration) {
        self.total_exec_us
            .fetch_add(duration_to_us(exec), Ordering::Relaxed);
        ::metrics::histogram!(names::EXEC_MS).record(exec.as_secs_f64() * 1000.0_f64);
    }

    /// Items submitted so far
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Items accepted so far
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Items rejected so far
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Executions completed so far
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Total accumulated queue wait
    #[must_use]
    pub fn total_queue_wait(&self) -> Duration {
        Duration::from_micros(self.total_queue_wait_us.load(Ordering::Relaxed))
    }

    /// Total accumulated execution time
    #[must_use]
    pub fn total_exec_time(&self) -> Duration {
        Duration::from_micros(self.total_exec_us.load(Ordering::Relaxed))
    }

    /// Take a point-in-time snapshot
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::from_totals(
            self.submitted(),
            self.accepted(),
            self.rejected(),
            self.completed(),
            self.total_queue_wait_us.load(Ordering::Relaxed),
            self.total_exec_us.load(Ordering::Relaxed),
        )
    }
}

/// Point-in-time view of [`Metrics`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Items submitted
    pub submitted: u64,
    /// Items accepted by the pool
    pub accepted: u64,
    /// Items rejected by the pool (run inline or dropped)
    pub rejected: u64,
    /// Executions completed
    pub completed: u64,
    /// Average queue wait in milliseconds
    pub avg_queue_wait_ms: f64,
    /// Average execution time in milliseconds
    pub avg_exec_ms: f64,
}

impl MetricsSnapshot {
    /// Build snapshot from raw totals (durations in microseconds)
    #[must_use]
    pub fn from_totals(
        submitted: u64,
        accepted: u64,
        rejected: u64,
        completed: u64,
        total_queue_wait_us: u64,
        total_exec_us: u64,
    ) -> Self {
        Self {
            submitted,
            accepted,
            rejected,
            completed,
            avg_queue_wait_ms: average_ms(total_queue_wait_us, completed),
            avg_exec_ms: average_ms(total_exec_us, completed),
        }
    }

    /// Check `submitted == accepted + rejected == completed`
    #[must_use]
    pub const fn is_balanced(&self) -> bool {
        self.submitted == self.accepted + self.rejected
            && self.accepted + self.rejected == self.completed
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submitted={} accepted={} rejected={} completed={} avgQueueWaitMs={:.2} avgExecMs={:.2}",
            self.submitted,
            self.accepted,
            self.rejected,
            self.completed,
            self.avg_queue_wait_ms,
            self.avg_exec_ms
        )
    }
}

fn duration_to_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

#[allow(clippy::cast_precision_loss)]
fn average_ms(total_us: u64, count: u64) -> f64 {
    if count == 0 {
        return 0.0_f64;
    }
    total_us as f64 / count as f64 / 1000.0_f64
}
