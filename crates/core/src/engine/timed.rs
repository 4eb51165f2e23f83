//! Timed task wrapper
//!
//! Captures the enqueue instant when the task is built. Running it adds the
//! queue wait, runs the delegate, then adds the execution time and counts one
//! completion. The post-execution accounting lives in a drop guard, so it
//! also runs when the delegate panics.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::Metrics;

use super::Job;

/// A delegate decorated with queue-wait and execution-time accounting
pub struct TimedTask {
    id: String,
    enqueued_at: Instant,
    metrics: Arc<Metrics>,
    delegate: Job,
}

impl TimedTask {
    /// Wrap `delegate`, stamping the enqueue time now
    pub fn new<F>(id: impl Into<String>, metrics: Arc<Metrics>, delegate: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id: id.into(),
            enqueued_at: Instant::now(),
            metrics,
            delegate: Box::new(delegate),
        }
    }

    /// Item identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Instant the task was wrapped
    #[must_use]
    pub const fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Run the delegate with accounting
    pub fn run(self) {
        let started = Instant::now();
        self.metrics
            .add_queue_wait(started.saturating_duration_since(self.enqueued_at));

        let _accounting = CompletionGuard {
            metrics: &self.metrics,
            started,
        };
        (self.delegate)();
    }

    /// Convert into a pool job
    #[must_use]
    pub fn into_job(self) -> Job {
        Box::new(move || self.run())
    }
}

impl fmt::Debug for TimedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedTask")
            .field("id", &self.id)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

struct CompletionGuard<'a> {
    metrics: &'a Metrics,
    started: Instant,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.metrics.add_exec_time(self.started.elapsed());
        self.metrics.record_completed();
    }
}
