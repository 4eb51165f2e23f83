//! Backpressure Policies - Saturation Handling for the Worker Pool
//!
//! A [`RejectionPolicy`] is consulted only when the pool can neither start a
//! worker nor queue a job, or when the pool is already shutting down.
//!
//! - [`CallerRunsPolicy`] runs the job on the submitting thread, which
//!   throttles the producer to the pool's processing rate
//! - [`DiscardPolicy`] counts the rejection and drops the job
//! - [`AbortPolicy`] hands the job back inside [`PoolError::Saturated`]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::metrics::Metrics;

use super::{Admission, Job, PoolError, PoolResult, RejectedJob};

/// Pool state visible to a policy at rejection time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectionContext {
    /// Pool has stopped accepting work
    pub shutting_down: bool,
    /// Maximum thread count
    pub max_threads: usize,
    /// Queue capacity
    pub queue_capacity: usize,
}

/// Decides what happens to a job the pool cannot admit
pub trait RejectionPolicy: Send + Sync {
    /// Handle a rejected job
    ///
    /// # Errors
    ///
    /// Returns error if the policy refuses the job outright.
    fn rejected(&self, job: Job, context: &RejectionContext) -> PoolResult<Admission>;

    /// Policy name for logs
    fn name(&self) -> &'static str;
}

/// Runs rejected work on the submitting thread
#[derive(Debug)]
pub struct CallerRunsPolicy {
    metrics: Arc<Metrics>,
    dropped: AtomicU64,
}

impl CallerRunsPolicy {
    /// Create new caller-runs policy recording into `metrics`
    #[must_use]
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            dropped: AtomicU64::new(0),
        }
    }

    /// Jobs dropped because the pool was shutting down
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl RejectionPolicy for CallerRunsPolicy {
    fn rejected(&self, job: Job, context: &RejectionContext) -> PoolResult<Admission> {
        if context.shutting_down {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Pool shutting down, dropping rejected job");
            return Ok(Admission::Dropped);
        }

        self.metrics.record_rejected();
        tracing::debug!(
            max_threads = context.max_threads,
            queue_capacity = context.queue_capacity,
            "Pool saturated, running job on submitting thread"
        );
        job();
        Ok(Admission::CallerRan)
    }

    fn name(&self) -> &'static str {
        "caller-runs"
    }
}

/// Counts and drops rejected work
#[derive(Debug)]
pub struct DiscardPolicy {
    metrics: Arc<Metrics>,
}

impl DiscardPolicy {
    /// Create new discard policy recording into `metrics`
    #[must_use]
    pub const fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl RejectionPolicy for DiscardPolicy {
    fn rejected(&self, job: Job, context: &RejectionContext) -> PoolResult<Admission> {
        if !context.shutting_down {
            self.metrics.record_rejected();
        }
        drop(job);
        tracing::debug!(shutting_down = context.shutting_down, "Discarded rejected job");
        Ok(Admission::Dropped)
    }

    fn name(&self) -> &'static str {
        "discard"
    }
}

/// Hands rejected work back to the submitter
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortPolicy;

impl RejectionPolicy for AbortPolicy {
    fn rejected(&self, job: Job, context: &RejectionContext) -> PoolResult<Admission> {
        if context.shutting_down {
            return Err(PoolError::ShutDown);
        }
        Err(PoolError::Saturated {
            max_threads: context.max_threads,
            queue_capacity: context.queue_capacity,
            job: RejectedJob::new(job),
        })
    }

    fn name(&self) -> &'static str {
        "abort"
    }
}
