//! Orderflow Engine - Bounded Order-Processing Pipeline
//!
//! Producer-driven pipeline over a bounded worker pool with caller-runs
//! backpressure and a single-attempt delayed retry facility.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   TimedTask    ┌──────────────────────────────┐
//! │   Producer   │ ─────────────▶ │ WorkerPool (core..max, queue)│
//! └──────┬───────┘                └──────────────┬───────────────┘
//!        │ saturated                             │ transient failure
//!        ▼                                       ▼
//! ┌──────────────┐                ┌──────────────────────────────┐
//! │ CallerRuns   │                │ RetryScheduler (one attempt) │
//! └──────────────┘                └──────────────────────────────┘
//! ```
//!
//! [`Metrics`](crate::metrics::Metrics) is shared by every stage.

use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;

pub mod backpressure;
pub mod factory;
pub mod producer;
pub mod scheduler;
pub mod signal;
pub mod timed;
pub mod worker;
pub mod workload;

pub use backpressure::{AbortPolicy, CallerRunsPolicy, DiscardPolicy, RejectionPolicy};
pub use factory::NamedThreadFactory;
pub use producer::{OrderProducer, SimulationReport};
pub use scheduler::{RetryRecord, RetryScheduler, RetryStats, RetryStatsSnapshot};
pub use signal::{InterruptSignal, Interrupted};
pub use timed::TimedTask;
pub use worker::{PoolStatsSnapshot, WorkerPool};
pub use workload::SimulatedWork;

/// Unit of work executed by the pool
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// How the pool disposed of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Handed to a newly started worker
    Started,
    /// Placed on the bounded queue
    Queued,
    /// Rejected and run on the submitting thread
    CallerRan,
    /// Rejected and discarded
    Dropped,
}

impl Admission {
    /// Check if the pool itself admitted the job
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Started | Self::Queued)
    }
}

/// A job the pool refused, handed back to the submitter
///
/// Held behind a lock so errors carrying it stay `Sync`.
pub struct RejectedJob(Mutex<Job>);

impl RejectedJob {
    /// Wrap a rejected job
    #[must_use]
    pub fn new(job: Job) -> Self {
        Self(Mutex::new(job))
    }

    /// Take the job back
    #[must_use]
    pub fn into_inner(self) -> Job {
        self.0.into_inner()
    }

    /// Run the job on the current thread
    pub fn run(self) {
        (self.into_inner())();
    }
}

impl fmt::Debug for RejectedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RejectedJob(..)")
    }
}

/// Worker pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    /// Pool no longer accepts work
    #[error("Worker pool is shut down")]
    ShutDown,

    /// Pool is saturated and the policy handed the job back
    #[error("Worker pool saturated (max threads: {max_threads}, queue capacity: {queue_capacity})")]
    Saturated {
        /// Maximum thread count
        max_threads: usize,
        /// Queue capacity
        queue_capacity: usize,
        /// The job that was not admitted
        job: RejectedJob,
    },

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker thread '{name}': {reason}")]
    SpawnFailed {
        /// Thread name
        name: String,
        /// Failure reason
        reason: String,
    },
}

/// Retry scheduler errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Scheduler no longer accepts retries
    #[error("Retry scheduler is shut down, retry for {item_id} not scheduled")]
    ShutDown {
        /// Item whose retry was refused
        item_id: String,
    },

    /// Timer thread could not be spawned
    #[error("Failed to spawn retry timer thread: {reason}")]
    SpawnFailed {
        /// Failure reason
        reason: String,
    },
}

/// Pool result type
pub type PoolResult<T> = Result<T, PoolError>;
