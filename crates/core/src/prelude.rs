//! `Orderflow` Core Prelude
//!
//! Common imports for building and driving a simulation.

// Re-export core types
pub use crate::config::{PoolConfig, RetryConfig, ShutdownConfig, SimulationConfig, WorkloadConfig};
pub use crate::engine::{
    AbortPolicy, Admission, CallerRunsPolicy, DiscardPolicy, InterruptSignal, OrderProducer,
    PoolError, RejectionPolicy, RetryError, RetryScheduler, SimulatedWork, SimulationReport,
    TimedTask, WorkerPool,
};
pub use crate::error::{CoreError, CoreResult};
pub use crate::metrics::{Metrics, MetricsSnapshot};
pub use crate::types::{Work, WorkItem, WorkOutcome};

// Re-export commonly used external types
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant};
pub use tracing::{debug, error, info, warn};

// Re-export validation
pub use garde::Validate;

/// Common result type alias
pub type Result<T> = CoreResult<T>;
