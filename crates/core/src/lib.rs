//! `Orderflow` Core - Bounded Order-Processing Pipeline
//!
//! This crate provides a concurrent order-processing simulation built around a
//! bounded worker pool with caller-runs backpressure, a single-retry delayed
//! scheduler and lock-free metrics.
//!
//! # Features
//!
//! - **Bounded admission**: core threads, then a bounded queue, then extra
//!   threads up to a maximum, then the rejection policy
//! - **Backpressure**: rejected items run on the submitting thread
//! - **Single retry**: transient faults are retried once after a fixed delay
//! - **Two-phase shutdown**: graceful drain, then forced termination on timeout
//! - **Zero-panic policy**: all fallible operations return `Result<T, E>`
//!
//! # Architecture
//!
//! - [`engine`] - Worker pool, rejection policies, retry scheduler, producer
//! - [`metrics`] - Atomic pipeline counters and snapshots
//! - [`config`] - Layered, validated simulation configuration
//! - [`types`] - Work items and work outcomes
//!
//! # Example
//!
//! ```rust
//! use orderflow_core::{run_simulation, CoreResult, SimulationConfig};
//!
//! fn main() -> CoreResult<()> {
//!     let config = SimulationConfig::test()?;
//!     let report = run_simulation(config)?;
//!
//!     assert_eq!(report.metrics.submitted, 20);
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    missing_docs
)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::correctness,
    clippy::suspicious,
    clippy::perf,
    clippy::style,
    clippy::complexity,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::float_cmp
)]
#![allow(clippy::multiple_crate_versions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Public modules
pub mod config;
pub mod error;
pub mod metrics;
pub mod prelude;
pub mod types;

// Core functionality modules
pub mod engine;

// Re-exports for convenience
pub use config::{PoolConfig, RetryConfig, ShutdownConfig, SimulationConfig, WorkloadConfig};
pub use error::{CoreError, CoreResult};
pub use metrics::{Metrics, MetricsSnapshot};
pub use types::{Work, WorkItem, WorkOutcome};

// Re-export subsystem types for external use
pub use engine::{
    Admission, CallerRunsPolicy, OrderProducer, PoolError, PoolResult, RetryError,
    RetryScheduler, SimulationReport, WorkerPool,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run one simulation end to end with caller-runs backpressure
///
/// # Errors
///
/// Returns error if the configuration is invalid or a thread cannot start.
pub fn run_simulation(config: SimulationConfig) -> CoreResult<SimulationReport> {
    tracing::info!("Starting `Orderflow` simulation v{VERSION}");
    OrderProducer::new(config)?.run()
}
