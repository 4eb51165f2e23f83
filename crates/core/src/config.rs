//! Orderflow Configuration System
//!
//! Simulation configuration with `garde` validation and layered loading:
//! built-in defaults, an optional configuration file, then
//! `ORDERFLOW__SECTION__FIELD` environment overrides.

use crate::error::{CoreError, CoreResult};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "ORDERFLOW";

/// Fixed bounded queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Idle keep-alive for workers beyond the core count (milliseconds)
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 30_000;

/// Delay before the single retry of a failed item (milliseconds)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Probability that a first attempt fails transiently
pub const DEFAULT_FAILURE_PROBABILITY: f64 = 0.1;

/// Top-level simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SimulationConfig {
    /// Worker pool configuration
    #[garde(dive)]
    pub pool: PoolConfig,

    /// Producer workload configuration
    #[garde(dive)]
    pub workload: WorkloadConfig,

    /// Retry scheduler configuration
    #[garde(dive)]
    pub retry: RetryConfig,

    /// Shutdown configuration
    #[garde(dive)]
    pub shutdown: ShutdownConfig,
}

/// Bounded worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PoolConfig {
    /// Threads kept alive while idle
    #[garde(range(min = 1, max = 1024))]
    pub core_threads: usize,

    /// Upper bound on concurrently running threads
    #[garde(range(min = 1, max = 1024))]
    pub max_threads: usize,

    /// Bounded queue capacity
    #[garde(range(min = 1, max = 1_000_000))]
    pub queue_capacity: usize,

    /// Idle keep-alive for threads beyond `core_threads` (milliseconds)
    #[garde(range(min = 1))]
    pub keep_alive_ms: u64,

    /// Worker thread name prefix
    #[garde(length(min = 1, max = 64))]
    pub thread_name_prefix: String,
}

/// Producer workload configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkloadConfig {
    /// Items produced per run
    #[garde(range(min = 1, max = 10_000_000))]
    pub items: u32,

    /// Items submitted back-to-back before pausing
    #[garde(range(min = 1))]
    pub burst_size: u32,

    /// Pause between bursts (milliseconds)
    #[garde(skip)]
    pub burst_pause_ms: u64,

    /// Minimum simulated latency per item (milliseconds)
    #[garde(skip)]
    pub min_latency_ms: u64,

    /// Maximum simulated latency per item (milliseconds)
    #[garde(range(max = 60_000))]
    pub max_latency_ms: u64,

    /// Probability that a first attempt fails transiently
    #[garde(range(min = 0.0_f64, max = 1.0_f64))]
    pub failure_probability: f64,
}

/// Retry scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    /// Delay before the single retry (milliseconds)
    #[garde(range(max = 3_600_000))]
    pub delay_ms: u64,

    /// Timer thread name
    #[garde(length(min = 1, max = 64))]
    pub thread_name: String,
}

/// Two-phase shutdown configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShutdownConfig {
    /// Graceful drain timeout for the pool (milliseconds)
    #[garde(skip)]
    pub pool_timeout_ms: u64,

    /// Graceful drain timeout for the retry scheduler (milliseconds)
    #[garde(skip)]
    pub scheduler_timeout_ms: u64,
}

impl PoolConfig {
    /// Derive pool sizing from available parallelism
    ///
    /// `core = max(2, parallelism / 2)`, `max = max(core * 2, core + 2)`.
    #[must_use]
    pub fn from_parallelism(parallelism: usize) -> Self {
        let core_threads = (parallelism / 2).max(2);
        let max_threads = (core_threads * 2).max(core_threads + 2);

        Self {
            core_threads,
            max_threads,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
            thread_name_prefix: "order-worker".to_string(),
        }
    }

    /// Derive pool sizing from the host CPU count
    #[must_use]
    pub fn detect() -> Self {
        Self::from_parallelism(num_cpus::get())
    }

    /// Explicit sizing with default keep-alive and naming
    #[must_use]
    pub fn sized(core_threads: usize, max_threads: usize, queue_capacity: usize) -> Self {
        Self {
            core_threads,
            max_threads,
            queue_capacity,
            ..Self::from_parallelism(core_threads * 2)
        }
    }

    /// Keep-alive as duration
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Validate field ranges and `core <= max`
    ///
    /// # Errors
    ///
    /// Returns error if any bound is violated.
    pub fn validate(&self) -> CoreResult<()> {
        garde::Validate::validate(self, &())
            .map_err(|e| CoreError::validation("pool", format!("Validation failed: {e}")))?;

        if self.core_threads > self.max_threads {
            return Err(CoreError::validation(
                "pool.core_threads",
                format!(
                    "core_threads ({}) cannot exceed max_threads ({})",
                    self.core_threads, self.max_threads
                ),
            ));
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::detect()
    }
}

impl WorkloadConfig {
    /// Pause between bursts as duration
    #[must_use]
    pub const fn burst_pause(&self) -> Duration {
        Duration::from_millis(self.burst_pause_ms)
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            items: 200,
            burst_size: 20,
            burst_pause_ms: 25,
            min_latency_ms: 5,
            max_latency_ms: 40,
            failure_probability: DEFAULT_FAILURE_PROBABILITY,
        }
    }
}

impl RetryConfig {
    /// Retry delay as duration
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_RETRY_DELAY_MS,
            thread_name: "retry-timer".to_string(),
        }
    }
}

impl ShutdownConfig {
    /// Pool drain timeout as duration
    #[must_use]
    pub const fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }

    /// Scheduler drain timeout as duration
    #[must_use]
    pub const fn scheduler_timeout(&self) -> Duration {
        Duration::from_millis(self.scheduler_timeout_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            pool_timeout_ms: 5_000,
            scheduler_timeout_ms: 2_000,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            workload: WorkloadConfig::default(),
            retry: RetryConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Create small, fast test configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration validation fails.
    pub fn test() -> CoreResult<Self> {
        let config = Self {
            pool: PoolConfig {
                keep_alive_ms: 1_000,
                ..PoolConfig::sized(2, 4, 5)
            },
            workload: WorkloadConfig {
                items: 20,
                burst_size: 5,
                burst_pause_ms: 1,
                min_latency_ms: 0,
                max_latency_ms: 2,
                failure_probability: 0.0,
            },
            retry: RetryConfig {
                delay_ms: 50,
                ..RetryConfig::default()
            },
            shutdown: ShutdownConfig {
                pool_timeout_ms: 2_000,
                scheduler_timeout_ms: 2_000,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from defaults, an optional file and the environment
    ///
    /// The file format is inferred from its extension (TOML, YAML or JSON).
    /// Environment overrides use `ORDERFLOW__POOL__QUEUE_CAPACITY=100` style keys.
    ///
    /// # Errors
    ///
    /// Returns error if a source cannot be read or the result fails validation.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        let config: Self = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration validation fails.
    pub fn validate(&self) -> CoreResult<()> {
        garde::Validate::validate(self, &())
            .map_err(|e| CoreError::validation("config", format!("Validation failed: {e}")))?;

        self.pool.validate()?;

        if self.workload.min_latency_ms > self.workload.max_latency_ms {
            return Err(CoreError::validation(
                "workload.min_latency_ms",
                "Minimum latency cannot be larger than maximum latency",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallelism_derivation() {
        let single = PoolConfig::from_parallelism(1);
        assert_eq!((single.core_threads, single.max_threads), (2, 4));

        let eight = PoolConfig::from_parallelism(8);
        assert_eq!((eight.core_threads, eight.max_threads), (4, 8));

        let many = PoolConfig::from_parallelism(32);
        assert_eq!((many.core_threads, many.max_threads), (16, 32));
        assert_eq!(many.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(many.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn test_detected_pool_is_valid() -> CoreResult<()> {
        let pool = PoolConfig::detect();
        assert!(pool.core_threads >= 2);
        assert!(pool.core_threads <= pool.max_threads);
        pool.validate()
    }

    #[test]
    fn test_default_config() -> CoreResult<()> {
        let config = SimulationConfig::default();
        assert_eq!(config.retry.delay(), Duration::from_millis(500));
        assert!((config.workload.failure_probability - 0.1_f64).abs() < f64::EPSILON);
        config.validate()
    }

    #[test]
    fn test_test_config() -> CoreResult<()> {
        let config = SimulationConfig::test()?;
        assert_eq!(config.pool.core_threads, 2);
        assert_eq!(config.pool.max_threads, 4);
        assert_eq!(config.pool.queue_capacity, 5);
        Ok(())
    }

    #[test]
    fn test_core_above_max_rejected() {
        let config = SimulationConfig {
            pool: PoolConfig::sized(8, 4, 10),
            ..SimulationConfig::default()
        };
        let result = config.validate();
        assert!(matches!(result, Err(CoreError::Validation { .. })));
    }

    #[test]
    fn test_latency_range_rejected() {
        let mut config = SimulationConfig::default();
        config.workload.min_latency_ms = 50;
        config.workload.max_latency_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_failure_probability_range() {
        let mut config = SimulationConfig::default();
        config.workload.failure_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut config = SimulationConfig::test()?;
        config.pool.queue_capacity = 7;
        config.workload.items = 33;

        let path = std::env::temp_dir().join(format!(
            "orderflow-config-{}-{}.toml",
            std::process::id(),
            fastrand::u64(..)
        ));
        std::fs::write(&path, toml::to_string(&config)?)?;

        let loaded = SimulationConfig::load(Some(&path));
        std::fs::remove_file(&path)?;
        let loaded = loaded?;

        assert_eq!(loaded.pool.queue_capacity, 7);
        assert_eq!(loaded.workload.items, 33);
        Ok(())
    }
}
