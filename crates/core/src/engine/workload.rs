//! Simulated order work: variable latency plus an occasional transient fault.

use std::time::Duration;

use crate::config::WorkloadConfig;
use crate::types::{Work, WorkOutcome};

use super::InterruptSignal;

/// Latency and fault model for one simulated order
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    min_latency_ms: u64,
    max_latency_ms: u64,
    failure_probability: f64,
    interrupt: InterruptSignal,
}

impl SimulatedWork {
    /// Create work model sleeping through `interrupt`
    #[must_use]
    pub fn new(config: &WorkloadConfig, interrupt: InterruptSignal) -> Self {
        Self {
            min_latency_ms: config.min_latency_ms,
            max_latency_ms: config.max_latency_ms.max(config.min_latency_ms),
            failure_probability: config.failure_probability.clamp(0.0_f64, 1.0_f64),
            interrupt,
        }
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(fastrand::u64(self.min_latency_ms..=self.max_latency_ms))
    }

    fn fails(&self) -> bool {
        fastrand::f64() < self.failure_probability
    }
}

impl Work for SimulatedWork {
    fn run(&self, item_id: &str) -> WorkOutcome {
        if self.interrupt.sleep(self.latency()).is_err() {
            tracing::debug!(item_id, "Simulated work interrupted");
            return WorkOutcome::Interrupted;
        }

        if self.fails() {
            return WorkOutcome::retryable("simulated transient fault");
        }

        WorkOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn workload(min: u64, max: u64, failure_probability: f64) -> WorkloadConfig {
        WorkloadConfig {
            min_latency_ms: min,
            max_latency_ms: max,
            failure_probability,
            ..WorkloadConfig::default()
        }
    }

    #[test]
    fn test_never_fails_at_zero_probability() {
        let work = SimulatedWork::new(&workload(0, 1, 0.0), InterruptSignal::new());
        for i in 0..50 {
            assert_eq!(work.run(&format!("order-{i}")), WorkOutcome::Completed);
        }
    }

    #[test]
    fn test_always_fails_at_full_probability() {
        let work = SimulatedWork::new(&workload(0, 0, 1.0), InterruptSignal::new());
        for i in 0..50 {
            assert!(matches!(
                work.run(&format!("order-{i}")),
                WorkOutcome::Retryable { .. }
            ));
        }
    }

    #[test]
    fn test_latency_within_range() {
        let work = SimulatedWork::new(&workload(15, 20, 0.0), InterruptSignal::new());
        let start = Instant::now();
        assert!(work.run("order-1").is_completed());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_interrupted_work_aborts() {
        let signal = InterruptSignal::new();
        signal.interrupt();
        let work = SimulatedWork::new(&workload(1_000, 2_000, 1.0), signal.clone());

        let start = Instant::now();
        assert_eq!(work.run("order-1"), WorkOutcome::Interrupted);
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(signal.is_interrupted());
    }
}
