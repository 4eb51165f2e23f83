//! End-to-end pipeline scenarios
//!
//! Drives `OrderProducer` with injected work logic and checks the accounting
//! invariants under light load, overload, transient faults and forced
//! shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use orderflow_core::engine::{AbortPolicy, DiscardPolicy, InterruptSignal};
use orderflow_core::{
    Metrics, OrderProducer, PoolConfig, SimulationConfig, SimulationReport, Work, WorkOutcome,
};
use parking_lot::Mutex;

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn scenario_config(items: u32, pool: PoolConfig) -> TestResult<SimulationConfig> {
    let mut config = SimulationConfig::test()?;
    config.pool = pool;
    config.workload.items = items;
    config.workload.burst_size = items;
    config.workload.failure_probability = 0.0;
    Ok(config)
}

fn run(config: SimulationConfig, work: impl Work + 'static) -> TestResult<SimulationReport> {
    Ok(OrderProducer::new(config)?.run_with(Arc::new(work))?)
}

fn assert_graceful(report: &SimulationReport, items: u64) {
    let m = report.metrics;
    assert_eq!(m.submitted, items);
    assert_eq!(m.accepted + m.rejected, m.submitted);
    assert_eq!(m.completed, m.submitted);
    assert!(!report.forced_pool_termination);
    assert_eq!(report.abandoned, 0);
}

/// Light load: everything completes, nothing outstanding afterwards
#[test]
fn test_light_load_completes_everything() -> TestResult<()> {
    let config = scenario_config(100, PoolConfig::sized(2, 4, 5))?;
    let report = run(config, |_: &str| WorkOutcome::Completed)?;

    assert_graceful(&report, 100);
    assert_eq!(report.pool.pool_size, 0);
    assert_eq!(report.pool.queued, 0);
    assert!(report.pool.largest_pool_size <= 4);
    assert_eq!(report.retries.scheduled, 0);
    Ok(())
}

/// Overload: the caller runs rejected items, each item runs exactly once
#[test]
fn test_overload_runs_each_item_once() -> TestResult<()> {
    let executions: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let seen = Arc::clone(&executions);
    let work = move |id: &str| {
        *seen.lock().entry(id.to_string()).or_insert(0) += 1;
        thread::sleep(Duration::from_millis(fastrand::u64(100..=200)));
        WorkOutcome::Completed
    };

    let config = scenario_config(20, PoolConfig::sized(1, 2, 2))?;
    let report = run(config, work)?;

    assert_graceful(&report, 20);
    assert!(report.metrics.rejected > 0);
    assert!(report.pool.largest_pool_size <= 2);

    let executions = executions.lock();
    assert_eq!(executions.len(), 20);
    assert!(executions.values().all(|count| *count == 1));
    assert!((1..=20).all(|n| executions.contains_key(&format!("order-{n}"))));
    Ok(())
}

/// Every first attempt fails, every retry succeeds after the delay
#[test]
fn test_transient_faults_retry_once_after_delay() -> TestResult<()> {
    let first_attempts: Arc<Mutex<HashMap<String, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
    let retry_starts: Arc<Mutex<HashMap<String, Instant>>> = Arc::new(Mutex::new(HashMap::new()));

    let first = Arc::clone(&first_attempts);
    let retries = Arc::clone(&retry_starts);
    let work = move |id: &str| {
        if let Some(original) = id.strip_suffix("-retry") {
            retries.lock().insert(original.to_string(), Instant::now());
            WorkOutcome::Completed
        } else {
            first.lock().insert(id.to_string(), Instant::now());
            WorkOutcome::retryable("simulated transient fault")
        }
    };

    let mut config = scenario_config(10, PoolConfig::sized(2, 4, 5))?;
    config.retry.delay_ms = 500;
    let report = run(config, work)?;

    // Retries are not metered
    assert_graceful(&report, 10);
    assert_eq!(report.retries.scheduled, 10);
    assert_eq!(report.retries.succeeded, 10);
    assert_eq!(report.retries.failed, 0);
    assert_eq!(report.retries.pending, 0);
    assert!(!report.forced_scheduler_termination);

    let first_attempts = first_attempts.lock();
    let retry_starts = retry_starts.lock();
    assert_eq!(retry_starts.len(), 10);
    for (id, retried_at) in retry_starts.iter() {
        let attempted_at = first_attempts
            .get(id)
            .ok_or_else(|| format!("retry without first attempt: {id}"))?;
        assert!(retried_at.duration_since(*attempted_at) >= Duration::from_millis(500));
    }
    Ok(())
}

/// A failing retry is a permanent failure and is not rescheduled
#[test]
fn test_failed_retry_is_permanent() -> TestResult<()> {
    let mut config = scenario_config(5, PoolConfig::sized(2, 4, 5))?;
    config.retry.delay_ms = 20;
    let report = run(config, |_: &str| WorkOutcome::retryable("always down"))?;

    assert_graceful(&report, 5);
    assert_eq!(report.retries.scheduled, 5);
    assert_eq!(report.retries.failed, 5);
    assert_eq!(report.retries.succeeded, 0);
    Ok(())
}

/// Shutdown timeout shorter than the outstanding work forces termination
#[test]
fn test_forced_shutdown_reports_without_error() -> TestResult<()> {
    let mut config = scenario_config(8, PoolConfig::sized(1, 1, 10))?;
    config.shutdown.pool_timeout_ms = 50;

    let producer = OrderProducer::new(config)?;
    let signal: InterruptSignal = producer.pool().interrupt_signal();
    let work = move |_: &str| {
        if signal.sleep(Duration::from_millis(300)).is_err() {
            WorkOutcome::Interrupted
        } else {
            WorkOutcome::Completed
        }
    };

    let report = producer.run_with(Arc::new(work))?;
    let m = report.metrics;

    assert!(report.forced_pool_termination);
    assert_eq!(m.submitted, 8);
    assert_eq!(m.accepted + m.rejected, m.submitted);
    assert!(m.completed <= m.accepted + m.rejected);
    assert!(report.abandoned > 0);
    assert!(report.to_string().contains("Forced termination"));
    Ok(())
}

/// Abort hands the job back; the producer runs it inline and counts a rejection
#[test]
fn test_abort_policy_falls_back_to_inline_run() -> TestResult<()> {
    let config = scenario_config(12, PoolConfig::sized(1, 1, 1))?;
    let metrics = Arc::new(Metrics::new());
    let producer = OrderProducer::with_policy(config, Arc::clone(&metrics), Arc::new(AbortPolicy))?;

    let report = producer.run_with(Arc::new(|_: &str| {
        thread::sleep(Duration::from_millis(20));
        WorkOutcome::Completed
    }))?;

    assert_graceful(&report, 12);
    assert!(report.metrics.rejected > 0);
    assert_eq!(metrics.completed(), 12);
    Ok(())
}

/// Discard drops saturated items; they are counted rejected but never run
#[test]
fn test_discard_policy_drops_saturated_items() -> TestResult<()> {
    let config = scenario_config(12, PoolConfig::sized(1, 1, 1))?;
    let metrics = Arc::new(Metrics::new());
    let policy = Arc::new(DiscardPolicy::new(Arc::clone(&metrics)));
    let producer = OrderProducer::with_policy(config, Arc::clone(&metrics), policy)?;

    let report = producer.run_with(Arc::new(|_: &str| {
        thread::sleep(Duration::from_millis(20));
        WorkOutcome::Completed
    }))?;
    let m = report.metrics;

    assert_eq!(m.submitted, 12);
    assert_eq!(m.accepted + m.rejected, m.submitted);
    assert!(m.rejected > 0);
    assert_eq!(m.completed, m.accepted);
    Ok(())
}

/// Simulated work with the default fault model keeps the graceful invariant
#[test]
fn test_simulated_workload_balances() -> TestResult<()> {
    let mut config = SimulationConfig::test()?;
    config.workload.items = 40;
    config.workload.failure_probability = 0.3;
    config.retry.delay_ms = 10;

    let report = OrderProducer::new(config)?.run()?;

    assert_graceful(&report, 40);
    assert_eq!(
        report.retries.scheduled,
        report.retries.succeeded + report.retries.failed
    );

    let json = serde_json::to_string(&report)?;
    assert!(json.contains("\"submitted\":40"));
    Ok(())
}
