//! Retry Scheduler - Single-Attempt Delayed Re-execution
//!
//! One dedicated timer thread holds a min-heap of pending retries ordered by
//! due time and runs each exactly once, serially, when it falls due.
//! Scheduling never blocks the caller.
//!
//! Retries are deliberately outside [`Metrics`](crate::metrics::Metrics):
//! their outcome is logged and counted in [`RetryStats`] only. A retry that
//! fails again is a permanent failure and is never rescheduled.
//!
//! # Shutdown
//!
//! [`RetryScheduler::shutdown`] refuses new retries but still fires the ones
//! already pending when they fall due. [`RetryScheduler::shutdown_now`]
//! discards pending retries.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;
use crate::error::CoreResult;
use crate::types::{Work, WorkItem, WorkOutcome};

use super::{InterruptSignal, NamedThreadFactory, RetryError};

/// A scheduled retry; discarded after its single execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRecord {
    /// Retry identifier (`{original}-retry`)
    pub id: String,
    /// Identifier of the failed item
    pub original_id: String,
    /// Delay before execution
    pub delay: Duration,
    /// When the retry was scheduled
    pub scheduled_at: Instant,
}

impl RetryRecord {
    /// Create record for `original_id`, scheduled now
    pub fn new(original_id: impl Into<String>, delay: Duration) -> Self {
        let original_id = original_id.into();
        Self {
            id: format!("{original_id}-retry"),
            original_id,
            delay,
            scheduled_at: Instant::now(),
        }
    }

    /// Earliest instant the retry may run
    #[must_use]
    pub fn due_at(&self) -> Instant {
        self.scheduled_at + self.delay
    }
}

/// Retry outcome counters
#[derive(Debug)]
pub struct RetryStats {
    /// Retries accepted for scheduling
    pub scheduled: AtomicU64,
    /// Retries that completed successfully
    pub succeeded: AtomicU64,
    /// Retries that failed again (permanent failures)
    pub failed: AtomicU64,
    /// Retries that observed an interrupt
    pub interrupted: AtomicU64,
    /// Retries refused or discarded by shutdown
    pub dropped: AtomicU64,
    /// Retries waiting for their due time
    pub pending: AtomicUsize,
    /// Smallest observed gap between scheduling and execution (microseconds)
    pub min_start_lag_us: AtomicU64,
}

impl Default for RetryStats {
    fn default() -> Self {
        Self {
            scheduled: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            interrupted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            min_start_lag_us: AtomicU64::new(u64::MAX),
        }
    }
}

impl RetryStats {
    /// Take a point-in-time snapshot
    #[must_use]
    pub fn snapshot(&self) -> RetryStatsSnapshot {
        let min_lag = self.min_start_lag_us.load(Ordering::Relaxed);
        RetryStatsSnapshot {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            min_start_lag: (min_lag != u64::MAX).then(|| Duration::from_micros(min_lag)),
        }
    }

    fn record_start_lag(&self, lag: Duration) {
        let lag_us = u64::try_from(lag.as_micros()).unwrap_or(u64::MAX - 1);
        self.min_start_lag_us.fetch_min(lag_us, Ordering::Relaxed);
    }
}

/// Point-in-time view of [`RetryStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStatsSnapshot {
    /// Retries accepted for scheduling
    pub scheduled: u64,
    /// Retries that completed successfully
    pub succeeded: u64,
    /// Permanent failures
    pub failed: u64,
    /// Retries that observed an interrupt
    pub interrupted: u64,
    /// Retries refused or discarded by shutdown
    pub dropped: u64,
    /// Retries still waiting
    pub pending: usize,
    /// Smallest observed gap between scheduling and execution
    pub min_start_lag: Option<Duration>,
}

struct ScheduledRetry {
    record: RetryRecord,
    seq: u64,
    work: Arc<dyn Work>,
}

impl ScheduledRetry {
    fn due_at(&self) -> Instant {
        self.record.due_at()
    }
}

// Reversed so BinaryHeap pops the earliest due retry first; seq keeps FIFO among equals.
impl Ord for ScheduledRetry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due_at()
            .cmp(&self.due_at())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledRetry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for ScheduledRetry {}

/// Delayed retry scheduler backed by one timer thread
pub struct RetryScheduler {
    delay: Duration,
    sender: Mutex<Option<Sender<ScheduledRetry>>>,
    done: Receiver<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<RetryStats>,
    interrupt: InterruptSignal,
    next_seq: AtomicU64,
    terminated: AtomicBool,
}

impl RetryScheduler {
    /// Start the timer thread
    ///
    /// # Errors
    ///
    /// Returns error if the timer thread cannot be spawned.
    pub fn new(config: &RetryConfig) -> CoreResult<Self> {
        let (sender, receiver) = channel::unbounded();
        let (done_tx, done) = channel::bounded(1);
        let stats = Arc::new(RetryStats::default());
        let interrupt = InterruptSignal::new();

        let timer_stats = Arc::clone(&stats);
        let timer_interrupt = interrupt.clone();
        let handle = NamedThreadFactory::new(config.thread_name.clone())
            .spawn(move || {
                timer_loop(&receiver, &timer_stats, &timer_interrupt);
                let _ = done_tx.send(());
            })
            .map_err(|(name, e)| RetryError::SpawnFailed {
                reason: format!("{name}: {e}"),
            })?;

        tracing::info!(delay_ms = config.delay_ms, "Retry scheduler started");

        Ok(Self {
            delay: config.delay(),
            sender: Mutex::new(Some(sender)),
            done,
            handle: Mutex::new(Some(handle)),
            stats,
            interrupt,
            next_seq: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
        })
    }

    /// Schedule the single retry of `item` after the configured delay
    ///
    /// # Errors
    ///
    /// Returns error if the scheduler is shut down.
    pub fn schedule_retry(&self, item: &WorkItem) -> Result<RetryRecord, RetryError> {
        self.schedule_retry_after(item.id(), item.work(), self.delay)
    }

    /// Schedule one invocation of `work` under `{item_id}-retry` after `delay`
    ///
    /// # Errors
    ///
    /// Returns error if the scheduler is shut down.
    pub fn schedule_retry_after(
        &self,
        item_id: &str,
        work: Arc<dyn Work>,
        delay: Duration,
    ) -> Result<RetryRecord, RetryError> {
        let record = RetryRecord::new(item_id, delay);
        let retry = ScheduledRetry {
            record: record.clone(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            work,
        };

        // Counted before sending so the timer thread never decrements first
        self.stats.pending.fetch_add(1, Ordering::Relaxed);
        let sent = self
            .sender
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(retry).is_ok());
        if !sent {
            self.stats.pending.fetch_sub(1, Ordering::Relaxed);
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(item_id, "Retry refused, scheduler is shut down");
            return Err(RetryError::ShutDown {
                item_id: item_id.to_string(),
            });
        }

        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            retry_id = %record.id,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Retry scheduled"
        );
        Ok(record)
    }

    /// Refuse new retries; pending ones still fire when due
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            tracing::info!(
                pending = self.stats.pending.load(Ordering::Relaxed),
                "Retry scheduler shutting down"
            );
        }
    }

    /// Refuse new retries and discard pending ones
    pub fn shutdown_now(&self) {
        self.sender.lock().take();
        self.interrupt.interrupt();
        tracing::warn!(
            pending = self.stats.pending.load(Ordering::Relaxed),
            "Retry scheduler forced to terminate"
        );
    }

    /// Wait for the timer thread to exit after shutdown
    ///
    /// Returns `false` if the timeout elapsed first.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        if self.terminated.load(Ordering::Acquire) {
            return true;
        }

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.lock().take() {
                    if handle.join().is_err() {
                        tracing::error!("Retry timer thread panicked");
                    }
                }
                self.terminated.store(true, Ordering::Release);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Check if new retries are refused
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Configured retry delay
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Outcome counters
    #[must_use]
    pub fn stats(&self) -> RetryStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(receiver: &Receiver<ScheduledRetry>, stats: &RetryStats, interrupt: &InterruptSignal) {
    let mut pending: BinaryHeap<ScheduledRetry> = BinaryHeap::new();
    let mut disconnected = false;

    loop {
        if interrupt.is_interrupted() {
            let discarded = pending.len() + receiver.try_iter().count();
            stats.dropped.fetch_add(discarded as u64, Ordering::Relaxed);
            stats.pending.fetch_sub(discarded, Ordering::Relaxed);
            if discarded > 0 {
                tracing::warn!(discarded, "Pending retries discarded");
            }
            break;
        }

        while pending
            .peek()
            .is_some_and(|next| next.due_at() <= Instant::now())
        {
            if let Some(retry) = pending.pop() {
                run_retry(retry, stats);
            }
        }

        let next_due = pending.peek().map(ScheduledRetry::due_at);
        if disconnected {
            match next_due {
                None => break,
                // An interrupt is picked up at the top of the loop
                Some(due) => {
                    let _ = interrupt.sleep_until(due);
                }
            }
            continue;
        }

        let received = match next_due {
            Some(due) => receiver.recv_deadline(due),
            None => receiver
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(retry) => pending.push(retry),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => disconnected = true,
        }
    }

    tracing::debug!("Retry timer thread exiting");
}

fn run_retry(retry: ScheduledRetry, stats: &RetryStats) {
    stats.pending.fetch_sub(1, Ordering::Relaxed);
    let lag = retry.record.scheduled_at.elapsed();
    stats.record_start_lag(lag);

    let ScheduledRetry { record, work, .. } = retry;
    let lag_ms = u64::try_from(lag.as_millis()).unwrap_or(u64::MAX);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work.run(&record.id)));

    match outcome {
        Ok(WorkOutcome::Completed) => {
            stats.succeeded.fetch_add(1, Ordering::Relaxed);
            tracing::info!(retry_id = %record.id, lag_ms, "Retry succeeded");
        }
        Ok(WorkOutcome::Retryable { reason }) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                retry_id = %record.id,
                lag_ms,
                %reason,
                "Retry failed, giving up"
            );
        }
        Ok(WorkOutcome::Interrupted) => {
            stats.interrupted.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(retry_id = %record.id, "Retry interrupted");
        }
        Err(_) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(retry_id = %record.id, "Retry panicked, giving up");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn scheduler(delay_ms: u64) -> RetryScheduler {
        let config = RetryConfig {
            delay_ms,
            thread_name: "test-retry".to_string(),
        };
        #[allow(clippy::unwrap_used)]
        RetryScheduler::new(&config).unwrap()
    }

    #[test]
    fn test_retry_runs_after_delay() {
        let scheduler = scheduler(100);
        let (tx, rx) = channel::unbounded();
        let work: Arc<dyn Work> = Arc::new(move |id: &str| {
            let _ = tx.send((id.to_string(), Instant::now(), thread::current().name().map(str::to_owned)));
            WorkOutcome::Completed
        });

        let record = scheduler.schedule_retry(&WorkItem::new("order-9", work));
        assert!(record.is_ok());

        let received = rx.recv_timeout(Duration::from_secs(5));
        assert!(received.is_ok());
        if let (Ok(record), Ok((id, ran_at, thread_name))) = (record, received) {
            assert_eq!(id, "order-9-retry");
            assert_eq!(record.original_id, "order-9");
            assert!(ran_at.duration_since(record.scheduled_at) >= Duration::from_millis(100));
            assert_eq!(thread_name.as_deref(), Some("test-retry-1"));
        }

        scheduler.shutdown();
        assert!(scheduler.await_termination(Duration::from_secs(5)));
        let stats = scheduler.stats();
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.succeeded, 1);
        assert!(stats.min_start_lag >= Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_runs_in_due_order() {
        let scheduler = scheduler(0);
        let (tx, rx) = channel::unbounded();

        for (id, delay_ms) in [("late", 120), ("early", 20), ("middle", 60)] {
            let tx = tx.clone();
            let work: Arc<dyn Work> = Arc::new(move |id: &str| {
                let _ = tx.send(id.to_string());
                WorkOutcome::Completed
            });
            assert!(scheduler
                .schedule_retry_after(id, work, Duration::from_millis(delay_ms))
                .is_ok());
        }

        scheduler.shutdown();
        assert!(scheduler.await_termination(Duration::from_secs(5)));
        let order: Vec<String> = rx.try_iter().collect();
        assert_eq!(order, vec!["early-retry", "middle-retry", "late-retry"]);
    }

    #[test]
    fn test_second_failure_is_permanent() {
        let scheduler = scheduler(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let work: Arc<dyn Work> = Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            WorkOutcome::retryable("still broken")
        });

        assert!(scheduler.schedule_retry(&WorkItem::new("order-1", work)).is_ok());
        scheduler.shutdown();
        assert!(scheduler.await_termination(Duration::from_secs(5)));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = scheduler.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn test_schedule_after_shutdown_refused() {
        let scheduler = scheduler(10);
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());

        let work: Arc<dyn Work> = Arc::new(|_: &str| WorkOutcome::Completed);
        let result = scheduler.schedule_retry(&WorkItem::new("order-2", work));
        assert!(matches!(result, Err(RetryError::ShutDown { .. })));
        assert!(scheduler.await_termination(Duration::from_secs(5)));
        assert_eq!(scheduler.stats().dropped, 1);
    }

    #[test]
    fn test_shutdown_now_discards_pending() {
        let scheduler = scheduler(10_000);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let work: Arc<dyn Work> = Arc::new(move |_: &str| {
            flag.store(true, Ordering::SeqCst);
            WorkOutcome::Completed
        });

        assert!(scheduler.schedule_retry(&WorkItem::new("order-3", work)).is_ok());
        scheduler.shutdown();
        assert!(!scheduler.await_termination(Duration::from_millis(50)));

        scheduler.shutdown_now();
        assert!(scheduler.await_termination(Duration::from_secs(5)));
        assert!(!ran.load(Ordering::SeqCst));
        let stats = scheduler.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.pending, 0);
    }
}
