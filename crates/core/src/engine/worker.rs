//! Worker Pool - Bounded Thread Pool with Pluggable Backpressure
//!
//! Holds between `core_threads` and `max_threads` named OS threads fed by a
//! bounded crossbeam channel. Admission order for a new job:
//!
//! 1. start a worker while fewer than `core_threads` exist
//! 2. otherwise put the job on the bounded queue
//! 3. if the queue is full, start a worker while fewer than `max_threads` exist
//! 4. otherwise hand the job to the [`RejectionPolicy`]
//!
//! Workers above `core_threads` retire after `keep_alive` without work.
//!
//! Shutdown is two-phase. [`WorkerPool::shutdown`] closes admissions and lets
//! queued and running work drain; [`WorkerPool::await_termination`] waits for
//! that with a timeout. [`WorkerPool::shutdown_now`] abandons whatever is still
//! queued and raises the pool's [`InterruptSignal`] for in-flight work.
//! Abandoned work is an accepted loss, not an error.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;
use crate::error::CoreResult;

use super::backpressure::{RejectionContext, RejectionPolicy};
use super::{Admission, InterruptSignal, Job, NamedThreadFactory, PoolResult};

const RUNNING: u8 = 0;
const SHUTDOWN: u8 = 1;
const STOP: u8 = 2;

/// Pool lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolState {
    /// Accepting work
    Running,
    /// Draining queued and running work, no new admissions
    ShutDown,
    /// Forced termination, queued work abandoned
    Stopped,
}

/// Point-in-time pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatsSnapshot {
    /// Live worker threads
    pub pool_size: usize,
    /// Workers currently running a job
    pub active_count: usize,
    /// Jobs waiting in the queue
    pub queued: usize,
    /// Jobs finished by pool workers
    pub completed_tasks: u64,
    /// Highest worker count reached
    pub largest_pool_size: usize,
    /// Jobs that panicked on a worker
    pub panicked_tasks: u64,
    /// Queued jobs discarded by forced termination
    pub abandoned_tasks: u64,
}

/// State shared between the pool handle and its workers
struct Shared {
    core_threads: usize,
    max_threads: usize,
    queue_capacity: usize,
    keep_alive: Duration,
    receiver: Receiver<Job>,
    state: AtomicU8,
    workers: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
    abandoned: AtomicU64,
    largest: AtomicUsize,
    exit_lock: Mutex<()>,
    all_exited: Condvar,
    interrupt: InterruptSignal,
}

impl Shared {
    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn is_stopped(&self) -> bool {
        self.state() == STOP
    }

    /// Claim a worker slot below `bound` while running
    fn reserve_slot(&self, bound: usize) -> bool {
        let mut current = self.workers.load(Ordering::Acquire);
        loop {
            if self.state() != RUNNING || current >= bound {
                return false;
            }
            match self.workers.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.largest.fetch_max(current + 1, Ordering::Relaxed);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release_slot(&self) {
        let _guard = self.exit_lock.lock();
        self.workers.fetch_sub(1, Ordering::AcqRel);
        self.all_exited.notify_all();
    }
}

/// One worker thread's view of the pool
struct Worker {
    shared: Arc<Shared>,
    retired: bool,
}

impl Worker {
    const fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            retired: false,
        }
    }

    fn run(mut self, first: Option<Job>) {
        let mut next = first;
        loop {
            let job = match next.take() {
                Some(job) => job,
                None => match self.next_job() {
                    Some(job) => job,
                    None => break,
                },
            };

            if self.shared.is_stopped() {
                self.shared.abandoned.fetch_add(1, Ordering::Relaxed);
                break;
            }

            self.shared.active.fetch_add(1, Ordering::AcqRel);
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                self.shared.panicked.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    worker = std::thread::current().name().unwrap_or("unnamed"),
                    "Job panicked on worker"
                );
            }
            self.shared.active.fetch_sub(1, Ordering::AcqRel);
            self.shared.completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Block for the next job; `None` means this worker should exit
    fn next_job(&mut self) -> Option<Job> {
        loop {
            if self.shared.is_stopped() {
                return None;
            }

            let current = self.shared.workers.load(Ordering::Acquire);
            if current <= self.shared.core_threads {
                return self.shared.receiver.recv().ok();
            }

            match self.shared.receiver.recv_timeout(self.shared.keep_alive) {
                Ok(job) => return Some(job),
                Err(RecvTimeoutError::Disconnected) => return None,
                Err(RecvTimeoutError::Timeout) => {
                    if self.try_retire() {
                        tracing::debug!(
                            worker = std::thread::current().name().unwrap_or("unnamed"),
                            "Reclaimed idle worker after keep-alive"
                        );
                        return None;
                    }
                }
            }
        }
    }

    /// Give up a slot above `core_threads`
    fn try_retire(&mut self) -> bool {
        let mut current = self.shared.workers.load(Ordering::Acquire);
        while current > self.shared.core_threads {
            match self.shared.workers.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.retired = true;
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
        false
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _guard = self.shared.exit_lock.lock();
        if !self.retired {
            self.shared.workers.fetch_sub(1, Ordering::AcqRel);
        }
        self.shared.all_exited.notify_all();
    }
}

/// Bounded worker pool
pub struct WorkerPool {
    shared: Arc<Shared>,
    sender: RwLock<Option<Sender<Job>>>,
    factory: NamedThreadFactory,
    policy: Arc<dyn RejectionPolicy>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create new worker pool; threads start on demand
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(config: &PoolConfig, policy: Arc<dyn RejectionPolicy>) -> CoreResult<Self> {
        config.validate()?;

        let (sender, receiver) = channel::bounded(config.queue_capacity);

        tracing::info!(
            core_threads = config.core_threads,
            max_threads = config.max_threads,
            queue_capacity = config.queue_capacity,
            keep_alive_ms = config.keep_alive_ms,
            policy = policy.name(),
            "Worker pool created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                core_threads: config.core_threads,
                max_threads: config.max_threads,
                queue_capacity: config.queue_capacity,
                keep_alive: config.keep_alive(),
                receiver,
                state: AtomicU8::new(RUNNING),
                workers: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
                abandoned: AtomicU64::new(0),
                largest: AtomicUsize::new(0),
                exit_lock: Mutex::new(()),
                all_exited: Condvar::new(),
                interrupt: InterruptSignal::new(),
            }),
            sender: RwLock::new(Some(sender)),
            factory: NamedThreadFactory::new(config.thread_name_prefix.clone()),
            policy,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Submit a job
    ///
    /// Only blocks when the rejection policy runs the job on this thread.
    ///
    /// # Errors
    ///
    /// Returns error only if the rejection policy refuses the job.
    pub fn execute(&self, job: Job) -> PoolResult<Admission> {
        if !self.is_running() {
            return self.reject(job);
        }

        let job = match self.add_worker(job, self.shared.core_threads) {
            Ok(()) => return Ok(Admission::Started),
            Err(job) => job,
        };

        let job = match self.enqueue(job) {
            Ok(()) => return self.ensure_queue_served(),
            Err(job) => job,
        };

        match self.add_worker(job, self.shared.max_threads) {
            Ok(()) => Ok(Admission::Started),
            Err(job) => self.reject(job),
        }
    }

    /// Stop admissions; queued and running work keeps draining
    pub fn shutdown(&self) {
        if self
            .shared
            .state
            .compare_exchange(RUNNING, SHUTDOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.sender.write().take();
            tracing::info!(
                queued = self.shared.receiver.len(),
                active = self.shared.active.load(Ordering::Acquire),
                "Worker pool shutting down"
            );
        }
    }

    /// Force termination: abandon queued jobs and interrupt in-flight work
    ///
    /// Returns the number of queued jobs discarded.
    pub fn shutdown_now(&self) -> usize {
        self.shared.state.store(STOP, Ordering::Release);
        self.sender.write().take();
        self.shared.interrupt.interrupt();

        let abandoned = self.shared.receiver.try_iter().count();
        self.shared
            .abandoned
            .fetch_add(abandoned as u64, Ordering::Relaxed);

        tracing::warn!(
            abandoned,
            active = self.shared.active.load(Ordering::Acquire),
            "Worker pool forced to terminate"
        );
        abandoned
    }

    /// Wait until every worker exited after shutdown
    ///
    /// Returns `false` if the timeout elapsed first or the pool was never
    /// shut down.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        {
            let mut guard = self.shared.exit_lock.lock();
            while self.is_running() || self.shared.workers.load(Ordering::Acquire) > 0 {
                if self
                    .shared
                    .all_exited
                    .wait_until(&mut guard, deadline)
                    .timed_out()
                {
                    break;
                }
            }
        }

        let terminated = self.is_terminated();
        if terminated {
            self.join_workers();
        }
        terminated
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> PoolState {
        match self.shared.state() {
            RUNNING => PoolState::Running,
            SHUTDOWN => PoolState::ShutDown,
            _ => PoolState::Stopped,
        }
    }

    /// Check if pool accepts work
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.state() == RUNNING
    }

    /// Check if shutdown was requested
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        !self.is_running()
    }

    /// Check if shutdown was requested and every worker exited
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.shared.workers.load(Ordering::Acquire) == 0
    }

    /// Signal raised by forced termination
    #[must_use]
    pub fn interrupt_signal(&self) -> InterruptSignal {
        self.shared.interrupt.clone()
    }

    /// Configured core thread count
    #[must_use]
    pub fn core_threads(&self) -> usize {
        self.shared.core_threads
    }

    /// Configured max thread count
    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.shared.max_threads
    }

    /// Configured queue capacity
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.shared.queue_capacity
    }

    /// Current occupancy
    #[must_use]
    pub fn stats(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            pool_size: self.shared.workers.load(Ordering::Acquire),
            active_count: self.shared.active.load(Ordering::Acquire),
            queued: self.shared.receiver.len(),
            completed_tasks: self.shared.completed.load(Ordering::Relaxed),
            largest_pool_size: self.shared.largest.load(Ordering::Relaxed),
            panicked_tasks: self.shared.panicked.load(Ordering::Relaxed),
            abandoned_tasks: self.shared.abandoned.load(Ordering::Relaxed),
        }
    }

    fn reject(&self, job: Job) -> PoolResult<Admission> {
        let context = RejectionContext {
            shutting_down: self.is_shutdown(),
            max_threads: self.shared.max_threads,
            queue_capacity: self.shared.queue_capacity,
        };
        self.policy.rejected(job, &context)
    }

    fn enqueue(&self, job: Job) -> Result<(), Job> {
        let sender = self.sender.read();
        match sender.as_ref() {
            Some(tx) => tx.try_send(job).map_err(TrySendError::into_inner),
            None => Err(job),
        }
    }

    /// Start a worker whose first job is `first`, or hand `first` back
    fn add_worker(&self, first: Job, bound: usize) -> Result<(), Job> {
        if !self.shared.reserve_slot(bound) {
            return Err(first);
        }

        let slot = Arc::new(Mutex::new(Some(first)));
        if self.spawn_worker(Arc::clone(&slot)) {
            return Ok(());
        }
        // Spawn failed, so the job never left the slot
        let job = slot.lock().take();
        job.map_or(Ok(()), Err)
    }

    /// Start a worker with no first job
    fn add_idle_worker(&self) -> bool {
        self.shared.reserve_slot(self.shared.max_threads)
            && self.spawn_worker(Arc::new(Mutex::new(None)))
    }

    /// Make sure a just-queued job has a worker to run it
    ///
    /// When no worker exists and none can be started (shutdown raced the
    /// submission, or the spawn failed) a queued job is taken back and handed
    /// to the rejection policy instead of being stranded.
    fn ensure_queue_served(&self) -> PoolResult<Admission> {
        if self.shared.workers.load(Ordering::Acquire) > 0 || self.add_idle_worker() {
            return Ok(Admission::Queued);
        }
        if self.shared.workers.load(Ordering::Acquire) > 0 {
            return Ok(Admission::Queued);
        }

        match self.shared.receiver.try_recv() {
            Ok(orphan) => {
                tracing::warn!(
                    shutting_down = self.is_shutdown(),
                    "Queued job has no worker, handing it to the rejection policy"
                );
                self.reject(orphan)
            }
            // Another worker already took it
            Err(_) => Ok(Admission::Queued),
        }
    }

    /// Spawn a thread for an already reserved slot
    fn spawn_worker(&self, slot: Arc<Mutex<Option<Job>>>) -> bool {
        let shared = Arc::clone(&self.shared);
        let spawned = self.factory.spawn(move || {
            let first = slot.lock().take();
            Worker::new(shared).run(first);
        });

        match spawned {
            Ok(handle) => {
                let mut handles = self.handles.lock();
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
                true
            }
            Err((name, e)) => {
                self.shared.release_slot();
                tracing::error!(thread = %name, error = %e, "Failed to spawn worker thread");
                false
            }
        }
    }

    fn join_workers(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked outside a job");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
