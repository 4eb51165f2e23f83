//! Sticky interrupt flag with interruptible sleeps.
//!
//! Forced shutdown raises the signal; work that sleeps through it wakes
//! early and observes the interrupt. The flag is never cleared, so anything
//! checking later still sees it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Returned when a sleep was cut short by an interrupt
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("interrupted")]
pub struct Interrupted;

#[derive(Debug, Default)]
struct Inner {
    raised: Mutex<bool>,
    wakeup: Condvar,
}

/// Shared interrupt signal
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal {
    inner: Arc<Inner>,
}

impl InterruptSignal {
    /// Create new, unraised signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every sleeper
    pub fn interrupt(&self) {
        let mut raised = self.inner.raised.lock();
        *raised = true;
        self.inner.wakeup.notify_all();
    }

    /// Check if the signal was raised
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        *self.inner.raised.lock()
    }

    /// Sleep for `duration` unless interrupted first
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the signal is or becomes raised.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.sleep_until(Instant::now() + duration)
    }

    /// Sleep until `deadline` unless interrupted first
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the signal is or becomes raised.
    pub fn sleep_until(&self, deadline: Instant) -> Result<(), Interrupted> {
        let mut raised = self.inner.raised.lock();
        loop {
            if *raised {
                return Err(Interrupted);
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            // Spurious wakeups loop back to the checks above
            let _ = self.inner.wakeup.wait_until(&mut raised, deadline);
        }
    }
}
