//! Named thread factory
//!
//! Every thread gets a deterministic `{prefix}-{n}` name, `n` counting from
//! 1 per factory, so log lines and debuggers can tell workers apart.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

/// Produces uniquely named threads
#[derive(Debug)]
pub struct NamedThreadFactory {
    prefix: String,
    next: AtomicUsize,
}

impl NamedThreadFactory {
    /// Create new factory with the given name prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicUsize::new(1),
        }
    }

    /// Thread name prefix
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Reserve the next thread name
    #[must_use]
    pub fn next_name(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }

    /// Spawn a thread under the next name
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be created. The returned
    /// name is the one that was reserved.
    pub fn spawn<F>(&self, body: F) -> Result<JoinHandle<()>, (String, io::Error)>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.next_name();
        thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|e| (name, e))
    }
}
