//! Orderflow Core Types
//!
//! Work items and the two-outcome result their logic reports back to the
//! orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Result of running one unit of work.
///
/// Transient faults are an expected, frequent outcome and are reported as a
/// value instead of an error so the orchestrator can pattern-match on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkOutcome {
    /// Work finished successfully
    Completed,
    /// Work failed in a way that may succeed on a single retry
    Retryable {
        /// Failure reason
        reason: String,
    },
    /// Work observed an interrupt and aborted without finishing
    Interrupted,
}

impl WorkOutcome {
    /// Create retryable outcome
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable {
            reason: reason.into(),
        }
    }

    /// Check if outcome is a success
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for WorkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Retryable { reason } => write!(f, "retryable failure: {reason}"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Executable logic behind a work item.
///
/// The same logic may be invoked twice for one item: once by a pool worker
/// and once more by the retry scheduler under the derived `-retry` id.
pub trait Work: Send + Sync {
    /// Run the logic for the given item id
    fn run(&self, item_id: &str) -> WorkOutcome;
}

impl<F> Work for F
where
    F: Fn(&str) -> WorkOutcome + Send + Sync,
{
    fn run(&self, item_id: &str) -> WorkOutcome {
        self(item_id)
    }
}

/// An identified unit of work. Immutable once created.
#[derive(Clone)]
pub struct WorkItem {
    id: String,
    work: Arc<dyn Work>,
}

impl WorkItem {
    /// Create new work item
    pub fn new(id: impl Into<String>, work: Arc<dyn Work>) -> Self {
        Self {
            id: id.into(),
            work,
        }
    }

    /// Get item identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get shared handle to the item's logic
    #[must_use]
    pub fn work(&self) -> Arc<dyn Work> {
        Arc::clone(&self.work)
    }

    /// Run the item's logic once
    #[must_use]
    pub fn run(&self) -> WorkOutcome {
        self.work.run(&self.id)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_work() {
        let item = WorkItem::new(
            "order-1",
            Arc::new(|id: &str| {
                if id.ends_with("-retry") {
                    WorkOutcome::Completed
                } else {
                    WorkOutcome::retryable("flaky")
                }
            }),
        );

        assert_eq!(item.run(), WorkOutcome::retryable("flaky"));
        assert!(item.work().run("order-1-retry").is_completed());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(WorkOutcome::Completed.to_string(), "completed");
        assert_eq!(
            WorkOutcome::retryable("timeout").to_string(),
            "retryable failure: timeout"
        );
    }
}
