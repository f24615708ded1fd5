//! Wall-clock budget shared by the long-running estimators.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::TimeoutError;

/// Deadline plus a cancellation flag that can be shared across workers.
///
/// A budget without a limit never expires but can still be cancelled.
#[derive(Debug, Clone)]
pub struct TimeBudget {
    started: Instant,
    limit: Option<Duration>,
    cancelled: Arc<AtomicBool>,
}

impl TimeBudget {
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn from_millis(limit_ms: Option<u64>) -> Self {
        Self {
            limit: limit_ms.map(Duration::from_millis),
            ..Self::unlimited()
        }
    }

    /// Restart the clock while keeping the same limit and cancellation flag
    #[must_use]
    pub fn restarted(&self) -> Self {
        Self {
            started: Instant::now(),
            limit: self.limit,
            cancelled: self.cancelled.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn limit_ms(&self) -> u64 {
        self.limit.map_or(0, |l| l.as_millis() as u64)
    }

    #[must_use]
    pub fn expired(&self) -> bool {
        self.is_cancelled() || self.limit.is_some_and(|l| self.started.elapsed() >= l)
    }

    /// Error out when the budget is spent
    pub fn check(&self, operation: &'static str) -> Result<(), TimeoutError> {
        if self.expired() {
            Err(TimeoutError {
                operation,
                budget_ms: self.limit_ms(),
            })
        } else {
            Ok(())
        }
    }
}

impl Default for TimeBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}
