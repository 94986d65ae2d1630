//! Cancellation context for blocking operations.
//!
//! Every external call made by a session checks the caller's context first.
//! Cancelling stops the next step from starting; it cannot undo a step that
//! already completed (a log entry, once recorded, stays recorded).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Returned when a context is cancelled or its deadline has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Errors that can carry a cancellation from a capability call.
pub trait CancelAware {
    fn is_cancelled(&self) -> bool;
}

#[derive(Debug)]
struct ContextState {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// Shared cancellation handle passed to every operation.
///
/// Clones observe the same cancellation flag.
#[derive(Debug, Clone)]
pub struct Context {
    state: Arc<ContextState>,
}

impl Context {
    /// A context that is never cancelled unless [`Context::cancel`] is called.
    pub fn background() -> Self {
        Self {
            state: Arc::new(ContextState {
                cancelled: AtomicBool::new(false),
                deadline: None,
            }),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            state: Arc::new(ContextState {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
            }),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
            || self
                .state
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.state.deadline
    }

    /// `Err(Cancelled)` once the context is cancelled or past its deadline.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_not_cancelled() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_visible_to_clones() {
        let ctx = Context::background();
        let clone = ctx.clone();
        ctx.cancel();
        assert_eq!(clone.check(), Err(Cancelled));
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = Context::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_future_deadline() {
        let ctx = Context::with_timeout(Duration::from_secs(60));
        assert!(!ctx.is_cancelled());
    }
}
