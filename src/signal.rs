//! Interrupt handling for the CLI.
//!
//! First SIGINT/SIGTERM cancels the in-flight operation's [`Context`]; the
//! operation stops before its next external call and the process exits with
//! [`EXIT_CODE_CANCELLED`]. A second signal exits immediately.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::context::Context;

/// Exit code for cancelled operations
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// What to do with a received signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    CancelContext,
    ImmediateExit,
    Ignore,
}

/// Counts signals and cancels the context on the first one.
#[derive(Debug, Clone)]
pub struct SignalState {
    ctx: Context,
    count: Arc<AtomicU8>,
}

impl SignalState {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            count: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn signal_count(&self) -> u8 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn handle_signal(&self) -> SignalAction {
        match self.count.fetch_add(1, Ordering::SeqCst) {
            0 => {
                self.ctx.cancel();
                SignalAction::CancelContext
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }
}

/// Install the process-wide handler. Call once at startup.
pub fn install(ctx: &Context) -> Result<SignalState, ctrlc::Error> {
    let state = SignalState::new(ctx.clone());
    let handler_state = state.clone();
    ctrlc::set_handler(move || match handler_state.handle_signal() {
        SignalAction::CancelContext => {
            eprintln!("\nReceived interrupt, cancelling...");
        }
        SignalAction::ImmediateExit => {
            eprintln!("\nReceived second interrupt, exiting immediately");
            std::process::exit(EXIT_CODE_CANCELLED);
        }
        SignalAction::Ignore => {}
    })?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_cancels_context() {
        let ctx = Context::background();
        let state = SignalState::new(ctx.clone());

        assert_eq!(state.handle_signal(), SignalAction::CancelContext);
        assert!(ctx.is_cancelled());
        assert_eq!(state.signal_count(), 1);
    }

    #[test]
    fn test_second_signal_exits() {
        let state = SignalState::new(Context::background());
        state.handle_signal();
        assert_eq!(state.handle_signal(), SignalAction::ImmediateExit);
        assert_eq!(state.handle_signal(), SignalAction::Ignore);
        assert_eq!(state.signal_count(), 3);
    }
}
