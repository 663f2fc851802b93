use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const TIMED_OUT: u8 = 2;

/// Why a stage stopped before finishing its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupt {
    #[error("Cancelled")]
    Cancelled,

    #[error("Timeout")]
    Timeout,
}

/// Token for cooperative interruption of a running stage.
///
/// Stages poll it between discrete units of work (a file, a table, a check).
/// Clone is cheap and shares state. The first reason recorded wins.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<AtomicU8>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.interrupt(CANCELLED);
    }

    pub fn expire(&self) {
        self.interrupt(TIMED_OUT);
    }

    fn interrupt(&self, reason: u8) {
        let _ = self
            .state
            .compare_exchange(RUNNING, reason, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn interrupted(&self) -> Option<Interrupt> {
        match self.state.load(Ordering::SeqCst) {
            CANCELLED => Some(Interrupt::Cancelled),
            TIMED_OUT => Some(Interrupt::Timeout),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted().is_some()
    }

    /// `Err` once cancellation or the deadline has been signalled.
    pub fn check(&self) -> Result<(), Interrupt> {
        match self.interrupted() {
            Some(interrupt) => Err(interrupt),
            None => Ok(()),
        }
    }
}
