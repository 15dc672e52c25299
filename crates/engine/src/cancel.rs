//! Cooperative cancellation for configuration runs

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// How an in-flight run should stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Finish the current resource, then stop without touching the rest
    Graceful,
    /// Finish the current resource, then mark the rest as skipped
    Abort,
}

const RUNNING: u8 = 0;
const GRACEFUL: u8 = 1;
const ABORT: u8 = 2;

/// Shared stop flag, checked by the orchestrator between resources
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicU8>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. An abort request is never downgraded to graceful.
    pub fn request(&self, mode: StopMode) {
        let wanted = match mode {
            StopMode::Graceful => GRACEFUL,
            StopMode::Abort => ABORT,
        };
        self.0.fetch_max(wanted, Ordering::SeqCst);
    }

    /// The pending stop request, if any
    pub fn requested(&self) -> Option<StopMode> {
        match self.0.load(Ordering::SeqCst) {
            RUNNING => None,
            GRACEFUL => Some(StopMode::Graceful),
            _ => Some(StopMode::Abort),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested().is_some()
    }
}
