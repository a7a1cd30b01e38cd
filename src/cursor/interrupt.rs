//! Cooperative cancellation
//!
//! A kill request only sets a flag. The cursor polls it at the top of
//! `advance()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared kill flag for one cursor
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    killed: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from any thread.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}
