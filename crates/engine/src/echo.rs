//! Reentrancy guard between the downlink and the uplink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Held by the downlink while it applies a remote batch.
///
/// The uplink checks [`EchoGuard::is_held`] before each cycle and skips the
/// cycle while a downlink batch is in flight. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct EchoGuard {
    holders: Arc<AtomicUsize>,
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the guard until the returned [`EchoHold`] is dropped.
    pub fn hold(&self) -> EchoHold {
        self.holders.fetch_add(1, Ordering::SeqCst);
        EchoHold {
            holders: Arc::clone(&self.holders),
        }
    }

    pub fn is_held(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }
}

/// Releases the [`EchoGuard`] on drop, including on early returns.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the hold is dropped"]
pub struct EchoHold {
    holders: Arc<AtomicUsize>,
}

impl Drop for EchoHold {
    fn drop(&mut self) {
        self.holders.fetch_sub(1, Ordering::SeqCst);
    }
}
