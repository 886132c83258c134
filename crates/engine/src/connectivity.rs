//! Device connectivity signal.
//!
//! [`ConnectivityMonitor`] holds the current online flag, read synchronously
//! right before each uplink attempt, and lets the sync tasks wait for the
//! offline → online transition. [`run_probe`] keeps the flag current by
//! periodically calling a health check.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared online/offline flag. Cloning shares the flag.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    online: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self {
            online: Arc::new(tx),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Update the flag. Returns `true` if the value changed; subscribers are
    /// only woken on an actual change.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            if online {
                tracing::info!("Connectivity restored");
            } else {
                tracing::warn!("Connectivity lost");
            }
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

/// Run `probe` every `interval` and record the result until `cancel` fires.
///
/// The first probe runs immediately.
pub async fn run_probe<F, Fut>(
    monitor: ConnectivityMonitor,
    interval: Duration,
    cancel: CancellationToken,
    mut probe: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tracing::info!(interval_secs = interval.as_secs(), "Connectivity probe started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Connectivity probe stopping");
                break;
            }
            _ = ticker.tick() => {
                let online = probe().await;
                monitor.set_online(online);
            }
        }
    }
}
