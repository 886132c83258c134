//! Wiring of the sync directions into background tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fieldsync_db::{LocalStore, RemoteStore};
use fieldsync_events::EventBus;

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::downlink::Downlink;
use crate::echo::EchoGuard;
use crate::error::SyncError;
use crate::purge::{PurgeCoordinator, PurgeReport};
use crate::uplink::Uplink;

/// How long [`SyncHandle::shutdown`] waits for each task to stop.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the shared pieces of one device's sync engine.
///
/// Every component built from the same engine shares the local store,
/// remote store, connectivity flag, echo guard and event bus.
pub struct SyncEngine<R> {
    local: LocalStore,
    remote: Arc<R>,
    connectivity: ConnectivityMonitor,
    guard: EchoGuard,
    bus: Arc<EventBus>,
    config: SyncConfig,
    assignee: Option<String>,
}

impl<R> SyncEngine<R>
where
    R: RemoteStore + 'static,
{
    pub fn new(
        local: LocalStore,
        remote: Arc<R>,
        connectivity: ConnectivityMonitor,
        config: SyncConfig,
    ) -> Self {
        Self {
            local,
            remote,
            connectivity,
            guard: EchoGuard::new(),
            bus: Arc::new(EventBus::default()),
            config,
            assignee: None,
        }
    }

    /// Publish engine events on an existing bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Only pull jobs assigned to `assignee`.
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn uplink(&self) -> Uplink<R> {
        Uplink::new(
            self.local.clone(),
            Arc::clone(&self.remote),
            self.connectivity.clone(),
            self.guard.clone(),
            Arc::clone(&self.bus),
        )
    }

    pub fn downlink(&self) -> Downlink<R> {
        let downlink = Downlink::new(
            self.local.clone(),
            Arc::clone(&self.remote),
            self.connectivity.clone(),
            self.guard.clone(),
            Arc::clone(&self.bus),
        );
        match &self.assignee {
            Some(assignee) => downlink.for_assignee(assignee.clone()),
            None => downlink,
        }
    }

    pub fn purge_coordinator(&self) -> PurgeCoordinator<R> {
        PurgeCoordinator::new(
            self.local.clone(),
            Arc::clone(&self.remote),
            self.connectivity.clone(),
            Arc::clone(&self.bus),
        )
    }

    /// Spawn the uplink and downlink tasks. Both stop when `cancel` fires
    /// or when [`SyncHandle::shutdown`] is called.
    pub fn start(&self, cancel: CancellationToken) -> SyncHandle<R> {
        let refresh = Arc::new(Notify::new());

        let uplink_handle = tokio::spawn(self.uplink().run(self.config.debounce, cancel.clone()));
        let downlink_handle =
            tokio::spawn(self.downlink().run(Arc::clone(&refresh), cancel.clone()));

        tracing::info!(
            debounce_ms = self.config.debounce.as_millis() as u64,
            assignee = self.assignee.as_deref(),
            "Sync engine started"
        );

        SyncHandle {
            cancel,
            refresh,
            purge: self.purge_coordinator(),
            bus: Arc::clone(&self.bus),
            tasks: vec![("uplink", uplink_handle), ("downlink", downlink_handle)],
        }
    }
}

/// Control surface for a running engine.
pub struct SyncHandle<R> {
    cancel: CancellationToken,
    refresh: Arc<Notify>,
    purge: PurgeCoordinator<R>,
    bus: Arc<EventBus>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl<R: RemoteStore> SyncHandle<R> {
    /// Ask the downlink to pull now.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    /// Run the operator purge, then ask the downlink to repopulate pending
    /// jobs.
    pub async fn purge(&self) -> Result<PurgeReport, SyncError> {
        let report = self.purge.purge().await?;
        self.refresh();
        Ok(report)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Cancel both tasks and wait for them to stop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, handle) in self.tasks {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Sync task stopped"),
                Ok(Err(e)) => tracing::error!(task = name, error = %e, "Sync task panicked"),
                Err(_) => tracing::warn!(task = name, "Sync task did not stop in time"),
            }
        }
        tracing::info!("Sync engine stopped");
    }
}
