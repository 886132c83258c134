//! Remote → local direction.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use fieldsync_core::{Job, SyncStatus};
use fieldsync_db::{LocalStore, RemoteFilter, RemoteStore};
use fieldsync_events::{names, EventBus, SyncEvent};

use crate::connectivity::ConnectivityMonitor;
use crate::echo::EchoGuard;
use crate::error::SyncError;

/// Counts for one pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownlinkReport {
    /// Rows returned by the remote select.
    pub fetched: usize,
    /// Local rows inserted or refreshed.
    pub applied: u64,
    /// Rows dropped because they were not pending or could not be mapped.
    pub skipped: usize,
}

/// Pulls pending jobs from the remote store into the local store.
///
/// Rows are merged, never blindly overwritten: a job the technician has
/// already started or finished on the device keeps its local state.
pub struct Downlink<R> {
    local: LocalStore,
    remote: Arc<R>,
    connectivity: ConnectivityMonitor,
    guard: EchoGuard,
    bus: Arc<EventBus>,
    filter: RemoteFilter,
}

impl<R: RemoteStore> Downlink<R> {
    pub fn new(
        local: LocalStore,
        remote: Arc<R>,
        connectivity: ConnectivityMonitor,
        guard: EchoGuard,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            local,
            remote,
            connectivity,
            guard,
            bus,
            filter: RemoteFilter::status(SyncStatus::Pending),
        }
    }

    /// Restrict the pull to one technician's jobs.
    pub fn for_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.filter = self.filter.with_assignee(assignee);
        self
    }

    pub fn filter(&self) -> &RemoteFilter {
        &self.filter
    }

    /// Fetch the pending remote rows and merge them into the local store.
    ///
    /// The echo guard is held for the whole pull so the uplink ignores the
    /// resulting local writes. On a failed select nothing is written.
    pub async fn pull(&self) -> Result<DownlinkReport, SyncError> {
        if !self.connectivity.is_online() {
            return Err(SyncError::ConnectivityUnavailable);
        }

        let _hold = self.guard.hold();

        let rows = match self.remote.select(&self.filter).await {
            Ok(rows) => rows,
            Err(e) => {
                self.bus.publish(
                    SyncEvent::new(names::DOWNLINK_FAILED)
                        .with_payload(serde_json::json!({ "error": e.to_string() })),
                );
                return Err(SyncError::RemoteReadFailed(e));
            }
        };

        let fetched = rows.len();
        let mut jobs = Vec::with_capacity(fetched);
        for row in rows {
            if row.status != SyncStatus::Pending {
                tracing::warn!(job_id = %row.id, status = %row.status, "Downlink: ignoring non-pending row");
                continue;
            }
            let id = row.id.clone();
            let job = match Job::try_from(row) {
                Ok(job) => job,
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Downlink: unmappable row");
                    continue;
                }
            };
            if let Err(e) = job.check() {
                tracing::error!(job_id = %id, error = %e, "Downlink: invalid row");
                continue;
            }
            jobs.push(job);
        }
        let skipped = fetched - jobs.len();

        let applied = self.local.bulk_merge_remote(&jobs).await?;

        let report = DownlinkReport {
            fetched,
            applied,
            skipped,
        };
        tracing::info!(fetched, applied, skipped, "Downlink: batch applied");
        self.bus.publish(
            SyncEvent::new(names::DOWNLINK_APPLIED)
                .with_jobs(jobs.into_iter().map(|job| job.id))
                .with_payload(serde_json::to_value(report).unwrap_or_default()),
        );
        Ok(report)
    }

    async fn pull_logged(&self, trigger: &'static str) {
        match self.pull().await {
            Ok(_) => {}
            Err(SyncError::ConnectivityUnavailable) => {
                tracing::debug!(trigger, "Downlink: offline, skipping pull");
            }
            Err(e) => {
                tracing::error!(trigger, error = %e, "Downlink pull failed");
            }
        }
    }

    /// Pull once, then again on every remote change, explicit refresh and
    /// reconnect until `cancel` fires.
    ///
    /// The subscription is opened before the initial pull so no change
    /// committed in between is missed.
    pub async fn run(self, refresh: Arc<Notify>, cancel: CancellationToken) {
        let mut subscription = self.remote.subscribe(self.filter.clone());
        let mut online = self.connectivity.subscribe();
        let mut online_open = true;
        let mut remote_open = true;

        tracing::info!(filter = ?self.filter, "Downlink started");
        self.pull_logged("startup").await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Downlink stopping");
                    break;
                }
                change = subscription.recv(), if remote_open => {
                    match change {
                        Some(change) => {
                            let coalesced = subscription.drain();
                            tracing::debug!(?change, coalesced, "Remote change received");
                            self.pull_logged("remote_change").await;
                        }
                        None => {
                            tracing::warn!("Remote change feed closed");
                            remote_open = false;
                        }
                    }
                }
                _ = refresh.notified() => {
                    self.pull_logged("refresh").await;
                }
                changed = online.changed(), if online_open => {
                    if changed.is_err() {
                        online_open = false;
                        continue;
                    }
                    if *online.borrow_and_update() {
                        self.pull_logged("reconnect").await;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
