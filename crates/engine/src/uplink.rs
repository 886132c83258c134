//! Local → remote direction.
//!
//! The uplink watches the local store, waits for writes to settle for the
//! debounce window, then pushes every locally complete job that differs
//! from what it last pushed. There is no retry queue: a job that could not
//! be pushed is still complete locally, so the next trigger picks it up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fieldsync_core::types::JobId;
use fieldsync_core::JobStatus;
use fieldsync_db::{JobQuery, LocalStore, RemoteJobRow, RemoteStore};
use fieldsync_events::{names, EventBus, SyncEvent};

use crate::connectivity::ConnectivityMonitor;
use crate::echo::EchoGuard;
use crate::error::SyncError;

/// Result of a single uplink cycle that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UplinkOutcome {
    /// Every complete job already matches what was last pushed.
    NothingToPush,
    /// A downlink batch was in flight; the cycle was skipped.
    EchoSuppressed,
    /// `count` rows were upserted.
    Pushed { count: usize },
}

/// Pushes locally completed jobs to the remote store.
pub struct Uplink<R> {
    local: LocalStore,
    remote: Arc<R>,
    connectivity: ConnectivityMonitor,
    guard: EchoGuard,
    bus: Arc<EventBus>,
    /// Last row successfully pushed per job id.
    pushed: HashMap<JobId, RemoteJobRow>,
    /// `local_revision` covered by the last completed cycle.
    seen_local_revision: u64,
}

impl<R: RemoteStore> Uplink<R> {
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
            pushed: HashMap::new(),
            seen_local_revision: 0,
        }
    }

    /// Run one cycle immediately.
    ///
    /// Reads the complete jobs, drops the ones already pushed unchanged, and
    /// upserts the rest if the device is online. Remote failures are
    /// returned as [`SyncError::RemoteWriteFailed`] and leave the push
    /// memory untouched, so the same rows go out on the next cycle.
    pub async fn run_cycle(&mut self) -> Result<UplinkOutcome, SyncError> {
        if self.guard.is_held() {
            return Ok(UplinkOutcome::EchoSuppressed);
        }

        let completed = self
            .local
            .query_by(&JobQuery::with_status(JobStatus::Complete))
            .await?;

        let mut rows = Vec::with_capacity(completed.len());
        for job in &completed {
            match RemoteJobRow::from_job(job) {
                Ok(row) => rows.push(row),
                Err(e) => tracing::error!(job_id = %job.id, error = %e, "Uplink: unmappable job"),
            }
        }

        // Forget ids that are no longer complete locally (purged).
        self.pushed
            .retain(|id, _| rows.iter().any(|row| &row.id == id));

        let dirty: Vec<RemoteJobRow> = rows
            .into_iter()
            .filter(|row| self.pushed.get(&row.id) != Some(row))
            .collect();

        if dirty.is_empty() {
            return Ok(UplinkOutcome::NothingToPush);
        }

        if !self.connectivity.is_online() {
            self.bus.publish(
                SyncEvent::new(names::UPLINK_SKIPPED_OFFLINE)
                    .with_jobs(dirty.iter().map(|row| row.id.clone())),
            );
            return Err(SyncError::ConnectivityUnavailable);
        }

        tracing::info!(count = dirty.len(), "Uplink: pushing completed jobs");

        match self.remote.upsert(&dirty).await {
            Ok(written) => {
                let count = dirty.len();
                tracing::info!(count, written, "Uplink: payload delivered");
                self.bus.publish(
                    SyncEvent::new(names::UPLINK_PUSHED)
                        .with_jobs(dirty.iter().map(|row| row.id.clone()))
                        .with_payload(serde_json::json!({ "count": count })),
                );
                for row in dirty {
                    self.pushed.insert(row.id.clone(), row);
                }
                Ok(UplinkOutcome::Pushed { count })
            }
            Err(e) => {
                self.bus.publish(
                    SyncEvent::new(names::UPLINK_FAILED)
                        .with_jobs(dirty.iter().map(|row| row.id.clone()))
                        .with_payload(serde_json::json!({ "error": e.to_string() })),
                );
                Err(SyncError::RemoteWriteFailed(e))
            }
        }
    }

    /// Handle an expired debounce window.
    ///
    /// A window whose writes all came from the downlink is skipped unless
    /// `replay` is set (startup, reconnect). The window only counts as seen
    /// once a cycle completes, so an offline or failed attempt is retried by
    /// whatever triggers next. Returns `true` if the window should be
    /// re-armed because a downlink batch was in flight.
    async fn on_window_elapsed(&mut self, replay: bool) -> bool {
        let change = self.local.last_change();
        if !replay && change.local_revision <= self.seen_local_revision {
            tracing::debug!(
                revision = change.revision,
                "Uplink: only downlink writes since last cycle, skipping"
            );
            return false;
        }

        match self.run_cycle().await {
            Ok(UplinkOutcome::EchoSuppressed) => {
                tracing::debug!("Uplink: downlink batch in flight, deferring");
                return true;
            }
            Ok(outcome) => {
                tracing::debug!(?outcome, revision = change.revision, "Uplink cycle finished");
                self.seen_local_revision = change.local_revision;
            }
            Err(SyncError::ConnectivityUnavailable) => {
                tracing::debug!("Uplink: offline, holding payload");
            }
            Err(e @ SyncError::RemoteWriteFailed(_)) => {
                tracing::error!(error = %e, "Uplink: remote write failed, will retry on next change");
            }
            Err(e) => {
                tracing::error!(error = %e, "Uplink cycle failed");
            }
        }
        false
    }

    /// Run the debounced uplink loop until `cancel` is triggered.
    ///
    /// Each local write restarts the debounce window. A reconnect replays
    /// the current state after the same window. The first cycle runs one
    /// window after start, covering jobs completed while the engine was down.
    pub async fn run(mut self, debounce: Duration, cancel: CancellationToken) {
        let mut changes = self.local.changes();
        let mut online = self.connectivity.subscribe();
        let mut online_open = true;

        let mut deadline = Some(Instant::now() + debounce);
        let mut replay = true;

        tracing::info!(debounce_ms = debounce.as_millis() as u64, "Uplink started");

        loop {
            let window = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Uplink stopping");
                    break;
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        tracing::info!("Local store closed, uplink stopping");
                        break;
                    }
                    changes.borrow_and_update();
                    deadline = Some(Instant::now() + debounce);
                }
                changed = online.changed(), if online_open => {
                    if changed.is_err() {
                        online_open = false;
                        continue;
                    }
                    if *online.borrow_and_update() {
                        replay = true;
                        deadline = Some(Instant::now() + debounce);
                    }
                }
                _ = window => {
                    if self.on_window_elapsed(replay).await {
                        deadline = Some(Instant::now() + debounce);
                    } else {
                        deadline = None;
                        replay = false;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
