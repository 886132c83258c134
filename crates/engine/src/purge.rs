//! Operator purge: final push of completed jobs, then a full local clear.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use fieldsync_core::JobStatus;
use fieldsync_db::{JobQuery, LocalStore, RemoteJobRow, RemoteStore, WriteOrigin};
use fieldsync_events::{names, EventBus, SyncEvent};

use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncError;

/// What happened to the final push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PushOutcome {
    NothingToPush,
    Pushed { count: u64 },
    SkippedOffline,
    Failed { error: String },
}

impl PushOutcome {
    /// Whether every completed job is known to be on the remote store.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::NothingToPush | Self::Pushed { .. })
    }
}

/// Outcome of a purge, reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Completed jobs found locally before the clear.
    pub completed: usize,
    pub push: PushOutcome,
    /// Local rows deleted, pending and complete.
    pub deleted: u64,
}

impl fmt::Display for PurgeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let push = match &self.push {
            PushOutcome::NothingToPush => "nothing to push".to_string(),
            PushOutcome::Pushed { count } => format!("pushed {count}"),
            PushOutcome::SkippedOffline => "push skipped (offline)".to_string(),
            PushOutcome::Failed { error } => format!("push failed: {error}"),
        };
        write!(
            f,
            "{} completed, {push}, {} local jobs deleted",
            self.completed, self.deleted
        )
    }
}

/// Flushes completed jobs to the remote store and empties the local store.
///
/// The local clear happens whatever the push outcome, and it removes
/// pending jobs as well; the downlink repopulates those on its next pull.
/// Completed jobs that were not confirmed on the remote store are lost
/// from the device, which is why the report carries the push outcome.
pub struct PurgeCoordinator<R> {
    local: LocalStore,
    remote: Arc<R>,
    connectivity: ConnectivityMonitor,
    bus: Arc<EventBus>,
}

impl<R: RemoteStore> PurgeCoordinator<R> {
    pub fn new(
        local: LocalStore,
        remote: Arc<R>,
        connectivity: ConnectivityMonitor,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            local,
            remote,
            connectivity,
            bus,
        }
    }

    /// Run the purge. Only local store failures are returned as errors;
    /// remote failures end up in [`PurgeReport::push`].
    pub async fn purge(&self) -> Result<PurgeReport, SyncError> {
        let completed = self
            .local
            .query_by(&JobQuery::with_status(JobStatus::Complete))
            .await?;

        let rows = completed
            .iter()
            .map(RemoteJobRow::from_job)
            .collect::<Result<Vec<_>, _>>()?;

        let push = if rows.is_empty() {
            PushOutcome::NothingToPush
        } else if !self.connectivity.is_online() {
            PushOutcome::SkippedOffline
        } else {
            match self.remote.upsert(&rows).await {
                Ok(_) => PushOutcome::Pushed {
                    count: rows.len() as u64,
                },
                Err(e) => PushOutcome::Failed {
                    error: e.to_string(),
                },
            }
        };

        if !push.is_confirmed() {
            tracing::warn!(
                completed = rows.len(),
                ?push,
                "Purge: completed jobs not confirmed remotely, clearing anyway"
            );
        }

        let deleted = self
            .local
            .delete_where(&JobQuery::all(), WriteOrigin::Purge)
            .await?;

        let report = PurgeReport {
            completed: rows.len(),
            push,
            deleted,
        };
        tracing::info!(%report, "Purge completed");
        self.bus.publish(
            SyncEvent::new(names::PURGE_COMPLETED)
                .with_jobs(rows.into_iter().map(|row| row.id))
                .with_payload(serde_json::to_value(&report).unwrap_or_default()),
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
