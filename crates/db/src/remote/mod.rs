//! The shared remote job table.
//!
//! [`RemoteStore`] is the interface the sync engine talks to. Change
//! notifications are advisory "something changed" signals: subscribers are
//! expected to re-query rather than apply a diff.

pub mod memory;
pub mod postgres;
pub mod row;

use std::future::Future;

use serde::Deserialize;
use tokio::sync::broadcast;

use fieldsync_core::types::JobId;
use fieldsync_core::SyncStatus;

use crate::error::StoreError;
use row::RemoteJobRow;

/// Buffer capacity for change notification channels.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// RemoteFilter
// ---------------------------------------------------------------------------

/// Conjunctive filter over remote rows. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFilter {
    pub status: Option<SyncStatus>,
    pub assignee: Option<String>,
}

impl RemoteFilter {
    /// Match every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match rows with the given status.
    pub fn status(status: SyncStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn matches(&self, row: &RemoteJobRow) -> bool {
        self.status.map_or(true, |s| s == row.status)
            && self.assignee.as_deref().map_or(true, |a| a == row.assignee)
    }

    /// Whether a change notification may concern rows this filter matches.
    ///
    /// Only the status is carried by notifications, so an unknown status
    /// always passes.
    pub fn admits(&self, change: &RemoteChange) -> bool {
        match (self.status, change.status) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        }
    }
}

// ---------------------------------------------------------------------------
// RemoteChange
// ---------------------------------------------------------------------------

/// Kind of write reported by a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
    #[serde(other)]
    Unknown,
}

/// An advisory change notification for the remote `jobs` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteChange {
    pub op: ChangeOp,
    #[serde(default)]
    pub id: Option<JobId>,
    #[serde(default)]
    pub status: Option<SyncStatus>,
}

impl RemoteChange {
    /// A change about which nothing is known, e.g. after missed notifications.
    pub fn unknown() -> Self {
        Self {
            op: ChangeOp::Unknown,
            id: None,
            status: None,
        }
    }

    pub fn for_row(op: ChangeOp, row: &RemoteJobRow) -> Self {
        Self {
            op,
            id: Some(row.id.clone()),
            status: Some(row.status),
        }
    }

    /// Parse a notification payload, degrading to [`RemoteChange::unknown`]
    /// when the payload is missing or malformed.
    pub fn from_payload(payload: &str) -> Self {
        serde_json::from_str(payload).unwrap_or_else(|e| {
            tracing::debug!(error = %e, payload, "Unparseable change payload");
            Self::unknown()
        })
    }
}

// ---------------------------------------------------------------------------
// RemoteSubscription
// ---------------------------------------------------------------------------

/// A filtered stream of change notifications.
pub struct RemoteSubscription {
    receiver: broadcast::Receiver<RemoteChange>,
    filter: RemoteFilter,
}

impl RemoteSubscription {
    pub fn new(receiver: broadcast::Receiver<RemoteChange>, filter: RemoteFilter) -> Self {
        Self { receiver, filter }
    }

    /// Wait for the next change admitted by the filter.
    ///
    /// A lagged receiver yields a single [`RemoteChange::unknown`], since
    /// subscribers re-read full state anyway. Returns `None` once the
    /// notification source is gone.
    pub async fn recv(&mut self) -> Option<RemoteChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => {
                    if self.filter.admits(&change) {
                        return Some(change);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Remote change subscription lagged");
                    return Some(RemoteChange::unknown());
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Discard notifications already buffered. Returns how many were
    /// dropped; a subscriber about to re-query does not need them.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(_) => drained += 1,
                Err(broadcast::error::TryRecvError::Lagged(n)) => drained += n as usize,
                Err(_) => return drained,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RemoteStore
// ---------------------------------------------------------------------------

/// The shared job table as seen by one device.
///
/// Every operation returns a `Result`; callers never assume success.
pub trait RemoteStore: Send + Sync {
    /// Fetch all rows matching `filter`.
    fn select(
        &self,
        filter: &RemoteFilter,
    ) -> impl Future<Output = Result<Vec<RemoteJobRow>, StoreError>> + Send;

    /// Insert or replace rows by id. Returns the number of rows written.
    fn upsert(&self, rows: &[RemoteJobRow]) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Delete rows matching `filter`. Returns the number of rows deleted.
    fn delete(&self, filter: &RemoteFilter) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Subscribe to change notifications admitted by `filter`.
    fn subscribe(&self, filter: RemoteFilter) -> RemoteSubscription;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
