//! Name mapping between the local job shape and the remote row shape.
//!
//! The remote table uses flat snake_case columns (`est_time`,
//! `time_window`, `last_updated` as epoch milliseconds) and only accepts the
//! synchronized statuses. Both directions of the sync go through this module.

use serde::{Deserialize, Serialize};

use fieldsync_core::types::{from_epoch_millis, to_epoch_millis, JobId};
use fieldsync_core::{Job, JobStatus, Priority, SyncStatus};

/// A row of the remote `jobs` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJobRow {
    pub id: JobId,
    pub assignee: String,
    pub address: String,
    pub issue: String,
    pub notes: String,
    pub distance: String,
    pub est_time: String,
    pub priority: Priority,
    pub status: SyncStatus,
    pub time_window: String,
    pub last_updated: i64,
}

/// A field that exists in one store's shape has no counterpart in the other.
///
/// These indicate a defect in the data or the mapping, not a transient
/// condition.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("Job {id} has status '{status}', which is not synchronized")]
    UnsyncableStatus { id: JobId, status: JobStatus },

    #[error("Row {id} has an out-of-range last_updated value {value}")]
    InvalidTimestamp { id: JobId, value: i64 },

    #[error("Row {id} has an invalid {column} value '{value}'")]
    InvalidColumn {
        id: JobId,
        column: &'static str,
        value: String,
    },
}

impl RemoteJobRow {
    /// Project a local job onto the remote shape.
    pub fn from_job(job: &Job) -> Result<Self, MappingError> {
        let status = job
            .status
            .sync_status()
            .ok_or_else(|| MappingError::UnsyncableStatus {
                id: job.id.clone(),
                status: job.status,
            })?;

        Ok(Self {
            id: job.id.clone(),
            assignee: job.assignee.clone(),
            address: job.address.clone(),
            issue: job.issue.clone(),
            notes: job.notes.clone(),
            distance: job.distance.clone(),
            est_time: job.est_time.clone(),
            priority: job.priority,
            status,
            time_window: job.time_window.clone(),
            last_updated: to_epoch_millis(job.last_updated),
        })
    }
}

impl TryFrom<RemoteJobRow> for Job {
    type Error = MappingError;

    fn try_from(row: RemoteJobRow) -> Result<Self, Self::Error> {
        let last_updated =
            from_epoch_millis(row.last_updated).ok_or_else(|| MappingError::InvalidTimestamp {
                id: row.id.clone(),
                value: row.last_updated,
            })?;

        Ok(Job {
            id: row.id,
            assignee: row.assignee,
            address: row.address,
            issue: row.issue,
            notes: row.notes,
            distance: row.distance,
            est_time: row.est_time,
            priority: row.priority,
            status: row.status.into(),
            time_window: row.time_window,
            last_updated,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
