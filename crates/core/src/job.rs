//! The job record synchronized between the device and the shared store.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::status::{JobStatus, Priority};
use crate::types::{now_millis, JobId, Timestamp};

/// A unit of dispatched field work, in its local (device) shape.
///
/// `id` is assigned at dispatch and never regenerated; it is the only join
/// key between the local and remote stores. It is also the only field that
/// must be non-empty: dispatch may leave `assignee` or `issue` blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[validate(length(min = 1))]
    pub id: JobId,
    pub assignee: String,
    pub address: String,
    pub issue: String,
    pub notes: String,
    pub distance: String,
    pub est_time: String,
    pub priority: Priority,
    pub status: JobStatus,
    pub time_window: String,
    pub last_updated: Timestamp,
}

impl Job {
    /// Create a pending job with empty descriptive fields.
    pub fn new(id: impl Into<JobId>, assignee: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            assignee: assignee.into(),
            address: String::new(),
            issue: issue.into(),
            notes: String::new(),
            distance: String::new(),
            est_time: String::new(),
            priority: Priority::Normal,
            status: JobStatus::Pending,
            time_window: String::new(),
            last_updated: now_millis(),
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Advance `last_updated` so it is strictly greater than before, even if
    /// the wall clock has not moved or has gone backwards.
    pub fn touch(&mut self) {
        let floor = self.last_updated + Duration::milliseconds(1);
        self.last_updated = now_millis().max(floor);
    }

    /// Move the job forward through the field workflow.
    ///
    /// Steps may be skipped but never reversed. Re-applying the current
    /// status is rejected too, since it would not be a mutation.
    pub fn advance(&mut self, to: JobStatus) -> Result<(), CoreError> {
        if to <= self.status {
            return Err(CoreError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    /// Mark the job complete with its final notes.
    pub fn complete(&mut self, notes: impl Into<String>) -> Result<(), CoreError> {
        self.advance(JobStatus::Complete)?;
        self.notes = notes.into();
        Ok(())
    }

    /// Validate field constraints, mapping failures to [`CoreError`].
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
