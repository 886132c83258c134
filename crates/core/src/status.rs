//! Job status and priority enums.
//!
//! String forms match the values stored in the `jobs.status` and
//! `jobs.priority` columns of both stores.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Field workflow status of a job.
///
/// Only [`JobStatus::Pending`] and [`JobStatus::Complete`] ever leave the
/// device; `Traveling` and `Arrived` are local UI states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Traveling,
    Arrived,
    Complete,
}

const VALID_JOB_STATUSES: &[&str] = &["pending", "traveling", "arrived", "complete"];

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Traveling => "traveling",
            Self::Arrived => "arrived",
            Self::Complete => "complete",
        }
    }

    /// The status as seen by the sync engine, or `None` for local-only states.
    pub fn sync_status(&self) -> Option<SyncStatus> {
        match self {
            Self::Pending => Some(SyncStatus::Pending),
            Self::Complete => Some(SyncStatus::Complete),
            Self::Traveling | Self::Arrived => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "traveling" => Ok(Self::Traveling),
            "arrived" => Ok(Self::Arrived),
            "complete" => Ok(Self::Complete),
            _ => Err(CoreError::Validation(format!(
                "Invalid job status '{s}'. Must be one of: {}",
                VALID_JOB_STATUSES.join(", ")
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncStatus
// ---------------------------------------------------------------------------

/// The subset of [`JobStatus`] that crosses the synchronization boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Complete,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
        }
    }
}

impl From<SyncStatus> for JobStatus {
    fn from(value: SyncStatus) -> Self {
        match value {
            SyncStatus::Pending => JobStatus::Pending,
            SyncStatus::Complete => JobStatus::Complete,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "complete" => Ok(Self::Complete),
            _ => Err(CoreError::Validation(format!(
                "Status '{s}' is not synchronized. Must be one of: pending, complete"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Dispatch priority of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

const VALID_PRIORITIES: &[&str] = &["low", "normal", "high", "urgent"];

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(CoreError::Validation(format!(
                "Invalid priority '{s}'. Must be one of: {}",
                VALID_PRIORITIES.join(", ")
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
