//! Domain types shared by every fieldsync crate.
//!
//! Zero internal dependencies: the job model, its status and priority
//! enums, and the [`CoreError`] used by validation and status transitions.

pub mod error;
pub mod job;
pub mod status;
pub mod types;

pub use error::CoreError;
pub use job::Job;
pub use status::{JobStatus, Priority, SyncStatus};
