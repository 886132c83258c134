//! Event type names published by the sync engine.

/// Completed jobs were written to the remote store.
pub const UPLINK_PUSHED: &str = "uplink.pushed";

/// The remote write failed; jobs stay complete locally for the next attempt.
pub const UPLINK_FAILED: &str = "uplink.failed";

/// The device was offline when an uplink cycle fired.
pub const UPLINK_SKIPPED_OFFLINE: &str = "uplink.skipped_offline";

/// Pending jobs pulled from the remote store were applied locally.
pub const DOWNLINK_APPLIED: &str = "downlink.applied";

/// The remote read failed; the local store was left unchanged.
pub const DOWNLINK_FAILED: &str = "downlink.failed";

/// The operator purge finished.
pub const PURGE_COMPLETED: &str = "purge.completed";
