use fieldsync_db::{MappingError, StoreError};

/// Failure taxonomy of a sync cycle.
///
/// None of these are fatal. Remote failures are logged at the uplink and
/// downlink boundary and retried by the next trigger; only the purge
/// reports its outcome to the operator.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The device is offline; the cycle is skipped.
    #[error("Connectivity unavailable")]
    ConnectivityUnavailable,

    /// The remote upsert failed. Jobs stay complete locally.
    #[error("Remote write failed: {0}")]
    RemoteWriteFailed(#[source] StoreError),

    /// The remote select failed. The local store is left unchanged.
    #[error("Remote read failed: {0}")]
    RemoteReadFailed(#[source] StoreError),

    /// A record could not be mapped between the two shapes.
    #[error("Schema mapping mismatch: {0}")]
    SchemaMappingMismatch(#[from] MappingError),

    #[error("Local store error: {0}")]
    Local(#[from] StoreError),
}
