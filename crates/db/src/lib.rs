//! Storage adapters for the job synchronization engine.
//!
//! - [`local::LocalStore`]: the on-device SQLite job cache with reactive
//!   subscriptions.
//! - [`remote::RemoteStore`]: the shared job table, implemented for
//!   Postgres ([`remote::postgres::PgRemoteStore`]) and in memory
//!   ([`remote::memory::MemoryRemoteStore`]).
//! - [`remote::row`]: the name mapping between the two shapes.

pub mod error;
pub mod local;
pub mod remote;

pub use error::StoreError;
pub use local::{JobQuery, LiveQuery, LiveSnapshot, LocalChange, LocalStore, WriteOrigin};
pub use remote::row::{MappingError, RemoteJobRow};
pub use remote::{ChangeOp, RemoteChange, RemoteFilter, RemoteStore, RemoteSubscription};
