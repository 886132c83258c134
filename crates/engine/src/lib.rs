//! Bidirectional job synchronization between the device store and the
//! shared remote store.
//!
//! - [`uplink::Uplink`] pushes locally completed jobs to the remote store.
//! - [`downlink::Downlink`] pulls pending jobs into the local store.
//! - [`echo::EchoGuard`] keeps downlink writes from being treated as local
//!   edits.
//! - [`purge::PurgeCoordinator`] flushes completed jobs and clears the device.
//! - [`engine::SyncEngine`] wires the directions into background tasks.
//!
//! The two directions never write the same status: the downlink only writes
//! pending jobs and the uplink only pushes complete ones. That partition is
//! the whole conflict strategy; there is no field-level merge.

pub mod config;
pub mod connectivity;
pub mod downlink;
pub mod echo;
pub mod engine;
pub mod error;
pub mod purge;
pub mod uplink;

pub use config::SyncConfig;
pub use connectivity::ConnectivityMonitor;
pub use downlink::{Downlink, DownlinkReport};
pub use echo::{EchoGuard, EchoHold};
pub use engine::{SyncEngine, SyncHandle};
pub use error::SyncError;
pub use purge::{PurgeCoordinator, PurgeReport, PushOutcome};
pub use uplink::{Uplink, UplinkOutcome};
