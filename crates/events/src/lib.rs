//! In-process notification of sync engine activity.
//!
//! - [`EventBus`]: publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`SyncEvent`]: envelope describing one uplink, downlink or purge
//!   outcome.
//! - [`names`]: the event type strings the engine publishes.

pub mod bus;
pub mod names;

pub use bus::{EventBus, SyncEvent};
