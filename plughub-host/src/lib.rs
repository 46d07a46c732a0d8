//! plughub-host: hot-swap plugin host
//!
//! This crate hosts units behind [`Hub`]s, one lifecycle controller per
//! unit, and keeps them in a [`Hubs`] registry that hot-swaps newer
//! versions in place and fans named operations out across every unit
//! that exposes them.

pub mod bridge;
pub mod config;
pub mod error;
pub mod hub;
pub mod hubs;
pub mod memory;
pub mod status;
#[cfg(feature = "subscriber")]
pub mod tracing_support;
pub mod watcher;

pub use config::{HubsConfig, LoadOptions, DEFAULT_CHANNEL_CAPACITY};
pub use error::HubError;
pub use hub::{CallReceiver, CallResult, Hub, HubKind};
pub use hubs::Hubs;
pub use memory::{MemoryUnit, MemoryUnitBuilder};
pub use plughub_api::{
    Operation, OperationTable, Unit, UnitError, UnitId, UnitType, Value, Version,
};
pub use status::{status_name, HubStatus};
pub use tokio_util::sync::CancellationToken;
pub use watcher::{HotSwapWatcher, UnitSource, WatcherConfig, WatcherError};
