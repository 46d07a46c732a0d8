//! Errors surfaced by hubs and the registry

use crate::status::HubStatus;
use plughub_api::{UnitError, UnitId, UnitType, Version};
use thiserror::Error;

/// Errors returned by lifecycle operations or carried in a [`CallResult`]
///
/// [`CallResult`]: crate::CallResult
#[derive(Debug, Error)]
pub enum HubError {
    /// Operation attempted from a status that does not allow it
    #[error("Cannot {operation} while hub is {status}")]
    Status {
        operation: &'static str,
        status: HubStatus,
    },

    /// Replacement unit is not newer than the loaded one
    #[error("Unit {id}: version {offered} does not supersede loaded version {loaded}")]
    Version {
        id: UnitId,
        loaded: Version,
        offered: Version,
    },

    #[error("Unsupported unit type: {0}")]
    UnsupportedType(UnitType),

    #[error("Operation not found: {0}")]
    Lookup(String),

    #[error("No unit loaded")]
    NotLoaded,

    #[error("Unit {id} failed to initialize: {source}")]
    Initialization {
        id: UnitId,
        #[source]
        source: UnitError,
    },

    #[error("Operation {operation} failed: {source}")]
    Invocation {
        operation: String,
        #[source]
        source: UnitError,
    },

    #[error("Operation {operation} returned {actual} values, declared {declared}")]
    Arity {
        operation: String,
        declared: usize,
        actual: usize,
    },

    #[error("Operation {operation} panicked: {message}")]
    Panic { operation: String, message: String },

    #[error("Unit not found: {0}")]
    NotFound(UnitId),

    /// The hub was reused by another operation before it could close
    #[error("Concurrent registry change for unit {0}")]
    Conflict(UnitId),
}

impl HubError {
    pub(crate) fn status(operation: &'static str, status: HubStatus) -> Self {
        Self::Status { operation, status }
    }

    /// Check if this error came from the lifecycle state machine
    pub fn is_status(&self) -> bool {
        matches!(self, Self::Status { .. })
    }
}
