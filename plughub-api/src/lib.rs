//! plughub-api: Unit capability contract for the plughub host
//!
//! This crate defines what every pluggable backend must provide to be
//! hosted: an identity, a type tag, a version and a table of named
//! operations, plus the `initialize`/`release` lifecycle hooks.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

mod version;

pub use serde_json::Value;
pub use version::{Version, VersionParseError};

/// Identity of a unit, unique within a registry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UnitId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UnitId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for UnitId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend kind a unit is implemented with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitType {
    /// In-process function table
    #[serde(rename = "mem_plugin")]
    Memory,

    /// Dynamically loaded native library
    #[serde(rename = "dll_plugin")]
    Native,

    /// Network-delegated implementation
    #[serde(rename = "net_plugin")]
    Remote,

    /// Embedded scripting-language bridge
    #[serde(rename = "lua_plugin")]
    Script,
}

impl UnitType {
    /// Stable string tag for this type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "mem_plugin",
            Self::Native => "dll_plugin",
            Self::Remote => "net_plugin",
            Self::Script => "lua_plugin",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitType {
    type Err = UnitError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "mem_plugin" => Ok(Self::Memory),
            "dll_plugin" => Ok(Self::Native),
            "net_plugin" => Ok(Self::Remote),
            "lua_plugin" => Ok(Self::Script),
            other => Err(UnitError::Failed(format!("unknown unit type tag: {}", other))),
        }
    }
}

/// Errors reported by unit code
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("Initialization failed: {0}")]
    Initialize(String),

    #[error("Release failed: {0}")]
    Release(String),

    #[error("Invalid argument at position {position}: {reason}")]
    InvalidArgument { position: usize, reason: String },

    #[error("Operation failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UnitError {
    /// Create an operation failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Create an argument error for the argument at `position`
    pub fn invalid_argument(position: usize, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            position,
            reason: reason.into(),
        }
    }
}

/// Signature shared by every operation callable
pub type Callable = dyn Fn(&[Value]) -> Result<Vec<Value>, UnitError> + Send + Sync;

/// Operation descriptor: a callable plus its declared return arity
#[derive(Clone)]
pub struct Operation {
    func: Arc<Callable>,
    returns: usize,
}

impl Operation {
    /// Create a descriptor for a callable producing `returns` values
    pub fn new<F>(returns: usize, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, UnitError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            returns,
        }
    }

    /// Declared number of return values
    pub fn returns(&self) -> usize {
        self.returns
    }

    /// Run the callable. Arity is not checked here.
    pub fn invoke(&self, args: &[Value]) -> Result<Vec<Value>, UnitError> {
        (self.func)(args)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("returns", &self.returns)
            .field("func", &"<callable>")
            .finish()
    }
}

/// Mapping from operation key to descriptor
pub type OperationTable = HashMap<String, Operation>;

/// Capability contract every hosted unit implements.
///
/// A unit is shared with the host as `Arc<dyn Unit>` and may be invoked
/// from several threads at once, so operation callables must tolerate
/// concurrent use. Interpreter or library handles belong inside the
/// backend and are set up in [`Unit::initialize`] and torn down in
/// [`Unit::release`].
pub trait Unit: Send + Sync + fmt::Debug {
    fn id(&self) -> &UnitId;

    fn unit_type(&self) -> UnitType;

    fn version(&self) -> Version;

    fn operations(&self) -> &OperationTable;

    /// Called once by the hub while loading
    fn initialize(&self) -> Result<(), UnitError> {
        Ok(())
    }

    /// Called once by the hub while unloading, including a rollback
    /// after a failed `initialize`
    fn release(&self) -> Result<(), UnitError> {
        Ok(())
    }

    fn has_operation(&self, name: &str) -> bool {
        self.operations().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unit_type_tags() {
        for ty in [
            UnitType::Memory,
            UnitType::Native,
            UnitType::Remote,
            UnitType::Script,
        ] {
            assert_eq!(ty.as_str().parse::<UnitType>().unwrap(), ty);
            assert_eq!(serde_json::to_value(ty).unwrap(), json!(ty.as_str()));
        }
        assert!("wasm_plugin".parse::<UnitType>().is_err());
    }

    #[test]
    fn test_operation_invoke() {
        let op = Operation::new(1, |args| {
            let n = args
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| UnitError::invalid_argument(0, "expected integer"))?;
            Ok(vec![json!(n * 2)])
        });

        assert_eq!(op.returns(), 1);
        assert_eq!(op.invoke(&[json!(21)]).unwrap(), vec![json!(42)]);

        let err = op.invoke(&[json!("x")]).unwrap_err();
        assert!(matches!(err, UnitError::InvalidArgument { position: 0, .. }));
    }

    #[test]
    fn test_unit_id_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(UnitId::from("A"), 1);
        assert_eq!(map.get("A"), Some(&1));
        assert_eq!(UnitId::new("A").to_string(), "A");
    }
}
