//! In-memory function table unit
//!
//! The simplest backend: operations are Rust closures registered through
//! a builder, served by [`HubKind::Memory`](crate::HubKind::Memory) hubs.

use plughub_api::{Operation, OperationTable, Unit, UnitError, UnitId, UnitType, Value, Version};
use std::fmt;
use std::sync::Arc;

type Hook = dyn Fn() -> Result<(), UnitError> + Send + Sync;

/// A unit whose operations live in process memory
pub struct MemoryUnit {
    id: UnitId,
    version: Version,
    operations: OperationTable,
    on_initialize: Option<Arc<Hook>>,
    on_release: Option<Arc<Hook>>,
}

impl MemoryUnit {
    pub fn builder(id: impl Into<UnitId>, version: Version) -> MemoryUnitBuilder {
        MemoryUnitBuilder {
            unit: MemoryUnit {
                id: id.into(),
                version,
                operations: OperationTable::new(),
                on_initialize: None,
                on_release: None,
            },
        }
    }
}

impl Unit for MemoryUnit {
    fn id(&self) -> &UnitId {
        &self.id
    }

    fn unit_type(&self) -> UnitType {
        UnitType::Memory
    }

    fn version(&self) -> Version {
        self.version
    }

    fn operations(&self) -> &OperationTable {
        &self.operations
    }

    fn initialize(&self) -> Result<(), UnitError> {
        match &self.on_initialize {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    fn release(&self) -> Result<(), UnitError> {
        match &self.on_release {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for MemoryUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut operations: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        operations.sort_unstable();
        f.debug_struct("MemoryUnit")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("operations", &operations)
            .finish()
    }
}

/// Builder for [`MemoryUnit`]
pub struct MemoryUnitBuilder {
    unit: MemoryUnit,
}

impl MemoryUnitBuilder {
    /// Register an operation returning `returns` values.
    /// A later registration under the same name replaces the earlier one.
    pub fn operation<F>(mut self, name: impl Into<String>, returns: usize, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, UnitError> + Send + Sync + 'static,
    {
        self.unit
            .operations
            .insert(name.into(), Operation::new(returns, func));
        self
    }

    /// Hook run when a hub loads the unit
    pub fn on_initialize<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<(), UnitError> + Send + Sync + 'static,
    {
        self.unit.on_initialize = Some(Arc::new(hook));
        self
    }

    /// Hook run when a hub unloads the unit
    pub fn on_release<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<(), UnitError> + Send + Sync + 'static,
    {
        self.unit.on_release = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> MemoryUnit {
        self.unit
    }

    /// Build and wrap for handing to a hub or registry
    pub fn shared(self) -> Arc<dyn Unit> {
        Arc::new(self.unit)
    }
}
