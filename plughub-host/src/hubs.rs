//! Hub registry with version-gated hot swap
//!
//! Provides a thread-safe collection of hubs indexed by unit identity,
//! creating hubs on first load and fanning named operations out to
//! every hub whose unit exposes them.
//!
//! The map itself is guarded by one read/write lock that is only held
//! for structural changes and snapshots. Unit hooks and operations run
//! outside of it, so a slow unit never stalls the registry or other
//! hubs.

use crate::config::{HubsConfig, LoadOptions};
use crate::hub::{CallReceiver, CallResult, Hub, HubKind};
use crate::status::HubStatus;
use crate::HubError;
use plughub_api::{Unit, UnitId, UnitType, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// A thread-safe registry of hubs
#[derive(Clone, Default)]
pub struct Hubs {
    inner: Arc<RwLock<HashMap<UnitId, Arc<Hub>>>>,
    config: HubsConfig,
}

impl Hubs {
    /// Create an empty registry with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HubsConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &HubsConfig {
        &self.config
    }

    /// Load a unit, hot-swapping any unit already loaded under its id
    pub async fn load_plugin(&self, unit: Arc<dyn Unit>) -> Result<(), HubError> {
        self.load_plugin_with(unit, LoadOptions::default()).await
    }

    /// Load a unit with explicit options.
    ///
    /// A unit replaces the one loaded under the same id only if its
    /// version is strictly greater. If the replacement fails to
    /// initialize, the previous unit is loaded again.
    ///
    /// Loads and unloads of one id run one at a time: the version check
    /// and the swap happen under the hub's swap lock, never under the
    /// registry lock.
    pub async fn load_plugin_with(
        &self,
        unit: Arc<dyn Unit>,
        options: LoadOptions,
    ) -> Result<(), HubError> {
        let id = unit.id().clone();
        let (hub, _swap) = loop {
            let hub = self
                .hub_for(&id, unit.unit_type(), options.capacity)
                .await?;
            let swap = hub.lock_swap().await;
            // The previous holder may have discarded this hub
            if self.is_registered(id.as_str(), &hub).await {
                break (hub, swap);
            }
        };

        let previous = hub.unit();
        if let Some(previous) = &previous {
            if !unit.version().is_newer_than(&previous.version()) {
                tracing::warn!(
                    unit = %id,
                    loaded = %previous.version(),
                    offered = %unit.version(),
                    "Rejected unit that is not newer than the loaded one"
                );
                return Err(HubError::Version {
                    id,
                    loaded: previous.version(),
                    offered: unit.version(),
                });
            }
            hub.unload()?;
        }

        if let Err(err) = hub.load(unit.clone()) {
            match previous {
                Some(previous) => Self::restore(&hub, previous),
                None => self.discard(&id, &hub).await,
            }
            return Err(err);
        }

        match previous {
            Some(previous) => tracing::info!(
                unit = %id,
                from = %previous.version(),
                to = %unit.version(),
                "Unit hot-swapped"
            ),
            None => tracing::info!(unit = %id, version = %unit.version(), "Unit registered"),
        }
        Ok(())
    }

    /// Unload the unit registered under `id` and remove its hub.
    ///
    /// `Ok` means the hub is closed and gone from the registry.
    pub async fn unload_plugin(&self, id: &str) -> Result<(), HubError> {
        let hub = self
            .get(id)
            .await
            .ok_or_else(|| HubError::NotFound(UnitId::from(id)))?;
        let _swap = hub.lock_swap().await;
        if !self.is_registered(id, &hub).await {
            // Removed while this call waited for the swap lock
            return Err(HubError::NotFound(UnitId::from(id)));
        }
        if hub.unit().is_some() {
            hub.unload()?;
        }

        let mut inner = self.inner.write().await;
        if let Err(err) = hub.close() {
            tracing::warn!(unit = %id, error = %err, "Hub reused before it could close");
            return Err(HubError::Conflict(UnitId::from(id)));
        }
        inner.remove(id);
        tracing::info!(unit = %id, "Unit unregistered");
        Ok(())
    }

    /// Call `operation` on every hub whose unit exposes it.
    ///
    /// Hubs without the operation are skipped. The order of the returned
    /// envelopes is unspecified.
    pub async fn call(&self, operation: &str, args: &[Value]) -> Vec<CallResult> {
        let targets = self.exposing(operation).await;
        tracing::debug!(operation, hubs = targets.len(), "Fan-out call");
        targets
            .iter()
            .map(|hub| hub.call(operation, args))
            .collect()
    }

    /// Fan `operation` out through each matching hub's result channel.
    ///
    /// Every receiver shares the returned token. Cancelling it only
    /// stops the receivers from yielding; the invocations have already
    /// run by the time this returns. A hub whose channel is full makes
    /// this wait until its reader drains it.
    pub async fn async_call(
        &self,
        operation: &str,
        args: &[Value],
    ) -> (Vec<CallReceiver>, CancellationToken) {
        let cancel = CancellationToken::new();
        let targets = self.exposing(operation).await;
        tracing::debug!(operation, hubs = targets.len(), "Fan-out async call");

        let mut receivers = Vec::with_capacity(targets.len());
        for hub in &targets {
            let receiver = hub.async_call(operation, args).await;
            receivers.push(receiver.with_cancel(cancel.clone()));
        }
        (receivers, cancel)
    }

    /// Get the hub registered under `id`
    pub async fn get(&self, id: &str) -> Option<Arc<Hub>> {
        let inner = self.inner.read().await;
        inner.get(id).cloned()
    }

    /// Check if a hub is registered under `id`
    pub async fn contains(&self, id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.contains_key(id)
    }

    /// Get a list of all registered ids
    pub async fn ids(&self) -> Vec<UnitId> {
        let inner = self.inner.read().await;
        inner.keys().cloned().collect()
    }

    /// Current status of every registered hub
    pub async fn statuses(&self) -> Vec<(UnitId, HubStatus)> {
        let inner = self.inner.read().await;
        inner
            .iter()
            .map(|(id, hub)| (id.clone(), hub.status()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.len()
    }

    pub async fn is_empty(&self) -> bool {
        let inner = self.inner.read().await;
        inner.is_empty()
    }

    /// Find or create the hub for `id`
    ///
    /// A closed hub left behind by a racing unload is replaced.
    async fn hub_for(
        &self,
        id: &UnitId,
        unit_type: UnitType,
        capacity: Option<usize>,
    ) -> Result<Arc<Hub>, HubError> {
        let kind = HubKind::for_unit_type(unit_type)?;
        let mut inner = self.inner.write().await;
        if let Some(hub) = inner.get(id) {
            if hub.status() != HubStatus::Closed {
                if hub.kind() != kind {
                    return Err(HubError::UnsupportedType(unit_type));
                }
                return Ok(hub.clone());
            }
        }

        let capacity = capacity.unwrap_or(self.config.channel_capacity);
        let hub = Arc::new(Hub::new(kind, capacity));
        inner.insert(id.clone(), hub.clone());
        tracing::debug!(unit = %id, ?kind, capacity = hub.capacity(), "Hub created");
        Ok(hub)
    }

    async fn is_registered(&self, id: &str, hub: &Arc<Hub>) -> bool {
        let inner = self.inner.read().await;
        matches!(inner.get(id), Some(current) if Arc::ptr_eq(current, hub))
    }

    /// Hubs whose current unit exposes `operation`
    async fn exposing(&self, operation: &str) -> Vec<Arc<Hub>> {
        let inner = self.inner.read().await;
        inner
            .values()
            .filter(|hub| {
                hub.unit()
                    .is_some_and(|unit| unit.has_operation(operation))
            })
            .cloned()
            .collect()
    }

    /// Reload `previous` after a failed hot swap
    fn restore(hub: &Hub, previous: Arc<dyn Unit>) {
        let id = previous.id().clone();
        match hub.load(previous) {
            Ok(()) => tracing::warn!(unit = %id, "Hot swap failed, previous unit restored"),
            Err(err) => {
                tracing::error!(unit = %id, error = %err, "Hot swap failed and previous unit could not be restored")
            }
        }
    }

    /// Drop a hub left empty by a first load that failed.
    ///
    /// Caller holds the hub's swap lock.
    async fn discard(&self, id: &UnitId, hub: &Arc<Hub>) {
        let mut inner = self.inner.write().await;
        let registered = matches!(inner.get(id), Some(current) if Arc::ptr_eq(current, hub));
        if registered && hub.close().is_ok() {
            inner.remove(id);
        }
    }
}
