//! Hub: lifecycle controller for a single unit
//!
//! A hub owns at most one unit and moves it through
//!
//! ```text
//! Unloaded -> Loading -> Loaded -> Ready <-> Calling
//! Ready -> Unloading -> Unloaded
//! Unloaded -> Closing -> Closed
//! ```
//!
//! Every edge is a compare-and-swap on the hub's status word, so racing
//! lifecycle operations from the same status have exactly one winner and
//! the losers get [`HubError::Status`] with nothing changed. Calls are
//! allowed from `Ready` and `Calling`; concurrent calls on one hub are
//! counted and the hub returns to `Ready` when the last one finishes.
//! No lock is held while a unit's `initialize` or `release` hook runs.

use crate::bridge;
use crate::status::{HubStatus, StatusCell};
use crate::HubError;
use parking_lot::RwLock;
use plughub_api::{Unit, UnitId, UnitType, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

/// Which unit types a hub serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubKind {
    /// In-process function tables
    Memory,
    /// Units backed by an embedded script interpreter
    Script,
}

impl HubKind {
    /// Hub kind for a unit type, if any
    pub fn for_unit_type(unit_type: UnitType) -> Result<Self, HubError> {
        match unit_type {
            UnitType::Memory => Ok(Self::Memory),
            UnitType::Script => Ok(Self::Script),
            other => Err(HubError::UnsupportedType(other)),
        }
    }

    pub fn serves(&self, unit_type: UnitType) -> bool {
        matches!(
            (self, unit_type),
            (Self::Memory, UnitType::Memory) | (Self::Script, UnitType::Script)
        )
    }
}

/// Result envelope produced by every call
#[derive(Debug)]
pub struct CallResult {
    /// Failure, if any. `content` is empty when set.
    pub error: Option<HubError>,
    /// Identity of the unit that served (or refused) the call
    pub hub_id: Option<UnitId>,
    pub content: Vec<Value>,
}

impl CallResult {
    fn success(hub_id: UnitId, content: Vec<Value>) -> Self {
        Self {
            error: None,
            hub_id: Some(hub_id),
            content,
        }
    }

    fn failure(hub_id: Option<UnitId>, error: HubError) -> Self {
        Self {
            error: Some(error),
            hub_id,
            content: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<Value>, HubError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.content),
        }
    }
}

/// Handle on a hub's bounded result channel
///
/// Every handle returned by the same hub reads the same channel. When a
/// handle carries a cancelled token it stops yielding results; work that
/// already ran is not undone.
#[derive(Clone)]
pub struct CallReceiver {
    rx: Arc<Mutex<mpsc::Receiver<CallResult>>>,
    cancel: CancellationToken,
}

impl CallReceiver {
    /// Wait for the next envelope. Returns `None` once cancelled.
    pub async fn recv(&self) -> Option<CallResult> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = async { self.rx.lock().await.recv().await } => result,
        }
    }

    /// Take an envelope if one is ready and no other reader is waiting
    pub fn try_recv(&self) -> Option<CallResult> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl fmt::Debug for CallReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallReceiver")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Lifecycle controller owning at most one unit
pub struct Hub {
    kind: HubKind,
    status: StatusCell,
    unit: RwLock<Option<Arc<dyn Unit>>>,
    capacity: usize,
    tx: mpsc::Sender<CallResult>,
    rx: Arc<Mutex<mpsc::Receiver<CallResult>>>,
    /// Held by the registry across a version check and the swap after it
    swap: Arc<Mutex<()>>,
}

impl Hub {
    /// Create an empty hub in `Unloaded`.
    ///
    /// `capacity` bounds the async result channel; a capacity of zero is
    /// raised to one.
    pub fn new(kind: HubKind, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            kind,
            status: StatusCell::new(HubStatus::Unloaded),
            unit: RwLock::new(None),
            capacity,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            swap: Arc::new(Mutex::new(())),
        }
    }

    /// Identity of the current unit
    pub fn id(&self) -> Option<UnitId> {
        self.unit.read().as_ref().map(|unit| unit.id().clone())
    }

    pub fn status(&self) -> HubStatus {
        self.status.status()
    }

    /// Currently owned unit
    pub fn unit(&self) -> Option<Arc<dyn Unit>> {
        self.unit.read().clone()
    }

    pub fn kind(&self) -> HubKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Serialize registry loads and unloads of this hub
    pub(crate) async fn lock_swap(&self) -> OwnedMutexGuard<()> {
        self.swap.clone().lock_owned().await
    }

    /// Number of calls currently running on this hub
    pub fn in_flight(&self) -> u64 {
        self.status.in_flight()
    }

    /// Load `unit` and make it callable. Legal only from `Unloaded`.
    ///
    /// If the unit's `initialize` hook fails, the unit is released again
    /// and the hub returns to `Unloaded`.
    pub fn load(&self, unit: Arc<dyn Unit>) -> Result<(), HubError> {
        if !self.kind.serves(unit.unit_type()) {
            return Err(HubError::UnsupportedType(unit.unit_type()));
        }
        self.status
            .transition(HubStatus::Unloaded, HubStatus::Loading)
            .map_err(|status| HubError::status("load", status))?;

        *self.unit.write() = Some(unit.clone());

        if let Err(source) = unit.initialize() {
            tracing::warn!(unit = %unit.id(), error = %source, "Unit initialization failed, rolling back");
            self.settle(HubStatus::Loading, HubStatus::Unloading);
            self.release_unit();
            self.settle(HubStatus::Unloading, HubStatus::Unloaded);
            return Err(HubError::Initialization {
                id: unit.id().clone(),
                source,
            });
        }

        self.settle(HubStatus::Loading, HubStatus::Loaded);
        self.settle(HubStatus::Loaded, HubStatus::Ready);
        tracing::info!(unit = %unit.id(), version = %unit.version(), kind = ?self.kind, "Unit loaded");
        Ok(())
    }

    /// Release and drop the current unit. Legal only from `Ready`.
    pub fn unload(&self) -> Result<(), HubError> {
        self.status
            .transition(HubStatus::Ready, HubStatus::Unloading)
            .map_err(|status| HubError::status("unload", status))?;

        let id = self.release_unit();
        self.settle(HubStatus::Unloading, HubStatus::Unloaded);
        if let Some(id) = id {
            tracing::info!(unit = %id, "Unit unloaded");
        }
        Ok(())
    }

    /// Invoke `operation` synchronously
    pub fn call(&self, operation: &str, args: &[Value]) -> CallResult {
        let guard = match self.status.enter_call() {
            Ok(guard) => guard,
            Err(status) => {
                return match self.id() {
                    None => CallResult::failure(None, HubError::NotLoaded),
                    Some(id) => CallResult::failure(Some(id), HubError::status("call", status)),
                };
            }
        };

        let Some(unit) = self.unit() else {
            return CallResult::failure(None, HubError::NotLoaded);
        };
        let hub_id = unit.id().clone();
        tracing::debug!(unit = %hub_id, operation, args = args.len(), "Calling operation");

        let outcome = bridge::invoke(unit.as_ref(), operation, args);
        drop(guard);

        match outcome {
            Ok(content) => CallResult::success(hub_id, content),
            Err(err) => {
                tracing::debug!(unit = %hub_id, operation, error = %err, "Operation failed");
                CallResult::failure(Some(hub_id), err)
            }
        }
    }

    /// Invoke `operation`, push the envelope onto this hub's channel and
    /// return a handle on the channel.
    ///
    /// The invocation itself runs before this future first waits. If the
    /// channel already holds `capacity` undelivered envelopes, the send
    /// waits until a reader drains one, so a caller that never reads
    /// will eventually block its own task here.
    ///
    /// Dropping the future while it waits on a full channel discards
    /// that envelope. The operation has still run.
    pub async fn async_call(&self, operation: &str, args: &[Value]) -> CallReceiver {
        let result = self.call(operation, args);
        if self.tx.send(result).await.is_err() {
            tracing::error!(operation, "Result channel closed");
        }
        self.receiver()
    }

    /// Handle on this hub's result channel
    pub fn receiver(&self) -> CallReceiver {
        CallReceiver {
            rx: self.rx.clone(),
            cancel: CancellationToken::new(),
        }
    }

    /// Shut the hub down for good. Legal only from `Unloaded`.
    pub fn close(&self) -> Result<(), HubError> {
        self.status
            .transition(HubStatus::Unloaded, HubStatus::Closing)
            .map_err(|status| HubError::status("close", status))?;

        if let Some(id) = self.release_unit() {
            tracing::warn!(unit = %id, "Released residual unit while closing");
        }
        self.settle(HubStatus::Closing, HubStatus::Closed);
        tracing::debug!(kind = ?self.kind, "Hub closed");
        Ok(())
    }

    /// Run the unit's release hook and drop it. Returns its identity.
    fn release_unit(&self) -> Option<UnitId> {
        let unit = self.unit()?;
        if let Err(err) = unit.release() {
            tracing::warn!(unit = %unit.id(), error = %err, "Unit release hook failed");
        }
        self.unit.write().take();
        Some(unit.id().clone())
    }

    /// Step between two statuses this hub already holds exclusively
    fn settle(&self, from: HubStatus, to: HubStatus) {
        if let Err(actual) = self.status.transition(from, to) {
            tracing::error!(%from, %to, %actual, "Hub status changed under an exclusive transition");
        }
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("kind", &self.kind)
            .field("id", &self.id())
            .field("status", &self.status)
            .field("capacity", &self.capacity)
            .finish()
    }
}
