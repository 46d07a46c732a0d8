//! Hub status codes and the atomic status cell
//!
//! A hub's status and its number of in-flight calls share a single
//! atomic word. The low byte holds the status code, the remaining bits
//! hold the call count, so "ready with no calls" and "calling with N
//! calls" are each one value and every transition is one
//! compare-and-swap.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle status of a hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HubStatus {
    Loading = 1,
    Loaded = 2,
    Calling = 3,
    Ready = 4,
    Unloading = 5,
    Unloaded = 6,
    Closing = 7,
    Closed = 8,
    /// Externally forced hold; no operation of the hub enters it
    Protect = 9,
}

impl HubStatus {
    /// Numeric status code
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Loading),
            2 => Some(Self::Loaded),
            3 => Some(Self::Calling),
            4 => Some(Self::Ready),
            5 => Some(Self::Unloading),
            6 => Some(Self::Unloaded),
            7 => Some(Self::Closing),
            8 => Some(Self::Closed),
            9 => Some(Self::Protect),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "LOADING",
            Self::Loaded => "LOADED",
            Self::Calling => "CALLING",
            Self::Ready => "READY",
            Self::Unloading => "UNLOADING",
            Self::Unloaded => "UNLOADED",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
            Self::Protect => "PROTECT",
        }
    }

    /// Whether `call` and `async_call` are accepted in this status
    pub fn is_callable(self) -> bool {
        matches!(self, Self::Ready | Self::Calling)
    }
}

impl fmt::Display for HubStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable name for a raw status code, `UNKNOWN` if invalid
pub fn status_name(code: u8) -> &'static str {
    HubStatus::from_code(code)
        .map(HubStatus::as_str)
        .unwrap_or("UNKNOWN")
}

const STATUS_MASK: u64 = 0xff;
const CALLS_SHIFT: u32 = 8;

#[inline]
fn pack(status: HubStatus, calls: u64) -> u64 {
    (calls << CALLS_SHIFT) | status.code() as u64
}

#[inline]
fn unpack(word: u64) -> (HubStatus, u64) {
    // Only valid codes are ever stored.
    let status = HubStatus::from_code((word & STATUS_MASK) as u8).unwrap_or(HubStatus::Protect);
    (status, word >> CALLS_SHIFT)
}

/// Status word of a single hub
pub(crate) struct StatusCell {
    word: AtomicU64,
}

impl StatusCell {
    pub(crate) fn new(status: HubStatus) -> Self {
        Self {
            word: AtomicU64::new(pack(status, 0)),
        }
    }

    pub(crate) fn status(&self) -> HubStatus {
        unpack(self.word.load(Ordering::Acquire)).0
    }

    pub(crate) fn in_flight(&self) -> u64 {
        unpack(self.word.load(Ordering::Acquire)).1
    }

    /// Move from `from` to `to` if no call is in flight.
    ///
    /// On failure the status is untouched and the observed status is
    /// returned.
    pub(crate) fn transition(&self, from: HubStatus, to: HubStatus) -> Result<(), HubStatus> {
        self.word
            .compare_exchange(pack(from, 0), pack(to, 0), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| unpack(actual).0)
    }

    /// Register a call: `Ready` becomes `Calling`, `Calling` counts one
    /// more caller. The returned guard leaves the call when dropped.
    pub(crate) fn enter_call(&self) -> Result<CallGuard<'_>, HubStatus> {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let next = match unpack(current) {
                (HubStatus::Ready, _) => pack(HubStatus::Calling, 1),
                (HubStatus::Calling, calls) => pack(HubStatus::Calling, calls + 1),
                (status, _) => return Err(status),
            };
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(CallGuard { cell: self }),
                Err(actual) => current = actual,
            }
        }
    }

    fn exit_call(&self) {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let next = match unpack(current) {
                (HubStatus::Calling, 1) => pack(HubStatus::Ready, 0),
                (HubStatus::Calling, calls) if calls > 1 => pack(HubStatus::Calling, calls - 1),
                (status, calls) => {
                    tracing::error!(%status, calls, "Call exit observed inconsistent status");
                    return;
                }
            };
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Debug for StatusCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (status, calls) = unpack(self.word.load(Ordering::Acquire));
        f.debug_struct("StatusCell")
            .field("status", &status)
            .field("in_flight", &calls)
            .finish()
    }
}

/// Keeps a call registered on its hub until dropped
pub(crate) struct CallGuard<'a> {
    cell: &'a StatusCell,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.cell.exit_call();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(status_name(1), "LOADING");
        assert_eq!(status_name(4), "READY");
        assert_eq!(status_name(6), "UNLOADED");
        assert_eq!(status_name(9), "PROTECT");
        assert_eq!(status_name(0), "UNKNOWN");
        assert_eq!(status_name(42), "UNKNOWN");
        assert_eq!(HubStatus::Calling.to_string(), "CALLING");
    }

    #[test]
    fn test_codes_round_trip() {
        for code in 1..=9 {
            let status = HubStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn test_transition_requires_expected_source() {
        let cell = StatusCell::new(HubStatus::Unloaded);
        assert_eq!(
            cell.transition(HubStatus::Ready, HubStatus::Unloading),
            Err(HubStatus::Unloaded)
        );
        assert_eq!(cell.status(), HubStatus::Unloaded);

        cell.transition(HubStatus::Unloaded, HubStatus::Loading)
            .unwrap();
        assert_eq!(cell.status(), HubStatus::Loading);
    }

    #[test]
    fn test_calls_are_counted() {
        let cell = StatusCell::new(HubStatus::Ready);

        let first = cell.enter_call().unwrap();
        let second = cell.enter_call().unwrap();
        assert_eq!(cell.status(), HubStatus::Calling);
        assert_eq!(cell.in_flight(), 2);

        // No lifecycle transition while calls are in flight
        assert_eq!(
            cell.transition(HubStatus::Ready, HubStatus::Unloading),
            Err(HubStatus::Calling)
        );

        drop(first);
        assert_eq!(cell.status(), HubStatus::Calling);
        drop(second);
        assert_eq!(cell.status(), HubStatus::Ready);
        assert_eq!(cell.in_flight(), 0);
    }

    #[test]
    fn test_enter_call_rejected_outside_callable_states() {
        let cell = StatusCell::new(HubStatus::Loading);
        assert_eq!(cell.enter_call().err(), Some(HubStatus::Loading));
        assert_eq!(cell.in_flight(), 0);
    }
}
