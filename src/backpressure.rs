//! Keep-only-latest hand-off between a producer running at sensor cadence
//! and a single serial consumer.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Outcome of [`LatestSlot::offer`].
#[derive(Debug)]
pub enum Offer<T> {
    /// The slot was empty; the item is now pending.
    Pending,
    /// A stale pending item was displaced and handed back for recycling.
    Replaced(T),
    /// The slot is closed; the item is handed back unconsumed.
    Closed(T),
}

struct SlotState<T> {
    pending: Option<T>,
    in_flight: bool,
    closed: bool,
}

/// A single-slot mailbox with keep-only-latest semantics.
///
/// At most one item is pending and at most one is in flight. An item taken
/// by the consumer stays in flight until [`release`](Self::release) is
/// called; until then [`take`](Self::take) will not hand out another, so a
/// consumer that never releases stalls delivery.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        LatestSlot {
            state: Mutex::new(SlotState {
                pending: None,
                in_flight: false,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        // The state is a few plain fields; a panicking holder cannot leave
        // them half-written.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `item` the pending item, displacing any older one.
    pub fn offer(&self, item: T) -> Offer<T> {
        let mut state = self.lock();
        if state.closed {
            return Offer::Closed(item);
        }
        let stale = state.pending.replace(item);
        drop(state);
        self.ready.notify_one();
        match stale {
            Some(stale) => Offer::Replaced(stale),
            None => Offer::Pending,
        }
    }

    /// Block until an item is pending and nothing is in flight, then mark it
    /// in flight and return it. Returns `None` once the slot is closed.
    pub fn take(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if !state.in_flight {
                if let Some(item) = state.pending.take() {
                    state.in_flight = true;
                    return Some(item);
                }
            }
            state = self.ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`take`](Self::take) but gives up after `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let (mut state, _) = self
            .ready
            .wait_timeout_while(self.lock(), timeout, |s| {
                !s.closed && (s.in_flight || s.pending.is_none())
            })
            .unwrap_or_else(|e| e.into_inner());
        if state.closed || state.in_flight {
            return None;
        }
        let item = state.pending.take()?;
        state.in_flight = true;
        Some(item)
    }

    /// Mark the in-flight item as finished so the next pending one can be
    /// taken.
    pub fn release(&self) {
        let mut state = self.lock();
        state.in_flight = false;
        drop(state);
        self.ready.notify_one();
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Accept offers again after [`close`](Self::close).
    pub fn reopen(&self) {
        let mut state = self.lock();
        state.closed = false;
        state.in_flight = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Close the slot, waking a blocked consumer. Returns the item that was
    /// pending, if any.
    pub fn close(&self) -> Option<T> {
        let mut state = self.lock();
        state.closed = true;
        let pending = state.pending.take();
        drop(state);
        self.ready.notify_all();
        pending
    }
}
