//! Render Trigger: a single-slot "dirty" flag decoupling "a processed frame
//! is ready" from "the render stage draws".

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

const IDLE: u8 = 0;
const PENDING: u8 = 1;
const DRAWING: u8 = 2;
const DRAWING_DIRTY: u8 = 3;

/// Observable state of a [`RenderTrigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    RenderPending,
    /// A draw is reading the shared state.
    Drawing,
    /// A draw is in progress and another request arrived meanwhile.
    DrawingDirty,
}

impl TriggerState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            PENDING => Self::RenderPending,
            DRAWING => Self::Drawing,
            DRAWING_DIRTY => Self::DrawingDirty,
            _ => Self::Idle,
        }
    }
}

struct Inner {
    state: AtomicU8,
    closed: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Fire-and-forget render request handle. Cheap to clone; every clone
/// drives the same flag.
#[derive(Clone)]
pub struct RenderTrigger {
    inner: Arc<Inner>,
}

impl Default for RenderTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTrigger {
    pub fn new() -> Self {
        RenderTrigger {
            inner: Arc::new(Inner {
                state: AtomicU8::new(IDLE),
                closed: AtomicBool::new(false),
                lock: Mutex::new(()),
                wake: Condvar::new(),
            }),
        }
    }

    /// Ask for one draw. Never waits for the render context.
    ///
    /// Returns `true` if this call scheduled a draw, `false` if it collapsed
    /// into one that was already pending.
    pub fn request_render(&self) -> bool {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => PENDING,
                DRAWING => DRAWING_DIRTY,
                _ => return false,
            };
            match self.inner.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if current == IDLE {
            self.notify();
        }
        true
    }

    pub fn state(&self) -> TriggerState {
        TriggerState::from_raw(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_pending(&self) -> bool {
        self.state() == TriggerState::RenderPending
    }

    /// RenderPending -> Drawing. Returns `false` (and changes nothing) when
    /// no request is pending.
    pub(crate) fn begin_draw(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, DRAWING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Drawing -> Idle, or DrawingDirty -> RenderPending when a request
    /// arrived during the draw.
    pub(crate) fn finish_draw(&self) {
        let rearmed = self
            .inner
            .state
            .compare_exchange(DRAWING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_err();
        if rearmed {
            self.inner.state.store(PENDING, Ordering::Release);
            self.notify();
        }
    }

    /// Block until a draw is pending or the trigger is closed. Returns
    /// `false` once closed.
    pub(crate) fn wait_pending(&self, timeout: Option<Duration>) -> bool {
        let guard = self.inner.lock.lock().unwrap_or_else(|e| e.into_inner());
        let blocked = |_: &mut ()| !self.is_closed() && !self.is_pending();
        let _guard = match timeout {
            Some(timeout) => {
                self.inner
                    .wake
                    .wait_timeout_while(guard, timeout, blocked)
                    .unwrap_or_else(|e| e.into_inner())
                    .0
            }
            None => self
                .inner
                .wake
                .wait_while(guard, blocked)
                .unwrap_or_else(|e| e.into_inner()),
        };
        !self.is_closed()
    }

    /// Wake any waiting render context and make it exit.
    pub(crate) fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.notify();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn notify(&self) {
        // Taking the lock orders this wake after a waiter's check.
        drop(self.inner.lock.lock().unwrap_or_else(|e| e.into_inner()));
        self.inner.wake.notify_all();
    }
}
