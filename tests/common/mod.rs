//! Mock collaborators shared by the integration tests.
#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use frame_handoff::platform::feed::{FrameFeeder, OwnedFrame};
use frame_handoff::{FrameContract, Processed, Processor, Renderer, Size};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Ordered log of lifecycle events across threads.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<&'static str>>>);

impl Events {
    pub fn push(&self, event: &'static str) {
        self.0.lock().unwrap().push(event);
    }

    pub fn snapshot(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.snapshot().iter().position(|e| *e == event)
    }
}

/// What one `process` call saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCall {
    pub width: u32,
    pub height: u32,
    pub y_stride: usize,
    pub uv_stride: usize,
    pub plane_lens: [usize; 3],
    pub first_luma: u8,
    /// `ProbeState::frames` after this call.
    pub frames: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeState {
    pub last_luma: u8,
    pub frames: u64,
}

/// Processor that reports every call and can be held inside `process`.
pub struct ProbeProcessor {
    calls: Sender<ProcessCall>,
    count: Arc<AtomicUsize>,
    initialized: Arc<AtomicUsize>,
    entered: Option<Sender<u8>>,
    gate: Option<Receiver<()>>,
    events: Events,
}

pub struct ProbeHandle {
    pub calls: Receiver<ProcessCall>,
    pub count: Arc<AtomicUsize>,
    pub initialized: Arc<AtomicUsize>,
}

impl ProbeProcessor {
    pub fn new(events: Events) -> (Self, ProbeHandle) {
        let (tx, rx) = mpsc::channel();
        let count = Arc::new(AtomicUsize::new(0));
        let initialized = Arc::new(AtomicUsize::new(0));
        (
            ProbeProcessor {
                calls: tx,
                count: Arc::clone(&count),
                initialized: Arc::clone(&initialized),
                entered: None,
                gate: None,
                events,
            },
            ProbeHandle {
                calls: rx,
                count,
                initialized,
            },
        )
    }

    /// Make every `process` call announce itself on the returned receiver
    /// and then wait for one token on the returned sender.
    pub fn gated(mut self) -> (Self, Receiver<u8>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        self.entered = Some(entered_tx);
        self.gate = Some(gate_rx);
        (self, entered_rx, gate_tx)
    }
}

impl Processor for ProbeProcessor {
    type State = ProbeState;
    type Error = Infallible;

    fn initialize(&mut self, _size: Size) -> Result<ProbeState, Infallible> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        self.events.push("processor initialized");
        Ok(ProbeState::default())
    }

    fn process(&mut self, frame: &FrameContract<'_>, state: &mut ProbeState) {
        let first_luma = frame.luma(0, 0).expect("frame is not empty");
        if let Some(entered) = &self.entered {
            let _ = entered.send(first_luma);
        }
        if let Some(gate) = &self.gate {
            let _ = gate.recv_timeout(TIMEOUT);
        }
        state.last_luma = first_luma;
        state.frames += 1;
        self.count.fetch_add(1, Ordering::SeqCst);
        let _ = self.calls.send(ProcessCall {
            width: frame.width,
            height: frame.height,
            y_stride: frame.y_stride,
            uv_stride: frame.uv_stride,
            plane_lens: [frame.y_plane.len(), frame.u_plane.len(), frame.v_plane.len()],
            first_luma,
            frames: state.frames,
        });
    }
}

impl Drop for ProbeProcessor {
    fn drop(&mut self) {
        self.events.push("processor dropped");
    }
}

/// Renderer that reports each draw's generation and luma.
pub struct RecordingRenderer {
    draws: Sender<(u64, u8)>,
    last: Option<(u64, ProbeState)>,
    fail_surface: bool,
    events: Events,
}

impl RecordingRenderer {
    pub fn new(events: Events) -> (Self, Receiver<(u64, u8)>) {
        let (tx, rx) = mpsc::channel();
        (
            RecordingRenderer {
                draws: tx,
                last: None,
                fail_surface: false,
                events,
            },
            rx,
        )
    }

    /// Generation and state seen by the most recent draw.
    pub fn last_drawn(&self) -> Option<&(u64, ProbeState)> {
        self.last.as_ref()
    }

    pub fn failing(mut self) -> Self {
        self.fail_surface = true;
        self
    }
}

impl Renderer<ProbeState> for RecordingRenderer {
    type Error = std::io::Error;

    fn initialize_surface(&mut self) -> Result<(), std::io::Error> {
        if self.fail_surface {
            return Err(std::io::Error::other("no display"));
        }
        self.events.push("surface initialized");
        Ok(())
    }

    fn draw(&mut self, state: &Processed<ProbeState>) {
        self.events.push("draw");
        self.last = Some((state.generation(), state.state().clone()));
        let _ = self.draws.send((state.generation(), state.last_luma));
    }

    fn release_surface(&mut self) {
        self.events.push("surface released");
    }
}

/// A tightly packed I420 frame whose first luma sample is `luma`.
pub fn frame_with_luma(feeder: &FrameFeeder, size: Size, luma: u8) -> OwnedFrame {
    let mut frame = feeder.acquire_i420(size);
    if let Some(y) = frame.plane_mut(0) {
        y.data[0] = luma;
    }
    frame
}

/// Poll `cond` until it holds or [`TIMEOUT`] passes.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
