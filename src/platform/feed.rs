//! A portable frame source whose frames are pushed by a producer: a sensor
//! cadence simulator, a test, or a foreign capture layer.
//!
//! Pushed frames go through a [`LatestSlot`], so a frame that arrives while
//! the capture thread is still inside the callback displaces the pending
//! one instead of queueing behind it. Displaced and released frames return
//! to a small pool and their storage is reused by the next
//! [`FrameFeeder::acquire_i420`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arrayvec::ArrayVec;
use tracing::{debug, info, trace, warn};

use crate::backpressure::{LatestSlot, Offer};
use crate::device::{CameraDevice, CameraManager};
use crate::error::Error;
use crate::frame::{Frame, FrameContract, GeometryError, Plane};
use crate::stream::CameraStream;
use crate::types::{
    FormatDescriptor, FrameRate, FrameRateRange, PixelFormat, Ratio, SessionConfig, Size,
};

/// Upper bound on planes per frame across supported formats.
const MAX_PLANES: usize = 4;

/// Frames kept around for reuse.
const POOL_CAPACITY: usize = 4;

const CAPTURE_THREAD: &str = "frame-capture";

/// Owned storage for one plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneBuf {
    pub data: Vec<u8>,
    pub bytes_per_row: usize,
}

impl PlaneBuf {
    fn view(&self) -> Plane<'_> {
        Plane {
            data: &self.data,
            bytes_per_row: self.bytes_per_row,
        }
    }
}

/// A frame owned by the producer until it is pushed.
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    pixel_format: PixelFormat,
    size: Size,
    planes: ArrayVec<PlaneBuf, MAX_PLANES>,
    timestamp: Duration,
    sequence: u64,
}

impl OwnedFrame {
    /// A zeroed I420 frame with the given row strides.
    pub fn i420(size: Size, y_stride: usize, uv_stride: usize) -> Self {
        let chroma_rows = size.chroma().height as usize;
        let mut planes = ArrayVec::new();
        planes.push(PlaneBuf {
            data: vec![0; y_stride * size.height as usize],
            bytes_per_row: y_stride,
        });
        for _ in 0..2 {
            planes.push(PlaneBuf {
                data: vec![0; uv_stride * chroma_rows],
                bytes_per_row: uv_stride,
            });
        }
        OwnedFrame {
            pixel_format: PixelFormat::I420,
            size,
            planes,
            timestamp: Duration::ZERO,
            sequence: 0,
        }
    }

    /// Wrap caller-provided planes. Geometry is checked when the frame is
    /// handed to the processing boundary, not here.
    pub fn from_planes(
        pixel_format: PixelFormat,
        size: Size,
        planes: Vec<PlaneBuf>,
    ) -> Result<Self, GeometryError> {
        if planes.len() > MAX_PLANES {
            return Err(GeometryError::PlaneCount(planes.len()));
        }
        let planes = planes.into_iter().collect();
        Ok(OwnedFrame {
            pixel_format,
            size,
            planes,
            timestamp: Duration::ZERO,
            sequence: 0,
        })
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn planes(&self) -> &[PlaneBuf] {
        &self.planes
    }

    pub fn plane_mut(&mut self, index: usize) -> Option<&mut PlaneBuf> {
        self.planes.get_mut(index)
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: Duration) {
        self.timestamp = timestamp;
    }

    /// Assigned by [`FrameFeeder::push`], starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether this storage can be refilled as an I420 frame of `size`:
    /// right format and size, with planes that pass the contract geometry.
    fn is_i420_of(&self, size: Size) -> bool {
        if self.pixel_format != PixelFormat::I420 || self.size != size {
            return false;
        }
        let planes: ArrayVec<Plane<'_>, MAX_PLANES> =
            self.planes.iter().map(PlaneBuf::view).collect();
        FrameContract::new(size, &planes).is_ok()
    }
}

/// A pushed frame as seen by the stream callback. Borrows the slot's
/// in-flight frame and is only valid inside the callback.
pub struct FeedFrame<'a> {
    frame: &'a OwnedFrame,
    planes: ArrayVec<Plane<'a>, MAX_PLANES>,
}

impl<'a> FeedFrame<'a> {
    fn new(frame: &'a OwnedFrame) -> Self {
        let planes = frame.planes.iter().map(PlaneBuf::view).collect();
        FeedFrame { frame, planes }
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }
}

impl Frame for FeedFrame<'_> {
    type Timestamp = Duration;

    fn pixel_format(&self) -> PixelFormat {
        self.frame.pixel_format
    }

    fn size(&self) -> Size {
        self.frame.size
    }

    fn planes(&self) -> &[Plane<'_>] {
        &self.planes
    }

    fn timestamp(&self) -> Duration {
        self.frame.timestamp
    }
}

struct FramePool {
    free: Mutex<Vec<OwnedFrame>>,
}

impl FramePool {
    fn new() -> Self {
        FramePool {
            free: Mutex::new(Vec::with_capacity(POOL_CAPACITY)),
        }
    }

    fn take_i420(&self, size: Size) -> Option<OwnedFrame> {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        let index = free.iter().position(|f| f.is_i420_of(size))?;
        Some(free.swap_remove(index))
    }

    fn recycle(&self, frame: OwnedFrame) {
        if !frame.is_i420_of(frame.size) {
            return;
        }
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < POOL_CAPACITY {
            free.push(frame);
        }
    }
}

struct FeedShared {
    slot: LatestSlot<OwnedFrame>,
    pool: FramePool,
    next_sequence: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    bound: AtomicBool,
}

impl FeedShared {
    fn new() -> Self {
        FeedShared {
            slot: LatestSlot::new(),
            pool: FramePool::new(),
            next_sequence: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            bound: AtomicBool::new(false),
        }
    }
}

/// What happened to a pushed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Now pending for the capture thread.
    Pending,
    /// Now pending; an older frame that was still waiting was dropped.
    ReplacedStale,
    /// The stream is stopped; the frame was recycled unseen.
    Closed,
}

/// Producer handle for a [`FeedDevice`]. Cheap to clone.
#[derive(Clone)]
pub struct FrameFeeder {
    shared: Arc<FeedShared>,
}

impl FrameFeeder {
    /// A frame to fill: recycled storage when available, else a fresh
    /// tightly packed I420 frame.
    pub fn acquire_i420(&self, size: Size) -> OwnedFrame {
        self.shared.pool.take_i420(size).unwrap_or_else(|| {
            OwnedFrame::i420(size, size.width as usize, size.chroma().width as usize)
        })
    }

    /// Offer a frame at sensor cadence. Never blocks on the consumer.
    pub fn push(&self, mut frame: OwnedFrame) -> PushOutcome {
        frame.sequence = self.shared.next_sequence.fetch_add(1, Ordering::Relaxed);
        match self.shared.slot.offer(frame) {
            Offer::Pending => PushOutcome::Pending,
            Offer::Replaced(stale) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(sequence = stale.sequence, "dropped stale frame");
                self.shared.pool.recycle(stale);
                PushOutcome::ReplacedStale
            }
            Offer::Closed(frame) => {
                self.shared.pool.recycle(frame);
                PushOutcome::Closed
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Whether the capture thread is currently inside the callback.
    pub fn is_in_flight(&self) -> bool {
        self.shared.slot.is_in_flight()
    }
}

/// Manager over a fixed set of feed devices.
#[derive(Default, Clone)]
pub struct FeedCameraManager {
    devices: Vec<FeedDevice>,
}

impl FeedCameraManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: FeedDevice) -> Self {
        self.devices.push(device);
        self
    }
}

impl CameraManager for FeedCameraManager {
    type Device = FeedDevice;
    type Error = Error;

    fn discover_devices(&self) -> Result<impl Iterator<Item = Self::Device>, Self::Error> {
        Ok(self.devices.clone().into_iter())
    }

    fn default_device(&self) -> Result<Option<Self::Device>, Self::Error> {
        Ok(self.devices.first().cloned())
    }
}

/// A device producing I420 frames of one fixed size.
#[derive(Clone)]
pub struct FeedDevice {
    id: String,
    name: String,
    size: Size,
    max_rate: FrameRate,
    unavailable: Option<String>,
    shared: Arc<FeedShared>,
}

impl FeedDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>, size: Size) -> Self {
        FeedDevice {
            id: id.into(),
            name: name.into(),
            size,
            max_rate: Ratio {
                numerator: 60,
                denominator: 1,
            },
            unavailable: None,
            shared: Arc::new(FeedShared::new()),
        }
    }

    /// Make [`open`](CameraDevice::open) fail with `reason`, as a busy
    /// device or a denied authorization would.
    pub fn unavailable(mut self, reason: impl Into<String>) -> Self {
        self.unavailable = Some(reason.into());
        self
    }

    pub fn feeder(&self) -> FrameFeeder {
        FrameFeeder {
            shared: Arc::clone(&self.shared),
        }
    }

    fn format(&self) -> impl Iterator<Item = FormatDescriptor> + use<> {
        let range = FrameRateRange {
            min: Ratio {
                numerator: 1,
                denominator: 1,
            },
            max: self.max_rate,
        };
        FormatDescriptor::from_ranges(PixelFormat::I420, self.size, [range])
    }
}

impl CameraDevice for FeedDevice {
    type Stream = FeedStream;
    type Error = Error;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supported_formats(&self) -> Result<impl Iterator<Item = FormatDescriptor>, Self::Error> {
        Ok(self.format())
    }

    fn open(self, config: &SessionConfig) -> Result<Self::Stream, Self::Error> {
        if let Some(reason) = &self.unavailable {
            return Err(Error::platform(reason.clone()));
        }
        if !self.supports(config)? {
            return Err(Error::UnsupportedFormat);
        }
        if self.shared.bound.swap(true, Ordering::AcqRel) {
            return Err(Error::platform(format!("device {} is busy", self.id)));
        }
        debug!(id = %self.id, size = %config.size, "feed device bound");
        Ok(FeedStream {
            shared: self.shared,
            capture: None,
        })
    }
}

/// Stream over a [`FeedDevice`]. The callback runs on one dedicated capture
/// thread.
pub struct FeedStream {
    shared: Arc<FeedShared>,
    capture: Option<JoinHandle<()>>,
}

impl FeedStream {
    pub fn feeder(&self) -> FrameFeeder {
        FrameFeeder {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl CameraStream for FeedStream {
    type Frame<'a> = FeedFrame<'a>;
    type Error = Error;

    fn start<F>(&mut self, mut callback: F) -> Result<(), Self::Error>
    where
        F: FnMut(&Self::Frame<'_>) + Send + 'static,
    {
        if self.capture.is_some() {
            return Err(Error::AlreadyStarted);
        }
        self.shared.slot.reopen();

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(CAPTURE_THREAD.into())
            .spawn(move || {
                info!(name = CAPTURE_THREAD, "capture loop started");
                while let Some(frame) = shared.slot.take() {
                    callback(&FeedFrame::new(&frame));
                    shared.slot.release();
                    shared.delivered.fetch_add(1, Ordering::Relaxed);
                    shared.pool.recycle(frame);
                }
                info!(name = CAPTURE_THREAD, "capture loop exiting");
            })
            .map_err(|e| Error::platform(format!("failed to spawn capture thread: {e}")))?;

        self.capture = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        let Some(handle) = self.capture.take() else {
            return Err(Error::NotStarted);
        };
        if let Some(pending) = self.shared.slot.close() {
            self.shared.pool.recycle(pending);
        }
        // Joining waits out the in-flight callback and drops it.
        handle
            .join()
            .map_err(|_| Error::platform("capture thread panicked"))
    }

    fn is_running(&self) -> bool {
        self.capture.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for FeedStream {
    fn drop(&mut self) {
        if self.capture.is_some() {
            let _ = self.stop();
        }
        self.shared.bound.store(false, Ordering::Release);
    }
}

/// Generates a moving-gradient I420 pattern into a [`FrameFeeder`] at a
/// fixed cadence on its own thread.
pub struct TestPattern {
    handle: Option<JoinHandle<u64>>,
    stop: Arc<AtomicBool>,
}

impl TestPattern {
    /// Start producing. With `limit`, the producer exits after that many
    /// frames.
    pub fn spawn(feeder: FrameFeeder, size: Size, rate: FrameRate, limit: Option<u64>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_signal = Arc::clone(&stop);
        let interval = rate.frame_interval();

        let handle = thread::spawn(move || {
            let started = Instant::now();
            let mut produced = 0u64;
            while !stop_signal.load(Ordering::SeqCst) && limit.is_none_or(|n| produced < n) {
                let mut frame = feeder.acquire_i420(size);
                paint_gradient(&mut frame, produced);
                frame.set_timestamp(started.elapsed());
                if feeder.push(frame) == PushOutcome::Closed {
                    debug!("test pattern stopping: stream closed");
                    break;
                }
                produced += 1;
                thread::sleep(interval);
            }
            produced
        });

        TestPattern {
            handle: Some(handle),
            stop,
        }
    }

    /// Wait for a limited producer to finish. Returns frames produced.
    pub fn join(mut self) -> u64 {
        self.wait()
    }

    /// Stop producing. Returns frames produced.
    pub fn stop(mut self) -> u64 {
        self.stop.store(true, Ordering::SeqCst);
        self.wait()
    }

    fn wait(&mut self) -> u64 {
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        handle.join().unwrap_or_else(|_| {
            warn!("test pattern thread panicked");
            0
        })
    }
}

impl Drop for TestPattern {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wait();
    }
}

fn paint_gradient(frame: &mut OwnedFrame, tick: u64) {
    let size = frame.size();
    let shift = (tick * 4) as usize;
    if let Some(y) = frame.plane_mut(0) {
        let stride = y.bytes_per_row;
        for row in 0..size.height as usize {
            for (col, px) in y.data[row * stride..][..size.width as usize]
                .iter_mut()
                .enumerate()
            {
                *px = (col + row + shift) as u8;
            }
        }
    }
    for index in 1..3 {
        if let Some(chroma) = frame.plane_mut(index) {
            chroma.data.fill(128);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn small() -> Size {
        Size::new(8, 4)
    }

    fn config() -> SessionConfig {
        SessionConfig {
            size: small(),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn recycled_storage_is_reused() {
        let device = FeedDevice::new("feed0", "Feed", small());
        let feeder = device.feeder();
        let first = feeder.acquire_i420(small());
        let ptr = first.planes()[0].data.as_ptr();
        feeder.push(first);
        assert_eq!(feeder.push(feeder.acquire_i420(small())), PushOutcome::ReplacedStale);
        assert_eq!(feeder.dropped(), 1);
        assert_eq!(feeder.acquire_i420(small()).planes()[0].data.as_ptr(), ptr);
    }

    #[test]
    fn malformed_frames_are_not_recycled() {
        let device = FeedDevice::new("feed0", "Feed", small());
        let feeder = device.feeder();
        feeder.push(OwnedFrame::i420(small(), 2, 2));
        assert_eq!(feeder.push(feeder.acquire_i420(small())), PushOutcome::ReplacedStale);

        let mut frame = feeder.acquire_i420(small());
        assert_eq!(frame.planes()[0].bytes_per_row, 8);
        assert_eq!(frame.planes()[0].data.len(), 8 * 4);
        paint_gradient(&mut frame, 1);
        assert_eq!(frame.planes()[0].data[1], 5);
    }

    #[test]
    fn unavailable_device_fails_to_open() {
        let device = FeedDevice::new("feed0", "Feed", small()).unavailable("permission denied");
        let err = device.open(&config()).err().expect("open must fail");
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn second_binding_is_busy_until_first_stream_drops() {
        let device = FeedDevice::new("feed0", "Feed", small());
        let stream = device.clone().open(&config()).expect("first open");
        assert!(device.clone().open(&config()).is_err());
        drop(stream);
        assert!(device.open(&config()).is_ok());
    }

    #[test]
    fn wrong_resolution_is_unsupported() {
        let device = FeedDevice::new("feed0", "Feed", small());
        let config = SessionConfig::default();
        assert_eq!(device.supports(&config).ok(), Some(false));
        assert!(matches!(device.open(&config), Err(Error::UnsupportedFormat)));
    }

    #[test]
    fn frames_pushed_before_start_collapse_to_latest() {
        let device = FeedDevice::new("feed0", "Feed", small());
        let feeder = device.feeder();
        for _ in 0..3 {
            feeder.push(feeder.acquire_i420(small()));
        }

        let mut stream = device.open(&config()).expect("open");
        let (tx, rx) = mpsc::channel();
        stream
            .start(move |frame| {
                let _ = tx.send(frame.sequence());
            })
            .expect("start");

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(3));
        stream.stop().expect("stop");
        assert!(matches!(stream.stop(), Err(Error::NotStarted)));
        assert_eq!(stream.dropped_frames(), 2);
        assert_eq!(feeder.push(feeder.acquire_i420(small())), PushOutcome::Closed);
    }

    #[test]
    fn test_pattern_honours_limit() {
        let device = FeedDevice::new("feed0", "Feed", small());
        let pattern = TestPattern::spawn(
            device.feeder(),
            small(),
            Ratio {
                numerator: 1000,
                denominator: 1,
            },
            Some(5),
        );
        assert_eq!(pattern.join(), 5);
        let feeder = device.feeder();
        assert_eq!(feeder.dropped(), 4);
    }
}
