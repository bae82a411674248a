use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::types::Size;

/// Counters shared by the capture and render contexts.
#[derive(Debug)]
pub struct PipelineStats {
    size: Size,
    started: Instant,
    delivered: AtomicU64,
    rejected: AtomicU64,
    processed: AtomicU64,
    render_requests: AtomicU64,
    renders_scheduled: AtomicU64,
    draws: AtomicU64,
}

impl PipelineStats {
    pub fn new(size: Size) -> Self {
        PipelineStats {
            size,
            started: Instant::now(),
            delivered: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            render_requests: AtomicU64::new(0),
            renders_scheduled: AtomicU64::new(0),
            draws: AtomicU64::new(0),
        }
    }

    pub(crate) fn frame_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn render_requested(&self, scheduled: bool) {
        self.render_requests.fetch_add(1, Ordering::Relaxed);
        if scheduled {
            self.renders_scheduled.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn drawn(&self) {
        self.draws.fetch_add(1, Ordering::Relaxed);
    }

    pub fn draws(&self) -> u64 {
        self.draws.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy. `dropped` comes from the frame source, which
    /// owns backpressure.
    pub fn snapshot(&self, dropped: u64) -> StatsSnapshot {
        let elapsed = self.started.elapsed().as_secs_f64();
        let processed = self.processed.load(Ordering::Relaxed);
        StatsSnapshot {
            resolution: self.size,
            frames_delivered: self.delivered.load(Ordering::Relaxed),
            frames_dropped: dropped,
            frames_rejected: self.rejected.load(Ordering::Relaxed),
            frames_processed: processed,
            render_requests: self.render_requests.load(Ordering::Relaxed),
            renders_scheduled: self.renders_scheduled.load(Ordering::Relaxed),
            draws: self.draws.load(Ordering::Relaxed),
            elapsed_secs: elapsed,
            processed_fps: if elapsed > 0.0 {
                processed as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

/// Serializable status of a running session.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct StatsSnapshot {
    pub resolution: Size,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub frames_rejected: u64,
    pub frames_processed: u64,
    pub render_requests: u64,
    pub renders_scheduled: u64,
    pub draws: u64,
    pub elapsed_secs: f64,
    pub processed_fps: f64,
}

impl core::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Resolution: {} | FPS: {:.1} | processed {} | dropped {} | draws {}",
            self.resolution,
            self.processed_fps,
            self.frames_processed,
            self.frames_dropped,
            self.draws
        )
    }
}
