use crate::frame::Frame;

/// Callback-based frame delivery: the Frame Source side of the pipeline.
///
/// Implementations invoke the callback on a single serial capture context,
/// one frame at a time. A frame that arrives while the callback is still
/// running is handled according to the session's
/// [`Backpressure`](crate::types::Backpressure) policy and is never
/// delivered concurrently with another.
pub trait CameraStream {
    type Frame<'a>: Frame
    where
        Self: 'a;
    type Error: core::error::Error;

    /// Start streaming. Callback is invoked on the capture context for each
    /// frame; the frame is released back to the source when it returns.
    fn start<F>(&mut self, callback: F) -> Result<(), Self::Error>
    where
        F: FnMut(&Self::Frame<'_>) + Send + 'static;

    /// Stop streaming. When this returns no callback is running and none
    /// will run again.
    fn stop(&mut self) -> Result<(), Self::Error>;

    fn is_running(&self) -> bool;

    /// Frames discarded by backpressure since the stream was opened.
    fn dropped_frames(&self) -> u64 {
        0
    }
}
