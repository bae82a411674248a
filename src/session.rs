//! Session lifecycle: wire a frame source, the bridge and the render stage
//! together, start them in order and tear them down in reverse.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::boundary::{Processor, Renderer};
use crate::bridge::Bridge;
use crate::device::CameraDevice;
use crate::error::Error;
use crate::render::{RenderDriver, RenderLoop};
use crate::shared::shared_state;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::stream::CameraStream;
use crate::trigger::RenderTrigger;
use crate::types::SessionConfig;

const RENDER_THREAD: &str = "frame-render";

/// A running capture-process-render session.
///
/// Startup order: `Processor::initialize`, render surface, capture binding.
/// Teardown order: capture stops (no `process` in flight afterwards and the
/// processor is dropped with the stream callback), then the render loop
/// stops (the in-flight draw finishes, then the surface is released).
pub struct Session<S: CameraStream> {
    config: SessionConfig,
    stream: Option<S>,
    render: Option<RenderLoop>,
    trigger: RenderTrigger,
    stats: Arc<PipelineStats>,
}

impl<S> Session<S>
where
    S: CameraStream,
    S::Error: Into<Error>,
{
    /// Start a session with a dedicated render thread. Any failure,
    /// including binding the capture device, is returned.
    pub fn start<D, P, R>(
        config: &SessionConfig,
        device: D,
        processor: P,
        renderer: R,
    ) -> Result<Self, Error>
    where
        D: CameraDevice<Stream = S>,
        D::Error: Into<Error>,
        P: Processor,
        R: Renderer<P::State>,
    {
        let (mut session, bridge, driver) = Self::assemble(config, processor, renderer)?;
        session.render = Some(RenderLoop::spawn(RENDER_THREAD, driver)?);
        session.bind(device, bridge)?;
        Ok(session)
    }

    /// Like [`start`](Self::start), but a capture binding failure is logged
    /// and swallowed: the session comes up with its render surface but never
    /// receives a frame. Processor and surface failures are still returned.
    pub fn launch<D, P, R>(
        config: &SessionConfig,
        device: D,
        processor: P,
        renderer: R,
    ) -> Result<Self, Error>
    where
        D: CameraDevice<Stream = S>,
        D::Error: Into<Error>,
        P: Processor,
        R: Renderer<P::State>,
    {
        let (mut session, bridge, driver) = Self::assemble(config, processor, renderer)?;
        session.render = Some(RenderLoop::spawn(RENDER_THREAD, driver)?);
        if let Err(e) = session.bind(device, bridge) {
            error!(error = %e, "camera binding failed; no frames will be rendered");
        }
        Ok(session)
    }

    /// Start a session whose draw cycles are driven by the caller through the
    /// returned [`RenderDriver`]. The surface is initialized before binding.
    ///
    /// At teardown, stop the session first, then call
    /// [`RenderDriver::release_surface`].
    #[allow(clippy::type_complexity)]
    pub fn start_driven<D, P, R>(
        config: &SessionConfig,
        device: D,
        processor: P,
        renderer: R,
    ) -> Result<(Self, RenderDriver<P::State, R>), Error>
    where
        D: CameraDevice<Stream = S>,
        D::Error: Into<Error>,
        P: Processor,
        R: Renderer<P::State>,
    {
        let (mut session, bridge, mut driver) = Self::assemble(config, processor, renderer)?;
        driver.initialize_surface()?;
        session.bind(device, bridge)?;
        Ok((session, driver))
    }

    #[allow(clippy::type_complexity)]
    fn assemble<P, R>(
        config: &SessionConfig,
        mut processor: P,
        renderer: R,
    ) -> Result<(Self, Bridge<P>, RenderDriver<P::State, R>), Error>
    where
        P: Processor,
        R: Renderer<P::State>,
    {
        let initial = processor
            .initialize(config.size)
            .map_err(|e| Error::Processor(e.to_string()))?;
        debug!(size = %config.size, "processing boundary initialized");

        let (writer, reader) = shared_state(initial);
        let trigger = RenderTrigger::new();
        let stats = Arc::new(PipelineStats::new(config.size));
        let bridge = Bridge::new(
            processor,
            writer,
            trigger.clone(),
            config.size,
            Arc::clone(&stats),
        );
        let driver = RenderDriver::new(renderer, reader, trigger.clone(), Arc::clone(&stats));

        let session = Session {
            config: config.clone(),
            stream: None,
            render: None,
            trigger,
            stats,
        };
        Ok((session, bridge, driver))
    }

    fn bind<D, P>(&mut self, device: D, mut bridge: Bridge<P>) -> Result<(), Error>
    where
        D: CameraDevice<Stream = S>,
        D::Error: Into<Error>,
        P: Processor,
    {
        info!(
            device = device.name(),
            size = %self.config.size,
            "binding capture device"
        );
        let mut stream = device.open(&self.config).map_err(Into::into)?;
        stream
            .start(move |frame| bridge.deliver_or_log(frame))
            .map_err(Into::into)?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Whether a capture stream is bound and delivering.
    pub fn is_capturing(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_running())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handle for requesting extra draws (e.g. after a surface resize).
    pub fn trigger(&self) -> &RenderTrigger {
        &self.trigger
    }

    pub fn stats(&self) -> StatsSnapshot {
        let dropped = self.stream.as_ref().map_or(0, |s| s.dropped_frames());
        self.stats.snapshot(dropped)
    }

    /// Tear the session down. Idempotent; [`stats`](Self::stats) stays
    /// available afterwards.
    pub fn stop(&mut self) -> Result<(), Error> {
        let mut result = Ok(());
        if let Some(stream) = self.stream.as_mut().filter(|s| s.is_running()) {
            debug!("stopping capture");
            result = stream.stop().map_err(Into::into);
        }
        if let Some(mut render) = self.render.take() {
            debug!("stopping render loop");
            render.stop();
        }
        result
    }
}

impl<S: CameraStream> Drop for Session<S> {
    fn drop(&mut self) {
        // Same order as `stop`; errors have nowhere to go.
        if let Some(stream) = self.stream.as_mut().filter(|s| s.is_running()) {
            let _ = stream.stop();
        }
        if let Some(mut render) = self.render.take() {
            render.stop();
        }
    }
}
