//! The render context: waits for render requests and runs the render stage
//! once per satisfied request. Never polls and never draws on its own.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::boundary::Renderer;
use crate::error::Error;
use crate::shared::StateReader;
use crate::stats::PipelineStats;
use crate::trigger::RenderTrigger;

/// Owns the render stage and performs draw cycles.
///
/// Use it directly when an external refresh loop (a compositor frame
/// callback, a display link) drives rendering, or hand it to
/// [`RenderLoop::spawn`] for a dedicated on-demand render thread.
pub struct RenderDriver<S, R: Renderer<S>> {
    renderer: R,
    reader: StateReader<S>,
    trigger: RenderTrigger,
    stats: Arc<PipelineStats>,
    surface_ready: bool,
}

impl<S, R: Renderer<S>> RenderDriver<S, R> {
    pub fn new(
        renderer: R,
        reader: StateReader<S>,
        trigger: RenderTrigger,
        stats: Arc<PipelineStats>,
    ) -> Self {
        RenderDriver {
            renderer,
            reader,
            trigger,
            stats,
            surface_ready: false,
        }
    }

    /// Run the render stage's surface setup. Only the first call does work.
    pub fn initialize_surface(&mut self) -> Result<(), Error> {
        if self.surface_ready {
            return Ok(());
        }
        self.renderer
            .initialize_surface()
            .map_err(|e| Error::Surface(e.to_string()))?;
        self.surface_ready = true;
        debug!("render surface initialized");
        Ok(())
    }

    /// One refresh cycle: if a render is pending, draw the latest published
    /// state and return `true`; otherwise touch nothing and return `false`.
    pub fn draw_cycle(&mut self) -> bool {
        if !self.surface_ready || !self.trigger.begin_draw() {
            return false;
        }
        {
            let current = self.reader.load();
            self.renderer.draw(&current);
        }
        self.trigger.finish_draw();
        self.stats.drawn();
        true
    }

    pub fn trigger(&self) -> &RenderTrigger {
        &self.trigger
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Tear the surface down and hand back the render stage.
    pub fn release_surface(mut self) -> R {
        if self.surface_ready {
            self.renderer.release_surface();
            self.surface_ready = false;
            debug!("render surface released");
        }
        self.renderer
    }
}

/// A dedicated render thread in on-demand mode.
pub struct RenderLoop {
    handle: Option<JoinHandle<()>>,
    trigger: RenderTrigger,
    name: String,
}

impl RenderLoop {
    /// Spawn the render thread, initialize the surface on it and wait for
    /// that to finish. A surface failure is returned and the thread exits.
    pub fn spawn<S, R>(name: &str, mut driver: RenderDriver<S, R>) -> Result<Self, Error>
    where
        S: Send + Sync + 'static,
        R: Renderer<S>,
    {
        let trigger = driver.trigger.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let init = match driver.initialize_surface() {
                    Ok(()) => Ok(()),
                    Err(Error::Surface(msg)) => Err(msg),
                    Err(e) => Err(e.to_string()),
                };
                let failed = init.is_err();
                // The spawner is blocked on this channel.
                let _ = ready_tx.send(init);
                if failed {
                    return;
                }
                debug!(name = %thread_name, "render thread started");

                while driver.trigger.wait_pending(None) {
                    driver.draw_cycle();
                }

                driver.release_surface();
                info!(name = %thread_name, "render thread exiting");
            })
            .map_err(|e| Error::platform(format!("failed to spawn render thread: {e}")))?;

        let init = ready_rx
            .recv()
            .unwrap_or_else(|_| Err("render thread exited during setup".into()));
        if let Err(msg) = init {
            let _ = handle.join();
            return Err(Error::Surface(msg));
        }

        info!(name = %name, "render loop running");
        Ok(RenderLoop {
            handle: Some(handle),
            trigger,
            name: name.to_string(),
        })
    }

    /// Stop the render thread. Returns after any in-flight draw has finished
    /// and the surface has been released.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        debug!(name = %self.name, "stopping render loop");
        self.trigger.close();
        if handle.join().is_err() {
            warn!(name = %self.name, "render thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{Processed, shared_state};
    use crate::types::Size;
    use std::convert::Infallible;
    use std::sync::mpsc::Receiver;

    struct Recorder {
        drawn: mpsc::Sender<u64>,
    }

    impl Renderer<u32> for Recorder {
        type Error = Infallible;

        fn initialize_surface(&mut self) -> Result<(), Infallible> {
            Ok(())
        }

        fn draw(&mut self, state: &Processed<u32>) {
            let _ = self.drawn.send(state.generation());
        }
    }

    fn driver() -> (
        RenderDriver<u32, Recorder>,
        crate::shared::StateWriter<u32>,
        StateReader<u32>,
        Receiver<u64>,
    ) {
        let (writer, reader) = shared_state(0u32);
        let (tx, rx) = mpsc::channel();
        let driver = RenderDriver::new(
            Recorder { drawn: tx },
            reader.clone(),
            RenderTrigger::new(),
            Arc::new(PipelineStats::new(Size::new(2, 2))),
        );
        (driver, writer, reader, rx)
    }

    #[test]
    fn idle_cycle_does_not_read_state() {
        let (mut driver, _writer, reader, drawn) = driver();
        driver.initialize_surface().expect("surface");
        assert!(!driver.draw_cycle());
        assert!(!driver.draw_cycle());
        assert_eq!(reader.read_count(), 0);
        assert!(drawn.try_recv().is_err());
    }

    #[test]
    fn burst_of_requests_yields_one_draw() {
        let (mut driver, mut writer, _reader, drawn) = driver();
        driver.initialize_surface().expect("surface");
        for value in 1..=3 {
            writer.write(|state| *state = value);
            driver.trigger().request_render();
        }

        assert!(driver.draw_cycle());
        assert!(!driver.draw_cycle());
        assert_eq!(drawn.try_recv(), Ok(3));
        assert!(drawn.try_recv().is_err());
        assert_eq!(driver.stats.draws(), 1);
        assert_eq!(driver.trigger().state(), crate::trigger::TriggerState::Idle);
    }

    #[test]
    fn nothing_is_drawn_before_the_surface_exists() {
        let (mut driver, _writer, reader, _drawn) = driver();
        driver.trigger().request_render();
        assert!(!driver.draw_cycle());
        assert_eq!(reader.read_count(), 0);
        assert!(driver.trigger().is_pending());
    }

    #[test]
    fn loop_draws_on_request_and_stops_cleanly() {
        let (driver, mut writer, _reader, drawn) = driver();
        let trigger = driver.trigger().clone();
        let mut render = RenderLoop::spawn("render-test", driver).expect("spawn");
        assert!(render.is_running());

        writer.write(|state| *state = 7);
        trigger.request_render();
        assert_eq!(drawn.recv_timeout(std::time::Duration::from_secs(5)), Ok(1));

        render.stop();
        assert!(!render.is_running());
    }
}
