//! Frame Contract / Bridge: turns a delivered frame into a [`FrameContract`]
//! and runs the processing boundary on it, on the capture context.

use std::sync::Arc;

use tracing::{error, trace};

use crate::boundary::Processor;
use crate::frame::{Frame, FrameContract, GeometryError};
use crate::shared::StateWriter;
use crate::stats::PipelineStats;
use crate::trigger::RenderTrigger;
use crate::types::Size;

/// Per-frame sequence on the capture context:
/// validate -> `process` into the back buffer -> publish -> `request_render`.
///
/// Holds nothing from one frame to the next: the contract borrows the frame
/// for the duration of [`deliver`](Bridge::deliver) only.
pub struct Bridge<P: Processor> {
    processor: P,
    writer: StateWriter<P::State>,
    trigger: RenderTrigger,
    size: Size,
    stats: Arc<PipelineStats>,
}

impl<P: Processor> Bridge<P> {
    pub fn new(
        processor: P,
        writer: StateWriter<P::State>,
        trigger: RenderTrigger,
        size: Size,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Bridge {
            processor,
            writer,
            trigger,
            size,
            stats,
        }
    }

    /// Hand one frame across the boundary. Blocks until `process` returns
    /// and the result is published.
    ///
    /// A frame with malformed geometry never reaches the processor and does
    /// not request a render.
    pub fn deliver<F: Frame>(&mut self, frame: &F) -> Result<(), GeometryError> {
        self.stats.frame_delivered();
        let contract = match self.contract(frame) {
            Ok(contract) => contract,
            Err(e) => {
                self.stats.frame_rejected();
                return Err(e);
            }
        };

        let processor = &mut self.processor;
        self.writer.write(|state| processor.process(&contract, state));
        self.stats.frame_processed();

        let scheduled = self.trigger.request_render();
        self.stats.render_requested(scheduled);
        trace!(
            generation = self.writer.generation(),
            scheduled, "frame processed"
        );
        Ok(())
    }

    /// [`deliver`](Self::deliver), logging instead of returning a rejection.
    /// This is the form installed as the stream callback.
    pub fn deliver_or_log<F: Frame>(&mut self, frame: &F) {
        if let Err(e) = self.deliver(frame) {
            error!(error = %e, "rejected frame before processing");
        }
    }

    fn contract<'a, F: Frame>(&self, frame: &'a F) -> Result<FrameContract<'a>, GeometryError> {
        let contract = FrameContract::from_frame(frame)?;
        if contract.size() != self.size {
            return Err(GeometryError::SizeMismatch {
                expected: self.size,
                actual: contract.size(),
            });
        }
        Ok(contract)
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn into_processor(self) -> P {
        self.processor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Plane, Timestamp};
    use crate::shared::shared_state;
    use crate::types::PixelFormat;
    use std::convert::Infallible;
    use std::time::Duration;

    struct TestFrame {
        size: Size,
        planes: Vec<Plane<'static>>,
    }

    impl Frame for TestFrame {
        type Timestamp = Duration;

        fn pixel_format(&self) -> PixelFormat {
            PixelFormat::I420
        }

        fn size(&self) -> Size {
            self.size
        }

        fn planes(&self) -> &[Plane<'_>] {
            &self.planes
        }

        fn timestamp(&self) -> Duration {
            Duration::ZERO
        }
    }

    static Y: [u8; 16] = [9; 16];
    static UV: [u8; 4] = [128; 4];

    fn frame(size: Size) -> TestFrame {
        TestFrame {
            size,
            planes: vec![
                Plane {
                    data: &Y,
                    bytes_per_row: 4,
                },
                Plane {
                    data: &UV,
                    bytes_per_row: 2,
                },
                Plane {
                    data: &UV,
                    bytes_per_row: 2,
                },
            ],
        }
    }

    #[derive(Default)]
    struct FirstLuma {
        calls: usize,
    }

    impl Processor for FirstLuma {
        type State = u8;
        type Error = Infallible;

        fn initialize(&mut self, _size: Size) -> Result<u8, Infallible> {
            Ok(0)
        }

        fn process(&mut self, frame: &FrameContract<'_>, state: &mut u8) {
            self.calls += 1;
            *state = frame.luma(0, 0).unwrap_or_default();
        }
    }

    fn bridge(size: Size) -> (Bridge<FirstLuma>, crate::shared::StateReader<u8>, RenderTrigger) {
        let (writer, reader) = shared_state(0u8);
        let trigger = RenderTrigger::new();
        let stats = Arc::new(PipelineStats::new(size));
        (
            Bridge::new(FirstLuma::default(), writer, trigger.clone(), size, stats),
            reader,
            trigger,
        )
    }

    #[test]
    fn processes_publishes_then_requests_render() {
        let (mut bridge, reader, trigger) = bridge(Size::new(4, 4));
        bridge.deliver(&frame(Size::new(4, 4))).expect("valid frame");

        assert_eq!(bridge.processor().calls, 1);
        assert_eq!(*reader.load().state(), 9);
        assert_eq!(reader.generation(), 1);
        assert!(trigger.is_pending());
        assert_eq!(frame(Size::new(4, 4)).timestamp().as_secs_f64(), 0.0);
    }

    #[test]
    fn size_change_mid_session_is_rejected() {
        let (mut bridge, reader, trigger) = bridge(Size::new(4, 2));
        let err = bridge.deliver(&frame(Size::new(4, 4))).unwrap_err();
        assert!(matches!(err, GeometryError::SizeMismatch { .. }));
        assert_eq!(bridge.into_processor().calls, 0);
        assert_eq!(reader.generation(), 0);
        assert!(!trigger.is_pending());
    }
}
