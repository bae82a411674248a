use std::time::Duration;

use arrayvec::ArrayVec;
use objc2_core_media::CMTime;
use objc2_core_video::{
    CVPixelBuffer, CVPixelBufferGetBaseAddressOfPlane, CVPixelBufferGetBytesPerRowOfPlane,
    CVPixelBufferGetHeight, CVPixelBufferGetHeightOfPlane, CVPixelBufferGetPixelFormatType,
    CVPixelBufferGetPlaneCount, CVPixelBufferGetWidth,
};

use crate::frame::{Frame, Plane, Timestamp};
use crate::platform::macos::device::fourcc_to_pixel_format;
use crate::types::{PixelFormat, Size};

/// I420 carries three planes; anything else is rejected at the bridge.
const MAX_PLANES: usize = 3;

/// Presentation time of a sample buffer, as Core Media reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacosTimestamp {
    pub value: i64,
    pub timescale: i32,
    pub flags: u32,
    pub epoch: i64,
}

impl MacosTimestamp {
    pub(crate) fn from_cm_time(time: CMTime) -> Self {
        MacosTimestamp {
            value: time.value,
            timescale: time.timescale,
            flags: time.flags.0,
            epoch: time.epoch,
        }
    }

    /// `None` for invalid, indefinite or negative times.
    pub fn to_duration(&self) -> Option<Duration> {
        let secs = self.as_secs_f64();
        (self.flags & 1 != 0 && self.timescale > 0 && secs >= 0.0)
            .then(|| Duration::from_secs_f64(secs))
    }
}

impl Timestamp for MacosTimestamp {
    fn as_secs_f64(&self) -> f64 {
        if self.timescale > 0 {
            self.value as f64 / self.timescale as f64
        } else {
            0.0
        }
    }
}

/// A planar frame borrowed from a locked `CVPixelBuffer`. Only valid inside
/// the stream callback; the buffer is unlocked when the callback returns.
pub struct MacosFrame<'a> {
    planes: ArrayVec<Plane<'a>, MAX_PLANES>,
    pixel_format: PixelFormat,
    size: Size,
    timestamp: MacosTimestamp,
}

impl<'a> MacosFrame<'a> {
    /// # Safety
    /// The pixel buffer's base address must stay locked for `'a`.
    pub(crate) unsafe fn from_locked_pixel_buffer(
        pixel_buffer: &'a CVPixelBuffer,
        timestamp: MacosTimestamp,
    ) -> Self {
        let size = Size::new(
            CVPixelBufferGetWidth(pixel_buffer) as u32,
            CVPixelBufferGetHeight(pixel_buffer) as u32,
        );
        // Packed formats report no planes and so produce an empty frame.
        let pixel_format = fourcc_to_pixel_format(CVPixelBufferGetPixelFormatType(pixel_buffer))
            .unwrap_or(PixelFormat::Nv12);

        let count = CVPixelBufferGetPlaneCount(pixel_buffer).min(MAX_PLANES);
        let planes = (0..count)
            .map_while(|index| unsafe { plane(pixel_buffer, index) })
            .collect();

        MacosFrame {
            planes,
            pixel_format,
            size,
            timestamp,
        }
    }
}

/// # Safety
/// Same contract as [`MacosFrame::from_locked_pixel_buffer`].
unsafe fn plane<'a>(pixel_buffer: &'a CVPixelBuffer, index: usize) -> Option<Plane<'a>> {
    let base = CVPixelBufferGetBaseAddressOfPlane(pixel_buffer, index);
    if base.is_null() {
        return None;
    }
    let bytes_per_row = CVPixelBufferGetBytesPerRowOfPlane(pixel_buffer, index);
    let rows = CVPixelBufferGetHeightOfPlane(pixel_buffer, index);
    let data = unsafe { std::slice::from_raw_parts(base as *const u8, bytes_per_row * rows) };
    Some(Plane {
        data,
        bytes_per_row,
    })
}

impl Frame for MacosFrame<'_> {
    type Timestamp = MacosTimestamp;

    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn size(&self) -> Size {
        self.size
    }

    fn planes(&self) -> &[Plane<'_>] {
        &self.planes
    }

    fn timestamp(&self) -> MacosTimestamp {
        self.timestamp
    }
}
