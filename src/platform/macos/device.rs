use objc2::rc::Retained;
use objc2_av_foundation::{
    AVCaptureDevice, AVCaptureDeviceFormat, AVMediaType, AVMediaTypeVideo,
};
use objc2_core_media::CMVideoFormatDescriptionGetDimensions;
use tracing::debug;

use crate::device::{CameraDevice, CameraManager};
use crate::error::Error;
use crate::platform::macos::stream::MacosCameraStream;
use crate::types::*;

/// Core Video pixel format codes, first match wins when mapping back.
const FOURCCS: [(u32, PixelFormat); 7] = [
    (u32::from_be_bytes(*b"y420"), PixelFormat::I420),
    (u32::from_be_bytes(*b"420v"), PixelFormat::Nv12),
    (u32::from_be_bytes(*b"420f"), PixelFormat::Nv12),
    (u32::from_be_bytes(*b"yuvs"), PixelFormat::Yuyv),
    (u32::from_be_bytes(*b"2vuy"), PixelFormat::Uyvy),
    (u32::from_be_bytes(*b"BGRA"), PixelFormat::Bgra32),
    (u32::from_be_bytes(*b"jpeg"), PixelFormat::Jpeg),
];

pub(crate) fn fourcc_to_pixel_format(fourcc: u32) -> Option<PixelFormat> {
    FOURCCS
        .iter()
        .find(|(code, _)| *code == fourcc)
        .map(|(_, format)| *format)
}

pub(crate) fn pixel_format_to_fourcc(format: PixelFormat) -> u32 {
    FOURCCS
        .iter()
        .find(|(_, f)| *f == format)
        .map_or(0, |(code, _)| *code)
}

/// AVFoundation video devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct MacosCameraManager;

fn video_media_type() -> Result<&'static AVMediaType, Error> {
    unsafe { AVMediaTypeVideo }.ok_or_else(|| Error::platform("AVMediaTypeVideo not available"))
}

impl CameraManager for MacosCameraManager {
    type Device = MacosCameraDevice;
    type Error = Error;

    fn discover_devices(&self) -> Result<impl Iterator<Item = Self::Device>, Self::Error> {
        let media_type = video_media_type()?;
        #[allow(deprecated)]
        let devices: Vec<_> = unsafe { AVCaptureDevice::devicesWithMediaType(media_type) }
            .iter()
            .map(|d| MacosCameraDevice::new(d.clone()))
            .collect();
        debug!(count = devices.len(), "discovered video devices");
        Ok(devices.into_iter())
    }

    fn default_device(&self) -> Result<Option<Self::Device>, Self::Error> {
        let device = unsafe { AVCaptureDevice::defaultDeviceWithMediaType(video_media_type()?) };
        Ok(device.map(MacosCameraDevice::new))
    }
}

/// An `AVCaptureDevice` with its identity read once.
pub struct MacosCameraDevice {
    device: Retained<AVCaptureDevice>,
    id: String,
    name: String,
}

impl MacosCameraDevice {
    fn new(device: Retained<AVCaptureDevice>) -> Self {
        let id = unsafe { device.uniqueID() }.to_string();
        let name = unsafe { device.localizedName() }.to_string();
        MacosCameraDevice { device, id, name }
    }

    /// The native format to activate for `config`. The output converts to
    /// the session's pixel format, so only size and rate have to match.
    fn native_format(&self, config: &SessionConfig) -> Option<Retained<AVCaptureDeviceFormat>> {
        let rate = config.frame_rate.as_f64();
        unsafe { self.device.formats() }.iter().find(|format| {
            format_size(format) == config.size
                && format_rate_ranges(format)
                    .iter()
                    .any(|r| r.min.as_f64() <= rate && rate <= r.max.as_f64())
        })
    }
}

pub(crate) fn format_size(format: &AVCaptureDeviceFormat) -> Size {
    let desc = unsafe { format.formatDescription() };
    let dims = unsafe { CMVideoFormatDescriptionGetDimensions(&desc) };
    Size::new(dims.width as u32, dims.height as u32)
}

fn format_rate_ranges(format: &AVCaptureDeviceFormat) -> Vec<FrameRateRange> {
    unsafe { format.videoSupportedFrameRateRanges() }
        .iter()
        .map(|r| FrameRateRange {
            min: fps_to_ratio(unsafe { r.minFrameRate() }),
            max: fps_to_ratio(unsafe { r.maxFrameRate() }),
        })
        .collect()
}

fn fps_to_ratio(fps: f64) -> Ratio {
    // Millihertz keeps 29.97 exact enough.
    Ratio {
        numerator: (fps * 1000.0).round() as u32,
        denominator: 1000,
    }
}

impl CameraDevice for MacosCameraDevice {
    type Stream = MacosCameraStream;
    type Error = Error;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supported_formats(&self) -> Result<impl Iterator<Item = FormatDescriptor>, Self::Error> {
        let formats: Vec<_> = unsafe { self.device.formats() }
            .iter()
            .filter_map(|format| {
                let desc = unsafe { format.formatDescription() };
                let pixel_format = fourcc_to_pixel_format(unsafe { desc.media_sub_type() })?;
                Some(FormatDescriptor::from_ranges(
                    pixel_format,
                    format_size(&format),
                    format_rate_ranges(&format),
                ))
            })
            .flatten()
            .collect();
        Ok(formats.into_iter())
    }

    fn open(self, config: &SessionConfig) -> Result<Self::Stream, Self::Error> {
        let format = self.native_format(config).ok_or(Error::UnsupportedFormat)?;
        debug!(id = %self.id, size = %config.size, "native format selected");
        MacosCameraStream::new(self.device, format, config)
    }
}
