use crate::stream::CameraStream;
use crate::types::{FormatDescriptor, SessionConfig};

/// Discover and inspect camera devices.
pub trait CameraManager {
    type Device: CameraDevice;
    type Error: core::error::Error;

    fn discover_devices(&self) -> Result<impl Iterator<Item = Self::Device>, Self::Error>;
    fn default_device(&self) -> Result<Option<Self::Device>, Self::Error>;
}

/// A camera device that can be inspected and bound to a capture stream.
pub trait CameraDevice {
    type Stream: CameraStream;
    type Error: core::error::Error;

    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn supported_formats(&self) -> Result<impl Iterator<Item = FormatDescriptor>, Self::Error>;

    /// Bind the device at the session's fixed resolution and format.
    ///
    /// Fails if the device is busy, access is denied, or no format
    /// satisfies `config`.
    fn open(self, config: &SessionConfig) -> Result<Self::Stream, Self::Error>;

    /// Whether any native format delivers `config` as-is.
    fn supports(&self, config: &SessionConfig) -> Result<bool, Self::Error> {
        Ok(self.supported_formats()?.any(|f| f.satisfies(config)))
    }
}
