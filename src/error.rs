#[cfg(target_os = "macos")]
use objc2::exception::Exception;
#[cfg(target_os = "macos")]
use objc2::rc::Retained;
#[cfg(target_os = "macos")]
use objc2_foundation::NSError;

use crate::frame::GeometryError;

/// Platform-specific error details.
///
/// On platforms that provide native error objects (e.g. `NSError` on macOS),
/// the original object is preserved. Use [`Display`](core::fmt::Display) to
/// obtain a human-readable description.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PlatformError {
    #[error("{0}")]
    Message(String),
    #[cfg(target_os = "macos")]
    #[error("{0}")]
    NsError(Retained<NSError>),
    #[cfg(target_os = "macos")]
    #[error("{}", .0.as_ref().map(|e| format!("{e:?}")).unwrap_or_else(|| "unknown Objective-C exception".into()))]
    ObjCException(Option<Retained<Exception>>),
}

/// Top-level crate error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("no such device")]
    DeviceNotFound,
    #[error("unsupported format")]
    UnsupportedFormat,
    #[error("stream already started")]
    AlreadyStarted,
    #[error("stream not started")]
    NotStarted,
    #[error("frame source disconnected")]
    Disconnected,
    #[error("malformed frame: {0}")]
    Geometry(#[from] GeometryError),
    #[error("processing boundary failed to initialize: {0}")]
    Processor(String),
    #[error("render surface failed to initialize: {0}")]
    Surface(String),
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl Error {
    /// Shorthand for a [`PlatformError::Message`].
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(PlatformError::Message(msg.into()))
    }
}
