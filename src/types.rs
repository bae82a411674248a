use arrayvec::ArrayVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum number of frame rate ranges per format descriptor.
const MAX_FRAME_RATE_RANGES: usize = 8;

/// Pixel formats encountered across platforms.
///
/// Only [`PixelFormat::I420`] carries the three independent planes the
/// processing boundary accepts; the others are reported during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[non_exhaustive]
pub enum PixelFormat {
    I420,
    Nv12,
    Yuyv,
    Uyvy,
    Bgra32,
    Jpeg,
}

impl PixelFormat {
    /// Number of separately addressable planes a frame of this format carries.
    pub fn plane_count(&self) -> usize {
        match self {
            Self::I420 => 3,
            Self::Nv12 => 2,
            Self::Yuyv | Self::Uyvy | Self::Bgra32 | Self::Jpeg => 1,
        }
    }
}

/// Pixel dimensions of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Size { width, height }
    }

    /// Dimensions of a 4:2:0 chroma plane, rounding odd sizes up.
    pub const fn chroma(&self) -> Size {
        Size {
            width: self.width.div_ceil(2),
            height: self.height.div_ceil(2),
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl core::fmt::Display for Size {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A rational number (numerator / denominator).
///
/// Used to represent frame rates (e.g. 30000/1000 = 30 fps) and
/// frame durations (e.g. 1000/30000 ≈ 0.033 s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ratio {
    pub numerator: u32,
    pub denominator: u32,
}

impl Ratio {
    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Interval between frames for a rate expressed as this ratio.
    pub fn frame_interval(&self) -> core::time::Duration {
        if self.numerator == 0 {
            return core::time::Duration::ZERO;
        }
        core::time::Duration::from_secs_f64(self.denominator as f64 / self.numerator as f64)
    }
}

/// Frame rate, expressed as frames per `denominator` seconds.
pub type FrameRate = Ratio;

/// Range of supported frame rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRateRange {
    pub min: Ratio,
    pub max: Ratio,
}

/// Describes a supported camera format.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDescriptor {
    pub pixel_format: PixelFormat,
    pub size: Size,
    frame_rate_ranges: ArrayVec<FrameRateRange, MAX_FRAME_RATE_RANGES>,
}

impl FormatDescriptor {
    /// Create descriptors for a given format, automatically splitting across
    /// multiple [`FormatDescriptor`] values if the number of frame rate
    /// ranges exceeds the inline capacity.
    pub(crate) fn from_ranges(
        pixel_format: PixelFormat,
        size: Size,
        frame_rate_ranges: impl IntoIterator<Item = FrameRateRange>,
    ) -> impl Iterator<Item = Self> {
        let mut iter = frame_rate_ranges.into_iter();
        core::iter::from_fn(move || {
            let mut chunk = ArrayVec::new();
            for range in iter.by_ref() {
                chunk.push(range);
                if chunk.is_full() {
                    break;
                }
            }
            if chunk.is_empty() {
                None
            } else {
                Some(FormatDescriptor {
                    pixel_format,
                    size,
                    frame_rate_ranges: chunk,
                })
            }
        })
    }

    /// The frame rate ranges supported by this format.
    pub fn frame_rate_ranges(&self) -> &[FrameRateRange] {
        &self.frame_rate_ranges
    }

    /// Whether this format can serve `config` exactly.
    pub fn satisfies(&self, config: &SessionConfig) -> bool {
        let rate = config.frame_rate.as_f64();
        self.pixel_format == config.pixel_format
            && self.size == config.size
            && self
                .frame_rate_ranges
                .iter()
                .any(|r| r.min.as_f64() <= rate && rate <= r.max.as_f64())
    }
}

/// What the Frame Source does with a frame that arrives while the consumer
/// is still busy with the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[non_exhaustive]
pub enum Backpressure {
    /// Replace the pending frame; never queue more than one.
    #[default]
    KeepOnlyLatest,
}

/// When the render stage draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[non_exhaustive]
pub enum RenderMode {
    /// Draw only in response to a render request.
    #[default]
    OnDemand,
}

/// Configuration for a capture session. Fixed once the session starts.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    pub pixel_format: PixelFormat,
    pub size: Size,
    pub frame_rate: FrameRate,
    pub backpressure: Backpressure,
    pub render_mode: RenderMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            pixel_format: PixelFormat::I420,
            size: Size::new(640, 480),
            frame_rate: Ratio {
                numerator: 30,
                denominator: 1,
            },
            backpressure: Backpressure::KeepOnlyLatest,
            render_mode: RenderMode::OnDemand,
        }
    }
}

#[cfg(feature = "serde")]
impl SessionConfig {
    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroma_rounds_up_odd_dimensions() {
        assert_eq!(Size::new(640, 480).chroma(), Size::new(320, 240));
        assert_eq!(Size::new(641, 479).chroma(), Size::new(321, 240));
    }

    #[test]
    fn default_config_matches_capture_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.size, Size::new(640, 480));
        assert_eq!(config.pixel_format, PixelFormat::I420);
        assert_eq!(config.backpressure, Backpressure::KeepOnlyLatest);
        assert_eq!(config.render_mode, RenderMode::OnDemand);
    }

    #[test]
    fn descriptors_split_past_inline_capacity() {
        let range = FrameRateRange {
            min: Ratio {
                numerator: 1,
                denominator: 1,
            },
            max: Ratio {
                numerator: 30,
                denominator: 1,
            },
        };
        let descriptors: Vec<_> = FormatDescriptor::from_ranges(
            PixelFormat::I420,
            Size::new(640, 480),
            core::iter::repeat_n(range, MAX_FRAME_RATE_RANGES + 1),
        )
        .collect();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[1].frame_rate_ranges().len(), 1);
        assert!(descriptors[0].satisfies(&SessionConfig::default()));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn toml_config_fills_missing_keys() {
        let config = SessionConfig::from_toml_str(
            r#"
            backpressure = "keep-only-latest"
            render_mode = "on-demand"

            [size]
            width = 1280
            height = 720
            "#,
        )
        .expect("valid config");
        assert_eq!(config.size, Size::new(1280, 720));
        assert_eq!(config.frame_rate, SessionConfig::default().frame_rate);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn toml_config_rejects_unknown_backpressure() {
        assert!(SessionConfig::from_toml_str(r#"backpressure = "queue""#).is_err());
    }
}
