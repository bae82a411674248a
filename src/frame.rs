use crate::types::{PixelFormat, Size};
use core::time::Duration;

/// A single plane of image data.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    pub bytes_per_row: usize,
}

/// A presentation timestamp.
pub trait Timestamp: Copy {
    fn as_secs_f64(&self) -> f64;
}

impl Timestamp for Duration {
    fn as_secs_f64(&self) -> f64 {
        Duration::as_secs_f64(self)
    }
}

/// A borrowed video frame. Lifetime tied to callback scope (zero-copy).
///
/// The source owns the storage behind [`planes`](Frame::planes); it is
/// released back to the source when the callback that received the frame
/// returns.
pub trait Frame {
    type Timestamp: Timestamp;

    fn pixel_format(&self) -> PixelFormat;
    fn size(&self) -> Size;
    fn planes(&self) -> &[Plane<'_>];
    fn timestamp(&self) -> Self::Timestamp;
}

/// Ways a frame can fail to describe valid planar 4:2:0 geometry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum GeometryError {
    #[error("expected 3 planes, got {0}")]
    PlaneCount(usize),
    #[error("frame dimensions {0} must be positive")]
    ZeroDimension(Size),
    #[error("{plane} stride {stride} is smaller than row width {width}")]
    StrideTooSmall {
        plane: PlaneId,
        stride: usize,
        width: usize,
    },
    #[error("U stride {u} differs from V stride {v}")]
    StrideMismatch { u: usize, v: usize },
    #[error("{plane} plane holds {len} bytes, needs at least {needed}")]
    PlaneTooShort {
        plane: PlaneId,
        len: usize,
        needed: usize,
    },
    #[error("frame is {actual}, session is {expected}")]
    SizeMismatch { expected: Size, actual: Size },
}

/// Names one of the three planes of a [`FrameContract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneId {
    Y,
    U,
    V,
}

impl core::fmt::Display for PlaneId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Y => "Y",
            Self::U => "U",
            Self::V => "V",
        })
    }
}

/// The fixed shape handed across the processing boundary: dimensions, three
/// read-only planes and two row strides.
///
/// Borrows the frame it was built from and so cannot outlive the delivery
/// callback.
#[derive(Debug, Clone, Copy)]
pub struct FrameContract<'a> {
    pub width: u32,
    pub height: u32,
    pub y_plane: &'a [u8],
    pub u_plane: &'a [u8],
    pub v_plane: &'a [u8],
    pub y_stride: usize,
    pub uv_stride: usize,
}

impl<'a> FrameContract<'a> {
    /// Validate `planes` against `size` and build the contract.
    pub fn new(size: Size, planes: &[Plane<'a>]) -> Result<Self, GeometryError> {
        let [y, u, v] = planes else {
            return Err(GeometryError::PlaneCount(planes.len()));
        };
        if size.is_empty() {
            return Err(GeometryError::ZeroDimension(size));
        }
        if u.bytes_per_row != v.bytes_per_row {
            return Err(GeometryError::StrideMismatch {
                u: u.bytes_per_row,
                v: v.bytes_per_row,
            });
        }

        let chroma = size.chroma();
        check_plane(PlaneId::Y, y, size)?;
        check_plane(PlaneId::U, u, chroma)?;
        check_plane(PlaneId::V, v, chroma)?;

        Ok(FrameContract {
            width: size.width,
            height: size.height,
            y_plane: y.data,
            u_plane: u.data,
            v_plane: v.data,
            y_stride: y.bytes_per_row,
            uv_stride: u.bytes_per_row,
        })
    }

    /// Build the contract for a delivered frame.
    pub fn from_frame<F: Frame>(frame: &'a F) -> Result<Self, GeometryError> {
        Self::new(frame.size(), frame.planes())
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Luma sample at (`x`, `y`), ignoring row padding. `None` outside the
    /// frame.
    pub fn luma(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.y_plane
            .get(y as usize * self.y_stride + x as usize)
            .copied()
    }
}

fn check_plane(id: PlaneId, plane: &Plane<'_>, size: Size) -> Result<(), GeometryError> {
    let width = size.width as usize;
    let rows = size.height as usize;
    if plane.bytes_per_row < width {
        return Err(GeometryError::StrideTooSmall {
            plane: id,
            stride: plane.bytes_per_row,
            width,
        });
    }
    // The last row may omit its padding.
    let needed = plane
        .bytes_per_row
        .checked_mul(rows - 1)
        .and_then(|n| n.checked_add(width))
        .unwrap_or(usize::MAX);
    if plane.data.len() < needed {
        return Err(GeometryError::PlaneTooShort {
            plane: id,
            len: plane.data.len(),
            needed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planes<'a>(y: &'a [u8], u: &'a [u8], v: &'a [u8], ys: usize, uvs: usize) -> [Plane<'a>; 3] {
        [
            Plane {
                data: y,
                bytes_per_row: ys,
            },
            Plane {
                data: u,
                bytes_per_row: uvs,
            },
            Plane {
                data: v,
                bytes_per_row: uvs,
            },
        ]
    }

    #[test]
    fn accepts_padded_strides() {
        let y = [0u8; 8 * 4];
        let uv = [0u8; 4 * 2];
        let contract = FrameContract::new(Size::new(6, 4), &planes(&y, &uv, &uv, 8, 4))
            .expect("padded geometry is valid");
        assert_eq!(contract.y_stride, 8);
        assert_eq!(contract.uv_stride, 4);
        assert_eq!(contract.size(), Size::new(6, 4));
    }

    #[test]
    fn last_row_may_omit_padding() {
        let y = [0u8; 8 * 3 + 6];
        let uv = [0u8; 4 + 3];
        assert!(FrameContract::new(Size::new(6, 4), &planes(&y, &uv, &uv, 8, 4)).is_ok());
    }

    #[test]
    fn luma_outside_the_frame_is_none() {
        let y: Vec<u8> = (0..8 * 4).collect();
        let uv = [0u8; 4 * 2];
        let contract = FrameContract::new(Size::new(6, 4), &planes(&y, &uv, &uv, 8, 4))
            .expect("padded geometry is valid");
        assert_eq!(contract.luma(5, 3), Some(29));
        assert_eq!(contract.luma(6, 0), None, "padding column");
        assert_eq!(contract.luma(0, 4), None);
    }

    #[test]
    fn huge_stride_is_rejected_without_overflow() {
        let y = [0u8; 16];
        let uv = [0u8; 8];
        let err = FrameContract::new(Size::new(4, 4), &planes(&y, &uv, &uv, usize::MAX, 2))
            .unwrap_err();
        assert_eq!(
            err,
            GeometryError::PlaneTooShort {
                plane: PlaneId::Y,
                len: 16,
                needed: usize::MAX,
            }
        );
    }

    #[test]
    fn rejects_stride_below_width() {
        let y = [0u8; 64];
        let uv = [0u8; 16];
        let err = FrameContract::new(Size::new(8, 4), &planes(&y, &uv, &uv, 6, 4)).unwrap_err();
        assert_eq!(
            err,
            GeometryError::StrideTooSmall {
                plane: PlaneId::Y,
                stride: 6,
                width: 8,
            }
        );
    }

    #[test]
    fn rejects_zero_dimensions_and_wrong_plane_count() {
        let y = [0u8; 16];
        let all = planes(&y, &y, &y, 4, 2);
        assert_eq!(
            FrameContract::new(Size::new(0, 4), &all).unwrap_err(),
            GeometryError::ZeroDimension(Size::new(0, 4))
        );
        assert_eq!(
            FrameContract::new(Size::new(4, 4), &all[..2]).unwrap_err(),
            GeometryError::PlaneCount(2)
        );
    }

    #[test]
    fn rejects_short_chroma_and_mismatched_strides() {
        let y = [0u8; 16];
        let uv = [0u8; 3];
        assert!(matches!(
            FrameContract::new(Size::new(4, 4), &planes(&y, &uv, &uv, 4, 2)),
            Err(GeometryError::PlaneTooShort {
                plane: PlaneId::U,
                ..
            })
        ));

        let uv = [0u8; 8];
        let mut mixed = planes(&y, &uv, &uv, 4, 2);
        mixed[2].bytes_per_row = 4;
        assert_eq!(
            FrameContract::new(Size::new(4, 4), &mixed).unwrap_err(),
            GeometryError::StrideMismatch { u: 2, v: 4 }
        );
    }
}
