//! Borrowed I420 frames as handed over by the media pipeline.

use crate::error::FrameError;
use crate::utils::{chroma_dim, copy_rows, i420_size, strided_extent};

/// Number of planes in an I420 image (Y, U, V).
pub const PLANES: usize = 3;

/// Where the plane bytes of an incoming frame live.
#[derive(Debug, Clone, Copy)]
enum PlaneLayout<'a> {
    /// One region holding Y, U and V back to back, each plane taking
    /// `stride * rows` bytes (the last plane may omit its trailing padding).
    Packed(&'a [u8]),
    /// Three independent regions.
    Split([&'a [u8]; PLANES]),
}

/// How a frame gets copied into a tightly packed buffer.
///
/// Selection is a pure function of the strides and plane addresses; every
/// path produces the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyPath {
    /// Planes are tight and sequential in one region: a single linear copy.
    /// Split planes whose slices sit back to back in memory qualify too.
    Linear,
    /// Planes are tight but live in separate regions: one copy per plane.
    PerPlane,
    /// At least one plane is padded: row-by-row copy per plane.
    PerRow,
}

/// A decoded 8-bit planar YUV 4:2:0 frame borrowed from the producer.
#[derive(Debug, Clone, Copy)]
pub struct I420Frame<'a> {
    pub width: u32,
    pub height: u32,
    layout: PlaneLayout<'a>,
    strides: [usize; PLANES],
}

impl<'a> I420Frame<'a> {
    /// Frame whose planes arrive as three separate slices.
    #[allow(clippy::too_many_arguments)]
    pub fn from_planes(
        width: u32,
        height: u32,
        y: &'a [u8],
        u: &'a [u8],
        v: &'a [u8],
        stride_y: usize,
        stride_u: usize,
        stride_v: usize,
    ) -> Self {
        Self {
            width,
            height,
            layout: PlaneLayout::Split([y, u, v]),
            strides: [stride_y, stride_u, stride_v],
        }
    }

    /// Frame whose planes are laid out back to back in one region.
    pub fn packed(width: u32, height: u32, data: &'a [u8], strides: [usize; PLANES]) -> Self {
        Self {
            width,
            height,
            layout: PlaneLayout::Packed(data),
            strides,
        }
    }

    /// Tightly packed frame, the layout `FramePacket` and `OutputSample` use.
    pub fn tight(width: u32, height: u32, data: &'a [u8]) -> Self {
        let c = chroma_dim(width) as usize;
        Self::packed(width, height, data, [width as usize, c, c])
    }

    /// Logical row width and row count of a plane.
    pub fn plane_dims(&self, plane: usize) -> (usize, usize) {
        if plane == 0 {
            (self.width as usize, self.height as usize)
        } else {
            (
                chroma_dim(self.width) as usize,
                chroma_dim(self.height) as usize,
            )
        }
    }

    pub fn stride(&self, plane: usize) -> usize {
        self.strides[plane]
    }

    /// Bytes of a tightly packed copy of this frame.
    pub fn byte_size(&self) -> usize {
        i420_size(self.width, self.height)
    }

    /// Borrow the bytes of one plane, padding included.
    pub fn plane(&self, plane: usize) -> &'a [u8] {
        match self.layout {
            PlaneLayout::Split(planes) => planes[plane],
            PlaneLayout::Packed(data) => {
                let mut offset = 0;
                for p in 0..plane {
                    offset += self.strides[p] * self.plane_dims(p).1;
                }
                let span = self.strides[plane] * self.plane_dims(plane).1;
                let start = offset.min(data.len());
                let end = (offset + span).min(data.len());
                &data[start..end]
            }
        }
    }

    /// Check that strides and plane lengths describe a readable frame.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        for plane in 0..PLANES {
            let (row, rows) = self.plane_dims(plane);
            let stride = self.strides[plane];
            if stride < row {
                return Err(FrameError::StrideTooSmall { plane, stride, row });
            }
            let len = self.plane(plane).len();
            let needed = strided_extent(row, rows, stride);
            if len < needed {
                return Err(FrameError::PlaneTooShort { plane, len, needed });
            }
        }
        Ok(())
    }

    /// Pick the cheapest copy that reproduces the frame bytes exactly.
    pub fn copy_path(&self) -> CopyPath {
        let tight = (0..PLANES).all(|p| self.strides[p] == self.plane_dims(p).0);
        if !tight {
            return CopyPath::PerRow;
        }
        match self.layout {
            PlaneLayout::Packed(_) => CopyPath::Linear,
            PlaneLayout::Split(planes) if self.is_contiguous(planes) => CopyPath::Linear,
            PlaneLayout::Split(_) => CopyPath::PerPlane,
        }
    }

    /// Whether tight split planes form one region: each slice is exactly its
    /// plane and ends where the next one starts.
    fn is_contiguous(&self, planes: [&[u8]; PLANES]) -> bool {
        let exact = (0..PLANES).all(|p| {
            let (row, rows) = self.plane_dims(p);
            planes[p].len() == row * rows
        });
        exact
            && planes
                .windows(2)
                .all(|pair| pair[0].as_ptr_range().end == pair[1].as_ptr())
    }

    /// Copy the frame into `dst` as tightly packed I420.
    ///
    /// `dst` must be exactly [`Self::byte_size`] bytes long.
    pub fn copy_into(&self, dst: &mut [u8]) -> Result<CopyPath, FrameError> {
        self.validate()?;
        let expected = self.byte_size();
        if dst.len() != expected {
            return Err(FrameError::SizeMismatch {
                width: self.width,
                height: self.height,
                expected,
                actual: dst.len(),
            });
        }

        let path = self.copy_path();
        match (path, self.layout) {
            (CopyPath::Linear, PlaneLayout::Packed(data)) => {
                dst.copy_from_slice(&data[..expected]);
            }
            (CopyPath::Linear, PlaneLayout::Split(planes)) => {
                // one region read front to back, a plane at a time
                let mut offset = 0;
                for plane in planes {
                    dst[offset..offset + plane.len()].copy_from_slice(plane);
                    offset += plane.len();
                }
            }
            _ => {
                let mut offset = 0;
                for plane in 0..PLANES {
                    let (row, rows) = self.plane_dims(plane);
                    let len = row * rows;
                    copy_rows(
                        &mut dst[offset..offset + len],
                        row,
                        self.plane(plane),
                        self.strides[plane],
                        row,
                        rows,
                    );
                    offset += len;
                }
            }
        }
        Ok(path)
    }
}
