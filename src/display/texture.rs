//! Texture descriptors and the upload seam to the graphics backend

use serde::{Deserialize, Serialize};

/// Backend texture identity (a native texture pointer or name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// A texture a renderer uploads one plane into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
}

/// Pixel layout of a texture being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoFormat {
    /// One 8-bit channel; used per plane for planar formats.
    R8,
    Rgba8,
    Bgra8,
}

impl VideoFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            VideoFormat::R8 => 1,
            VideoFormat::Rgba8 | VideoFormat::Bgra8 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoDesc {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
}

/// Kind of frames a renderer was enabled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoKind {
    #[default]
    None,
    I420,
    Argb,
}

/// Mapped texture memory handed out by [`RenderApi::begin_modify_texture`].
#[derive(Debug)]
pub struct TextureUpdate<'a> {
    pub data: &'a mut [u8],
    /// Bytes between the starts of consecutive rows.
    pub row_pitch: usize,
}

/// Graphics backend used by the upload pass.
///
/// Implementations are only called from the render thread, with no bridge
/// or registry lock held.
pub trait RenderApi {
    /// Map writable memory for a texture of `desc`, or `None` to skip it.
    fn begin_modify_texture(&mut self, desc: &VideoDesc) -> Option<TextureUpdate<'_>>;

    /// Commit the memory mapped by the matching `begin_modify_texture`.
    fn end_modify_texture(&mut self, texture: TextureId, desc: &VideoDesc);

    /// Called once per uploaded frame.
    fn end_of_frame(&mut self, _frame_id: u64) {}
}
