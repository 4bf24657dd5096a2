use crate::capture::frame::{CopyPath, I420Frame};
use crate::error::FrameError;
use crate::pipeline::buffer_pool::Buffer;
use crate::utils::i420_size;

/// A decoded frame copied out of the producer's memory into a pooled buffer.
///
/// Owned by exactly one of the packet pool, the ready queue, or the code
/// currently turning it into an output sample.
#[derive(Debug)]
pub struct FramePacket {
    buffer: Buffer,
    width: u32,
    height: u32,
}

impl FramePacket {
    /// Wrap a buffer whose length already equals the I420 size of `width x height`.
    pub(crate) fn new(buffer: Buffer, width: u32, height: u32) -> Self {
        debug_assert_eq!(buffer.len(), i420_size(width, height));
        Self {
            buffer,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn byte_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn data(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// View the packet as a tightly packed frame.
    pub fn as_frame(&self) -> I420Frame<'_> {
        I420Frame::tight(self.width, self.height, self.buffer.as_slice())
    }

    /// Copy a producer frame of the same shape into this packet.
    pub fn fill_from(&mut self, frame: &I420Frame<'_>) -> Result<CopyPath, FrameError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(FrameError::SizeMismatch {
                width: frame.width,
                height: frame.height,
                expected: frame.byte_size(),
                actual: self.byte_size(),
            });
        }
        frame.copy_into(self.buffer.as_mut_slice())
    }

    pub(crate) fn into_buffer(self) -> Buffer {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::buffer_pool::BufferPool;

    #[test]
    fn fill_copies_frame_bytes() {
        let mut pool = BufferPool::new();
        let mut packet = FramePacket::new(pool.checkout(12).unwrap(), 4, 2);
        let src: Vec<u8> = (0..12).collect();

        let path = packet.fill_from(&I420Frame::tight(4, 2, &src)).unwrap();
        assert_eq!(path, CopyPath::Linear);
        assert_eq!(packet.data(), &src[..]);
        assert_eq!(packet.as_frame().plane(2), &[10, 11]);
    }

    #[test]
    fn fill_rejects_other_shapes() {
        let mut pool = BufferPool::new();
        let mut packet = FramePacket::new(pool.checkout(12).unwrap(), 4, 2);
        let src = [0u8; 10];

        assert!(matches!(
            packet.fill_from(&I420Frame::tight(3, 2, &src)),
            Err(FrameError::SizeMismatch { .. })
        ));
    }
}
