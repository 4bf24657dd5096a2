//! Plane geometry and row copies shared by the frame copy paths and the
//! texture upload pass.

/// Chroma plane dimension for a luma dimension (4:2:0 subsampling, rounded up).
#[inline]
pub const fn chroma_dim(luma: u32) -> u32 {
    (luma + 1) / 2
}

/// Size in bytes of a tightly packed I420 image.
#[inline]
pub const fn i420_size(width: u32, height: u32) -> usize {
    let luma = width as usize * height as usize;
    let chroma = chroma_dim(width) as usize * chroma_dim(height) as usize;
    luma + 2 * chroma
}

/// Bytes a strided plane must span: every row but the last takes a full
/// stride, the last only needs its logical width.
#[inline]
pub const fn strided_extent(row: usize, rows: usize, stride: usize) -> usize {
    if rows == 0 {
        0
    } else {
        stride * (rows - 1) + row
    }
}

/// Copy `rows` rows of `row` bytes between two strided regions.
///
/// Both `src` and `dst` must cover their strided extent.
pub fn copy_rows(
    dst: &mut [u8],
    dst_stride: usize,
    src: &[u8],
    src_stride: usize,
    row: usize,
    rows: usize,
) {
    if row == 0 {
        return;
    }
    if src_stride == row && dst_stride == row {
        let len = row * rows;
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }
    for r in 0..rows {
        let s = r * src_stride;
        let d = r * dst_stride;
        dst[d..d + row].copy_from_slice(&src[s..s + row]);
    }
}
