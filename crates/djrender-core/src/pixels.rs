//! Scratch buffers and RGB to RGBA expansion.

use tracing::trace;

use crate::error::{Result, SessionError};

/// Allocate a zeroed buffer of `len` bytes, reporting failure instead of
/// aborting the process.
pub(crate) fn alloc_scratch(len: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| SessionError::AllocFailed(len))?;
    buffer.resize(len, 0);
    trace!("Allocated {} byte scratch buffer", len);
    Ok(buffer)
}

/// Copy tightly packed RGB pixels into RGBA, alpha fully opaque.
///
/// Converts `min(rgb.len() / 3, rgba.len() / 4)` pixels in order; callers
/// size both buffers for the same pixel count.
pub fn expand_rgb_to_rgba(rgb: &[u8], rgba: &mut [u8]) {
    for (dst, src) in rgba.chunks_exact_mut(4).zip(rgb.chunks_exact(3)) {
        dst[..3].copy_from_slice(src);
        dst[3] = u8::MAX;
    }
}
