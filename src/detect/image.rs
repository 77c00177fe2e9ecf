//! Raw captured frames.

use bytes::Bytes;

/// A raw BGR24 frame as produced by a capture backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel data, `width * height * 3` bytes, row-major BGR.
    pub data: Bytes,
}

impl RawImage {
    /// Construct an image, checking the buffer length against the
    /// declared dimensions.
    pub fn new(width: u32, height: u32, data: Bytes) -> Option<Self> {
        if data.len() != (width as usize) * (height as usize) * 3 {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Rotate by 180 degrees (the only rotation sources declare).
    ///
    /// Equivalent to reversing the pixel order while keeping each pixel's
    /// channel order intact.
    pub fn rotate_180(&self) -> RawImage {
        let mut rotated = Vec::with_capacity(self.data.len());
        for pixel in self.data.chunks_exact(3).rev() {
            rotated.extend_from_slice(pixel);
        }
        RawImage {
            width: self.width,
            height: self.height,
            data: Bytes::from(rotated),
        }
    }
}
