use std::sync::Arc;

use crate::foundation::error::{CompositorError, CompositorResult};

pub use kurbo::{Affine, Point, Rect, Vec2};

/// Render target dimensions in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OutputSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl OutputSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `true` when either side is zero; aspect math is skipped for such sizes.
    pub fn is_degenerate(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width / height, or `None` for degenerate sizes.
    pub fn aspect(self) -> Option<f32> {
        if self.is_degenerate() {
            return None;
        }
        Some(self.width as f32 / self.height as f32)
    }
}

/// A decoded image as premultiplied RGBA8, tightly packed and row-major.
///
/// Bitmaps are cheap to clone; pixel storage is shared. A bitmap with a zero
/// side or a buffer that does not match its dimensions is treated as released
/// and is never uploaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub rgba8_premul: Arc<Vec<u8>>,
}

impl Bitmap {
    /// Wrap premultiplied RGBA8 bytes, validating the buffer length.
    pub fn from_rgba8_premul(width: u32, height: u32, data: Vec<u8>) -> CompositorResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| CompositorError::validation("bitmap dimensions overflow"))?;
        if width == 0 || height == 0 {
            return Err(CompositorError::validation("bitmap must be non-empty"));
        }
        if data.len() != expected {
            return Err(CompositorError::validation(format!(
                "bitmap buffer has {} bytes, expected {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            rgba8_premul: Arc::new(data),
        })
    }

    /// Wrap straight-alpha RGBA8 bytes, premultiplying in place.
    pub fn from_rgba8_straight(
        width: u32,
        height: u32,
        mut data: Vec<u8>,
    ) -> CompositorResult<Self> {
        premultiply_rgba8_in_place(&mut data);
        Self::from_rgba8_premul(width, height, data)
    }

    /// A bitmap filled with one straight-alpha color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> CompositorResult<Self> {
        let px = premultiply(rgba);
        let len = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(len * 4);
        for _ in 0..len {
            data.extend_from_slice(&px);
        }
        Self::from_rgba8_premul(width, height, data)
    }

    /// 1x1 transparent placeholder used when a layer source is missing.
    pub fn empty() -> Self {
        Self {
            width: 1,
            height: 1,
            rgba8_premul: Arc::new(vec![0; 4]),
        }
    }

    /// Swap rows and columns. Feeding a transposed still image as the camera
    /// input of the matting compositor shows it upright.
    pub fn transposed(&self) -> Self {
        let (w, h) = (self.width as usize, self.height as usize);
        let src = self.rgba8_premul.as_slice();
        let mut data = vec![0u8; src.len()];
        if src.len() == w * h * 4 {
            for y in 0..h {
                for x in 0..w {
                    let from = (y * w + x) * 4;
                    let to = (x * h + y) * 4;
                    data[to..to + 4].copy_from_slice(&src[from..from + 4]);
                }
            }
        }
        Self {
            width: self.height,
            height: self.width,
            rgba8_premul: Arc::new(data),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgba8_premul.len() == (self.width as usize) * (self.height as usize) * 4
    }

    pub fn size(&self) -> OutputSize {
        OutputSize::new(self.width, self.height)
    }

    /// Premultiplied pixel at `(x, y)`; caller guarantees the bitmap is valid.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let p = &self.rgba8_premul[i..i + 4];
        [p[0], p[1], p[2], p[3]]
    }
}

/// A rendered frame read back from a device target.
#[derive(Clone, Debug)]
pub struct FrameRGBA {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGBA8 bytes, tightly packed, row-major.
    pub data: Vec<u8>,
    /// Whether `data` is premultiplied alpha.
    pub premultiplied: bool,
}

impl FrameRGBA {
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

pub(crate) fn premultiply(rgba: [u8; 4]) -> [u8; 4] {
    let a = u16::from(rgba[3]);
    let premul = |c: u8| (((u16::from(c) * a) + 127) / 255) as u8;
    [premul(rgba[0]), premul(rgba[1]), premul(rgba[2]), rgba[3]]
}

pub(crate) fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let out = premultiply([px[0], px[1], px[2], px[3]]);
        px.copy_from_slice(&out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpose_swaps_axes() {
        let bmp = Bitmap::from_rgba8_premul(
            2,
            1,
            vec![10, 0, 0, 255, 20, 0, 0, 255],
        )
        .unwrap();
        let t = bmp.transposed();
        assert_eq!((t.width, t.height), (1, 2));
        assert_eq!(t.pixel(0, 1), [20, 0, 0, 255]);
        assert_eq!(t.transposed(), bmp);
    }

    #[test]
    fn degenerate_sizes_have_no_aspect() {
        assert_eq!(OutputSize::new(0, 10).aspect(), None);
        assert_eq!(OutputSize::new(10, 0).aspect(), None);
        assert_eq!(OutputSize::new(200, 100).aspect(), Some(2.0));
    }

    #[test]
    fn bitmap_rejects_mismatched_buffers() {
        assert!(Bitmap::from_rgba8_premul(2, 2, vec![0; 15]).is_err());
        assert!(Bitmap::from_rgba8_premul(0, 2, vec![]).is_err());
        assert!(Bitmap::from_rgba8_premul(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn straight_alpha_is_premultiplied() {
        let bmp = Bitmap::from_rgba8_straight(1, 1, vec![200, 100, 50, 128]).unwrap();
        assert_eq!(
            bmp.pixel(0, 0),
            [
                ((200u16 * 128 + 127) / 255) as u8,
                ((100u16 * 128 + 127) / 255) as u8,
                ((50u16 * 128 + 127) / 255) as u8,
                128
            ]
        );
    }

    #[test]
    fn hand_built_bitmap_with_bad_len_is_invalid() {
        let bmp = Bitmap {
            width: 4,
            height: 4,
            rgba8_premul: Arc::new(vec![0; 8]),
        };
        assert!(!bmp.is_valid());
        assert!(Bitmap::empty().is_valid());
    }
}
