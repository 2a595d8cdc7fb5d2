use std::path::Path;

use anyhow::Context;

use crate::foundation::{
    core::{Bitmap, FrameRGBA},
    error::{CompositorError, CompositorResult},
};

/// Decode PNG/JPEG/... bytes into a premultiplied bitmap.
pub fn decode_image(bytes: &[u8]) -> CompositorResult<Bitmap> {
    let dyn_img = image::load_from_memory(bytes).context("decode image from memory")?;
    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Bitmap::from_rgba8_straight(width, height, rgba.into_raw())
}

pub fn load_bitmap(path: &Path) -> CompositorResult<Bitmap> {
    let bytes = std::fs::read(path)
        .map_err(|e| CompositorError::asset(format!("read '{}': {e}", path.display())))?;
    decode_image(&bytes)
        .map_err(|e| CompositorError::asset(format!("decode '{}': {e}", path.display())))
}

/// Load `path`, falling back to a transparent 1x1 bitmap when it is unset or unreadable.
pub fn load_bitmap_or_empty(path: Option<&Path>) -> Bitmap {
    let Some(path) = path else {
        return Bitmap::empty();
    };
    match load_bitmap(path) {
        Ok(bmp) => bmp,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "using empty bitmap");
            Bitmap::empty()
        }
    }
}

/// Write a read-back frame as a straight-alpha PNG.
pub fn save_png(frame: &FrameRGBA, path: &Path) -> CompositorResult<()> {
    let data = if frame.premultiplied {
        unpremultiply(&frame.data)
    } else {
        frame.data.clone()
    };
    image::save_buffer_with_format(
        path,
        &data,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", path.display()))?;
    Ok(())
}

fn unpremultiply(rgba: &[u8]) -> Vec<u8> {
    let mut out = rgba.to_vec();
    for px in out.chunks_exact_mut(4) {
        let a = u16::from(px[3]);
        if a == 0 || a == 255 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((u16::from(*c) * 255 + a / 2) / a).min(255) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn decode_image_png_dimensions_and_premul() {
        let src_rgba = vec![100u8, 50u8, 200u8, 128u8];
        let img = image::RgbaImage::from_raw(1, 1, src_rgba).unwrap();

        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();

        let bmp = decode_image(&buf).unwrap();
        assert_eq!((bmp.width, bmp.height), (1, 1));
        assert_eq!(
            bmp.pixel(0, 0),
            [
                ((100u16 * 128 + 127) / 255) as u8,
                ((50u16 * 128 + 127) / 255) as u8,
                ((200u16 * 128 + 127) / 255) as u8,
                128u8
            ]
        );
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode_image(b"not an image").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_empty() {
        let bmp = load_bitmap_or_empty(Some(Path::new("target/definitely/missing.png")));
        assert_eq!(bmp, Bitmap::empty());
        assert_eq!(load_bitmap_or_empty(None), Bitmap::empty());
    }

    #[test]
    fn unpremultiply_restores_straight_color() {
        assert_eq!(unpremultiply(&[64, 0, 0, 128]), vec![128, 0, 0, 128]);
        assert_eq!(unpremultiply(&[0, 0, 0, 0]), vec![0, 0, 0, 0]);
    }
}
