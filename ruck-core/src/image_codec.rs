//! PNG decode/encode adapter over the `image` crate, the same crate and
//! RGBA-copy-into-canvas approach the asset-packing tool in the retrieved
//! pack (`rust_pixel`'s `tools/asset`) uses for its own atlas builder.

use crate::error::{Result, RuckError};
use image::{GenericImage, ImageBuffer, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;

/// A decoded source image, always normalized to RGBA8.
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: RgbaImage,
}

fn codec_err(path: &Path, e: impl std::fmt::Display) -> RuckError {
    RuckError::Codec { path: path.to_path_buf(), message: e.to_string() }
}

/// Decode a PNG (or any format `image` recognizes) from disk into RGBA8.
pub fn decode_file(path: &Path) -> Result<DecodedImage> {
    let img = image::open(path).map_err(|e| codec_err(path, e))?;
    let rgba = img.to_rgba8();
    let (width, height) = (rgba.width(), rgba.height());
    Ok(DecodedImage { width, height, rgba })
}

/// Build a page canvas of `width` x `height` and blit each placed sprite
/// into it at its packed `(x, y)`, rotating 90 degrees clockwise first when
/// the placement says so.
pub fn compose_page(
    width: u32,
    height: u32,
    sprites: &[(u32, u32, bool, &RgbaImage)],
) -> Result<RgbaImage> {
    let mut canvas: RgbaImage = ImageBuffer::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    for (x, y, rotated, img) in sprites {
        let oriented = if *rotated { rotate90(img) } else { (*img).clone() };
        canvas
            .copy_from(&oriented, *x, *y)
            .map_err(|e| RuckError::Codec { path: "<page>".into(), message: e.to_string() })?;
    }
    Ok(canvas)
}

fn rotate90(img: &RgbaImage) -> RgbaImage {
    image::imageops::rotate90(img)
}

/// Encode an RGBA8 canvas as PNG bytes.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);
    img.write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| RuckError::Codec { path: "<page>".into(), message: e.to_string() })?;
    Ok(buf)
}

/// Decode a previously-encoded PNG page back to RGBA8 (used by `cat --texture`).
pub fn decode_png(bytes: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map_err(|e| RuckError::Codec { path: "<page>".into(), message: e.to_string() })?;
    Ok(img.to_rgba8())
}
