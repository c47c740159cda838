//! Export of processed results
//!
//! PNG keeps the alpha channel as produced. JPEG has no alpha, so the result
//! is composited onto an opaque white canvas of the same size first.

use crate::error::{EfiError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Composite an RGBA image onto white
///
/// Each channel becomes `round(c * a / 255 + 255 * (1 - a / 255))`.
#[must_use]
pub fn flatten_on_white(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let image::Rgba([r, g, b, a]) = *image.get_pixel(x, y);
        let a = u32::from(a);
        let blend = |c: u8| -> u8 { ((u32::from(c) * a + 255 * (255 - a) + 127) / 255) as u8 };
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Write `image` as PNG, preserving alpha
///
/// # Errors
/// - [`EfiError::Save`] on any encode or write failure
pub fn save_default<P: AsRef<Path>>(image: &DynamicImage, path: P) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| EfiError::save(format!("failed to write PNG '{}': {}", path.display(), e)))?;
    log::info!("Saved result to {}", path.display());
    Ok(())
}

/// Write `image` in the format implied by the extension of `path`
///
/// `.jpg`/`.jpeg` (any case) are flattened onto white and encoded at
/// `jpeg_quality`. Other supported extensions are written with alpha intact.
///
/// # Errors
/// - [`EfiError::Save`] for a missing or unsupported extension, or any encode
///   or write failure
pub fn save_as<P: AsRef<Path>>(image: &DynamicImage, path: P, jpeg_quality: u8) -> Result<()> {
    let path = path.as_ref();
    let format = ImageFormat::from_path(path).map_err(|_| {
        EfiError::save(format!(
            "cannot determine output format from '{}'",
            path.display()
        ))
    })?;

    ensure_parent(path)?;

    if format == ImageFormat::Jpeg {
        let flattened = flatten_on_white(&image.to_rgba8());
        let file = File::create(path).map_err(|e| {
            EfiError::save(format!("failed to create '{}': {}", path.display(), e))
        })?;
        let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), jpeg_quality.clamp(1, 100));
        encoder
            .encode_image(&flattened)
            .map_err(|e| EfiError::save(format!("failed to write JPEG '{}': {}", path.display(), e)))?;
    } else {
        image.save_with_format(path, format).map_err(|e| {
            EfiError::save(format!(
                "failed to write {:?} '{}': {}",
                format,
                path.display(),
                e
            ))
        })?;
    }

    log::info!("Saved result to {}", path.display());
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| {
                EfiError::save(format!(
                    "failed to create output directory '{}': {}",
                    parent.display(),
                    e
                ))
            }),
        _ => Ok(()),
    }
}
