//! Mask refinement and cutout composition
//!
//! With matting enabled the soft mask is split into a trimap. Pixels above
//! the foreground threshold and below the background threshold become
//! definite regions, both shrunk by a square erosion so the uncertain band
//! around edges widens. Definite regions get fully opaque or fully
//! transparent alpha, the band keeps the soft mask value.

use crate::config::AlphaMattingConfig;
use crate::error::{EfiError, Result};
use image::{GrayImage, Luma, Rgba, RgbaImage};

/// Trimap label of a pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimapRegion {
    Foreground,
    Background,
    Unknown,
}

/// Binary erosion with a `size × size` square structuring element
///
/// The element is anchored at `size / 2`, so for even sizes the window
/// reaches one pixel further up and left than down and right. Pixels outside
/// the image take `border_value`. A size of 0 or 1 returns the input.
#[must_use]
pub fn erode(mask: &[bool], width: usize, height: usize, size: usize, border_value: bool) -> Vec<bool> {
    if size <= 1 || mask.len() != width * height {
        return mask.to_vec();
    }

    let before = (size / 2) as isize;
    let after = (size - 1 - size / 2) as isize;

    // Square erosion is separable: rows first, then columns.
    let horizontal = erode_1d(mask, width, height, before, after, border_value, true);
    erode_1d(&horizontal, width, height, before, after, border_value, false)
}

fn erode_1d(
    mask: &[bool],
    width: usize,
    height: usize,
    before: isize,
    after: isize,
    border_value: bool,
    along_rows: bool,
) -> Vec<bool> {
    let (w, h) = (width as isize, height as isize);
    let mut out = vec![false; mask.len()];
    for y in 0..h {
        for x in 0..w {
            let all_set = (-before..=after).all(|d| {
                let (sx, sy) = if along_rows { (x + d, y) } else { (x, y + d) };
                if sx < 0 || sy < 0 || sx >= w || sy >= h {
                    border_value
                } else {
                    mask.get((sy * w + sx) as usize).copied().unwrap_or(border_value)
                }
            });
            if let Some(slot) = out.get_mut((y * w + x) as usize) {
                *slot = all_set;
            }
        }
    }
    out
}

/// Build the trimap of a soft mask
#[must_use]
pub fn trimap(mask: &GrayImage, config: &AlphaMattingConfig) -> Vec<TrimapRegion> {
    let (width, height) = (mask.width() as usize, mask.height() as usize);
    let size = config.erode_size as usize;

    let foreground: Vec<bool> = mask.pixels().map(|p| p.0[0] > config.foreground_threshold).collect();
    let background: Vec<bool> = mask.pixels().map(|p| p.0[0] < config.background_threshold).collect();

    let foreground = erode(&foreground, width, height, size, false);
    let background = erode(&background, width, height, size, true);

    foreground
        .iter()
        .zip(background.iter())
        .map(|(&fg, &bg)| match (fg, bg) {
            (true, _) => TrimapRegion::Foreground,
            (false, true) => TrimapRegion::Background,
            (false, false) => TrimapRegion::Unknown,
        })
        .collect()
}

/// Alpha channel for `mask` under `config`
#[must_use]
pub fn estimate_alpha(mask: &GrayImage, config: &AlphaMattingConfig) -> GrayImage {
    if !config.enabled {
        return mask.clone();
    }

    let regions = trimap(mask, config);
    let mut alpha = mask.clone();
    for (pixel, region) in alpha.pixels_mut().zip(regions) {
        match region {
            TrimapRegion::Foreground => *pixel = Luma([255]),
            TrimapRegion::Background => *pixel = Luma([0]),
            TrimapRegion::Unknown => {},
        }
    }
    alpha
}

/// Combine an RGBA source with a mask into the cutout
///
/// # Errors
/// - Mask and image dimensions differ
pub fn cutout(image: &RgbaImage, mask: &GrayImage, config: &AlphaMattingConfig) -> Result<RgbaImage> {
    if image.dimensions() != mask.dimensions() {
        return Err(EfiError::processing(format!(
            "Mask size {:?} does not match image size {:?}",
            mask.dimensions(),
            image.dimensions()
        )));
    }

    let alpha = estimate_alpha(mask, config);
    let mut result = image.clone();
    for (pixel, a) in result.pixels_mut().zip(alpha.pixels()) {
        let Rgba([r, g, b, _]) = *pixel;
        *pixel = Rgba([r, g, b, a.0[0]]);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matting(erode_size: u32) -> AlphaMattingConfig {
        AlphaMattingConfig {
            erode_size,
            ..AlphaMattingConfig::default()
        }
    }

    #[test]
    fn test_erode_window_offsets() {
        // Single false pixel at (5, 5) in a 12x12 true field
        let (w, h) = (12, 12);
        let mut mask = vec![true; w * h];
        mask[5 * w + 5] = false;

        let eroded = erode(&mask, w, h, 10, true);
        // Window for size 10 covers offsets -5..=4: x in 1..=10 sees (5, 5)
        assert!(!eroded[5 * w + 1]);
        assert!(!eroded[5 * w + 10]);
        assert!(eroded[5 * w]);
        assert!(eroded[5 * w + 11]);
    }

    #[test]
    fn test_erode_border_value() {
        let (w, h) = (6, 6);
        let mask = vec![true; w * h];

        assert!(erode(&mask, w, h, 3, true).iter().all(|&v| v));

        let eroded = erode(&mask, w, h, 3, false);
        assert!(!eroded[0]);
        assert!(eroded[2 * w + 2]);
        assert_eq!(eroded.iter().filter(|&&v| v).count(), 16);
    }

    #[test]
    fn test_erode_size_zero_is_identity() {
        let mask = vec![true, false, true, false];
        assert_eq!(erode(&mask, 2, 2, 0, false), mask);
    }

    #[test]
    fn test_trimap_regions() {
        let mut mask = GrayImage::from_pixel(3, 1, Luma([128]));
        mask.put_pixel(0, 0, Luma([250]));
        mask.put_pixel(2, 0, Luma([5]));

        let regions = trimap(&mask, &matting(0));
        assert_eq!(
            regions,
            vec![
                TrimapRegion::Foreground,
                TrimapRegion::Unknown,
                TrimapRegion::Background
            ]
        );
    }

    #[test]
    fn test_thresholds_are_strict() {
        let mut mask = GrayImage::from_pixel(2, 1, Luma([240]));
        mask.put_pixel(1, 0, Luma([10]));
        let regions = trimap(&mask, &matting(0));
        assert!(regions.iter().all(|r| *r == TrimapRegion::Unknown));
    }

    #[test]
    fn test_disabled_matting_uses_soft_mask() {
        let image = RgbaImage::from_pixel(2, 1, Rgba([9, 8, 7, 255]));
        let mut mask = GrayImage::from_pixel(2, 1, Luma([250]));
        mask.put_pixel(1, 0, Luma([3]));

        let config = AlphaMattingConfig {
            enabled: false,
            ..AlphaMattingConfig::default()
        };
        let result = cutout(&image, &mask, &config).unwrap();
        assert_eq!(result.get_pixel(0, 0).0, [9, 8, 7, 250]);
        assert_eq!(result.get_pixel(1, 0).0, [9, 8, 7, 3]);
    }

    #[test]
    fn test_enabled_matting_snaps_definite_regions() {
        let image = RgbaImage::from_pixel(20, 20, Rgba([1, 2, 3, 255]));
        let mut mask = GrayImage::from_pixel(20, 20, Luma([0]));
        for y in 0..20 {
            for x in 10..20 {
                mask.put_pixel(x, y, Luma([245]));
            }
        }

        let result = cutout(&image, &mask, &AlphaMattingConfig::default()).unwrap();
        assert_eq!(result.get_pixel(2, 10).0[3], 0);
        assert_eq!(result.get_pixel(15, 10).0[3], 255);
        // Within the erosion reach of the edge and of the image border
        assert_eq!(result.get_pixel(12, 10).0[3], 245);
        assert_eq!(result.get_pixel(18, 10).0[3], 245);

        let result = cutout(&image, &mask, &matting(3)).unwrap();
        assert_eq!(result.get_pixel(15, 10).0[3], 255);
        // Edge column of the foreground is eroded back to the soft value
        assert_eq!(result.get_pixel(10, 10).0[3], 245);
    }

    #[test]
    fn test_cutout_dimension_mismatch() {
        let image = RgbaImage::new(2, 2);
        let mask = GrayImage::new(3, 2);
        assert!(cutout(&image, &mask, &AlphaMattingConfig::default()).is_err());
    }
}
