//! U²-Net tensor preparation and mask post-processing

use crate::error::{EfiError, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use ndarray::{Array4, ArrayView2, Axis};

/// Model input preparation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessingConfig {
    /// Square side the image is resized to
    pub target_size: u32,
    /// Per-channel mean (RGB)
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation (RGB)
    pub normalization_std: [f32; 3],
}

impl PreprocessingConfig {
    /// Parameters of the U²-Net family (320×320, `ImageNet` statistics)
    #[must_use]
    pub fn u2net() -> Self {
        Self {
            target_size: 320,
            normalization_mean: [0.485, 0.456, 0.406],
            normalization_std: [0.229, 0.224, 0.225],
        }
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self::u2net()
    }
}

/// Shared image preprocessing utilities
#[derive(Debug)]
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Convert an image into a normalized NCHW tensor
    ///
    /// The image is stretched to the square target size (no padding), scaled
    /// by its brightest channel value and normalized per channel.
    ///
    /// # Errors
    /// - Image has zero width or height
    pub fn preprocess(image: &DynamicImage, config: &PreprocessingConfig) -> Result<Array4<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EfiError::processing("Cannot preprocess an empty image"));
        }

        let size = config.target_size;
        let rgb = imageops::resize(&image.to_rgb8(), size, size, FilterType::Lanczos3);

        let max_value = rgb.as_raw().iter().copied().max().unwrap_or(0);
        let scale = f32::from(max_value).max(1e-6);

        let side = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for (channel, value) in pixel.0.iter().enumerate() {
                let mean = config.normalization_mean.get(channel).copied().unwrap_or(0.0);
                let std = config.normalization_std.get(channel).copied().unwrap_or(1.0);
                if let Some(slot) = tensor.get_mut([0, channel, y as usize, x as usize]) {
                    *slot = (f32::from(*value) / scale - mean) / std;
                }
            }
        }

        Ok(tensor)
    }

    /// Turn the first output channel into a grayscale mask of the given size
    ///
    /// Values are min-max normalized to 0-255 before resizing. A constant
    /// prediction yields an all-black mask.
    ///
    /// # Errors
    /// - Output tensor has no batch or channel entry
    pub fn mask_from_output(output: &Array4<f32>, width: u32, height: u32) -> Result<GrayImage> {
        let (batch, channels, _, _) = output.dim();
        if batch == 0 || channels == 0 {
            return Err(EfiError::processing(format!(
                "Unexpected model output shape {:?}",
                output.dim()
            )));
        }

        let prediction: ArrayView2<'_, f32> = output.index_axis(Axis(0), 0).index_axis_move(Axis(0), 0);
        let (rows, cols) = prediction.dim();

        let (min, max) = prediction
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;

        let mask = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
            let value = prediction
                .get((y as usize, x as usize))
                .copied()
                .unwrap_or(min);
            let normalized = if range > f32::EPSILON {
                (value - min) / range
            } else {
                0.0
            };
            Luma([(normalized * 255.0).round().clamp(0.0, 255.0) as u8])
        });

        if mask.dimensions() == (width, height) {
            return Ok(mask);
        }
        Ok(imageops::resize(&mask, width, height, FilterType::Lanczos3))
    }
}
