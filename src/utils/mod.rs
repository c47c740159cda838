//! Image utilities for the segmentation pipeline

pub mod matting;
pub mod preprocessing;

pub use preprocessing::{ImagePreprocessor, PreprocessingConfig};
