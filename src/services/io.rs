//! Image I/O operations service
//!
//! Reading inputs, decoding engine output, deriving the default output path
//! and the large-input advisory checked before a job is submitted.

use crate::error::{EfiError, Result};
use image::DynamicImage;
use std::path::{Path, PathBuf};

/// Suffix appended to the input stem for the default output file
pub const OUTPUT_SUFFIX: &str = "_sin_fondo";

/// Service for handling image file input operations
#[derive(Debug)]
pub struct ImageIOService;

impl ImageIOService {
    /// Read an input file fully into memory
    ///
    /// # Errors
    /// - File does not exist or cannot be read
    pub async fn read_input<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
        let path = path.as_ref();
        tokio::fs::read(path)
            .await
            .map_err(|e| EfiError::file_io_error("read input image", path, &e))
    }

    /// Decode encoded image bytes returned by the segmentation engine
    ///
    /// # Errors
    /// - Bytes are empty or not a decodable image
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(EfiError::processing_stage_error(
                "decode",
                "segmentation engine returned no data",
                None,
            ));
        }
        image::load_from_memory(bytes).map_err(|e| {
            EfiError::processing_stage_error(
                "decode",
                &e.to_string(),
                Some(&format!("{} bytes", bytes.len())),
            )
        })
    }

    /// Derive the default output path: `<dir>/<stem>_sin_fondo.png`
    ///
    /// The original extension is dropped and the result is always PNG so
    /// transparency survives.
    #[must_use]
    pub fn default_output_path<P: AsRef<Path>>(input: P) -> PathBuf {
        let input = input.as_ref();
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        input.with_file_name(format!("{}{}.png", stem, OUTPUT_SUFFIX))
    }
}

/// Result of the pre-submission size check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputAdvisory {
    /// Input file size in bytes
    pub size_bytes: u64,
    /// Threshold the size was compared against
    pub threshold_bytes: u64,
}

impl InputAdvisory {
    /// Inspect an input file against `threshold_bytes`
    ///
    /// # Errors
    /// - File metadata cannot be read
    pub fn check<P: AsRef<Path>>(path: P, threshold_bytes: u64) -> Result<Self> {
        let path = path.as_ref();
        let size_bytes = std::fs::metadata(path)
            .map_err(|e| EfiError::file_io_error("read input metadata", path, &e))?
            .len();
        Ok(Self {
            size_bytes,
            threshold_bytes,
        })
    }

    /// Inputs strictly larger than the threshold need user confirmation
    #[must_use]
    pub fn requires_confirmation(&self) -> bool {
        self.size_bytes > self.threshold_bytes
    }

    /// Size in mebibytes for display
    #[must_use]
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}
