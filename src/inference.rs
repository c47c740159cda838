//! Inference backend abstraction and factory

use crate::config::{BackendType, ExecutionProvider};
use crate::error::{EfiError, Result};
use ndarray::Array4;
use std::path::Path;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for inference backends
///
/// A backend owns one loaded model. It takes an NCHW float tensor and returns
/// the raw model output without interpretation.
pub trait InferenceBackend: Send {
    /// Load the model file and prepare it for inference
    ///
    /// Returns the load time on first initialization and `None` if the backend
    /// was already initialized.
    ///
    /// # Errors
    /// - Model file cannot be read
    /// - Model cannot be parsed or optimized by the backend
    fn initialize(
        &mut self,
        model_path: &Path,
        provider: ExecutionProvider,
    ) -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Output is not a 4D float tensor
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;

    /// Short backend name for logging
    fn name(&self) -> &'static str;
}

/// Create an uninitialized backend of the requested type
///
/// # Errors
/// - The backend was not compiled into this build
pub fn create_backend(backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
    match backend_type {
        #[cfg(feature = "onnx")]
        BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new())),
        #[cfg(feature = "tract")]
        BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new())),
        #[allow(unreachable_patterns)]
        other => Err(EfiError::invalid_config(format!(
            "Backend '{}' is not available in this build (enable the '{}' feature)",
            other, other
        ))),
    }
}

/// Read a model file from disk
pub(crate) fn read_model_file(model_path: &Path) -> Result<Vec<u8>> {
    std::fs::read(model_path).map_err(|e| EfiError::file_io_error("read model file", model_path, &e))
}

/// Copy a dynamic-rank output into a 4D array
pub(crate) fn to_array4(shape: &[usize], data: Vec<f32>) -> Result<Array4<f32>> {
    let [n, c, h, w] = shape else {
        return Err(EfiError::inference(format!(
            "Expected 4D output tensor, got {}D",
            shape.len()
        )));
    };
    Array4::from_shape_vec((*n, *c, *h, *w), data)
        .map_err(|e| EfiError::inference(format!("Failed to reshape output tensor: {e}")))
}
