//! Tract backend implementation
//!
//! Pure Rust inference through Tract. Only the CPU execution provider exists;
//! other provider requests are logged and ignored.

use crate::config::ExecutionProvider;
use crate::error::{EfiError, Result};
use crate::inference::{read_model_file, to_array4, InferenceBackend};
use instant::{Duration, Instant};
use ndarray::Array4;
use std::path::Path;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running segmentation models using pure Rust inference
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
}

impl TractBackend {
    /// Create a new uninitialized Tract backend
    #[must_use]
    pub fn new() -> Self {
        Self { model: None }
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(
        &mut self,
        model_path: &Path,
        provider: ExecutionProvider,
    ) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }

        if !matches!(provider, ExecutionProvider::Auto | ExecutionProvider::Cpu) {
            log::warn!("Tract only supports CPU execution, ignoring '{}'", provider);
        }

        let model_load_start = Instant::now();
        let model_data = read_model_file(model_path)?;

        log::info!("🚀 Initializing Tract Backend for {}", model_path.display());

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| EfiError::inference(format!("Failed to load ONNX model: {e}")))?
            .into_optimized()
            .map_err(|e| EfiError::inference(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| EfiError::inference(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "✅ Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| EfiError::inference("Tract model not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("🔮 Running Tract inference on {:?}", input.shape());

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| EfiError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| EfiError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor
            .to_array_view::<f32>()
            .map_err(|e| EfiError::inference(format!("Failed to convert output tensor: {e}")))?;

        let shape = output_data.shape().to_vec();
        let result = to_array4(&shape, output_data.iter().copied().collect())?;

        log::debug!(
            "✅ Tract inference completed in {}ms",
            inference_start.elapsed().as_millis()
        );
        Ok(result)
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tract_backend_creation() {
        let mut backend = TractBackend::new();
        assert!(!backend.is_initialized());
        assert_eq!(backend.name(), "tract");

        let input = Array4::<f32>::zeros((1, 3, 8, 8));
        assert!(backend.infer(&input).is_err());
    }

    #[test]
    fn test_initialize_with_invalid_model() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("broken.onnx");
        std::fs::write(&path, b"not an onnx model").unwrap();

        let mut backend = TractBackend::new();
        assert!(backend.initialize(&path, ExecutionProvider::Cpu).is_err());
        assert!(!backend.is_initialized());
    }
}
