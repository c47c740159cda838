//! ONNX Runtime backend
//!
//! Runs the segmentation model through ONNX Runtime with CPU, CUDA or
//! `CoreML` execution providers.

use crate::config::ExecutionProvider;
use crate::error::{EfiError, Result};
use crate::inference::{read_model_file, to_array4, InferenceBackend};
use instant::{Duration, Instant};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;
use std::path::Path;

/// ONNX Runtime backend for running segmentation models
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
}

impl OnnxBackend {
    /// Create a new uninitialized ONNX backend
    #[must_use]
    pub fn new() -> Self {
        Self { session: None }
    }

    /// List execution providers with availability status and descriptions
    pub fn list_providers() -> Vec<(String, bool, String)> {
        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    fn configure_providers(
        builder: SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<SessionBuilder> {
        let cuda = CUDAExecutionProvider::default();
        let coreml = CoreMLExecutionProvider::default();
        let cuda_available = OrtExecutionProvider::is_available(&cuda).unwrap_or(false);
        let coreml_available = OrtExecutionProvider::is_available(&coreml).unwrap_or(false);

        let providers = match provider {
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();
                if cuda_available {
                    log::info!("🚀 CUDA execution provider is available and will be used");
                    providers.push(cuda.build());
                }
                if coreml_available {
                    log::info!("🍎 CoreML execution provider is available and will be used");
                    providers.push(coreml.with_subgraphs(true).build());
                }
                if providers.is_empty() {
                    log::info!("No hardware acceleration available, using CPU");
                }
                providers
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Vec::new()
            },
            ExecutionProvider::Cuda if cuda_available => {
                log::info!("Using CUDA execution provider");
                vec![cuda.build()]
            },
            ExecutionProvider::CoreMl if coreml_available => {
                log::info!("🍎 Using CoreML execution provider (explicitly requested)");
                vec![coreml.with_subgraphs(true).build()]
            },
            requested => {
                log::warn!(
                    "{} execution provider requested but not available, falling back to CPU",
                    requested
                );
                Vec::new()
            },
        };

        if providers.is_empty() {
            return Ok(builder);
        }
        builder
            .with_execution_providers(providers)
            .map_err(|e| EfiError::inference(format!("Failed to set execution providers: {e}")))
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(
        &mut self,
        model_path: &Path,
        provider: ExecutionProvider,
    ) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }

        let model_load_start = Instant::now();
        let model_data = read_model_file(model_path)?;

        let builder = Session::builder()
            .map_err(|e| EfiError::inference(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EfiError::inference(format!("Failed to set optimization level: {e}")))?;

        let session = Self::configure_providers(builder, provider)?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                EfiError::inference(format!(
                    "Failed to create session from '{}': {e}",
                    model_path.display()
                ))
            })?;

        self.session = Some(session);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "📊 Model loading complete: {:.0}ms ({})",
            model_load_time.as_secs_f64() * 1000.0,
            model_path.display()
        );
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| EfiError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("🚀 Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone())
            .map_err(|e| EfiError::inference(format!("Failed to convert input tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| EfiError::inference(format!("ONNX inference failed: {e}")))?;

        // The first output is the fused saliency map
        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| EfiError::inference("No output tensors found"))?
            .to_string();
        let output_tensor = outputs
            .get(first_key.as_str())
            .ok_or_else(|| EfiError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| EfiError::inference(format!("Failed to extract output tensor: {e}")))?;

        let shape = output_tensor.shape().to_vec();
        let data = output_tensor.iter().copied().collect();
        let result = to_array4(&shape, data)?;

        log::debug!(
            "📊 Inference complete: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(result)
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}
