//! Segmentation engine boundary and the U²-Net implementation
//!
//! The processor only depends on [`SegmentationEngine`]: encoded image bytes,
//! a model and matting parameters go in, encoded RGBA image bytes come out.

use crate::config::{AlphaMattingConfig, BackendType, ExecutionProvider};
use crate::error::{EfiError, Result};
use crate::inference::{create_backend, InferenceBackend};
use crate::models::ModelKind;
use crate::tracing_config::{events, spans};
use crate::utils::matting;
use crate::utils::preprocessing::{ImagePreprocessor, PreprocessingConfig};
use image::ImageFormat;
use instant::Instant;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Mutex;

/// Everything the engine needs for one image
#[derive(Debug, Clone)]
pub struct SegmentationRequest {
    /// Encoded input image
    pub input: Vec<u8>,
    /// Selected mode
    pub model: ModelKind,
    /// Cached model file for `model`
    pub model_path: PathBuf,
    /// Matting parameters
    pub alpha_matting: AlphaMattingConfig,
}

/// Background removal capability
pub trait SegmentationEngine: Send + Sync {
    /// Remove the background and return the encoded result with alpha
    ///
    /// # Errors
    /// - Input cannot be decoded
    /// - Model cannot be loaded or inference fails
    /// - Result cannot be encoded
    fn remove_background(&self, request: &SegmentationRequest) -> Result<Vec<u8>>;
}

/// U²-Net segmentation running on an [`InferenceBackend`]
///
/// One backend session is created per model file and kept for the lifetime
/// of the engine.
pub struct U2NetEngine {
    backend_type: BackendType,
    execution_provider: ExecutionProvider,
    preprocessing: PreprocessingConfig,
    sessions: Mutex<HashMap<PathBuf, Box<dyn InferenceBackend>>>,
}

impl std::fmt::Debug for U2NetEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("U2NetEngine")
            .field("backend_type", &self.backend_type)
            .field("execution_provider", &self.execution_provider)
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl U2NetEngine {
    #[must_use]
    pub fn new(backend_type: BackendType, execution_provider: ExecutionProvider) -> Self {
        Self {
            backend_type,
            execution_provider,
            preprocessing: PreprocessingConfig::u2net(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Number of loaded model sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn run_model(&self, request: &SegmentationRequest, tensor: &ndarray::Array4<f32>) -> Result<ndarray::Array4<f32>> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| EfiError::internal("Session cache lock poisoned"))?;

        let key = request.model_path.clone();
        if !sessions.contains_key(&key) {
            events::cache_miss(&key.display().to_string(), "session");
            let mut backend = create_backend(self.backend_type)?;
            if let Some(load_time) = backend.initialize(&request.model_path, self.execution_provider)? {
                events::performance_metric("model_load", load_time.as_millis() as u64, None);
            }
            sessions.insert(key.clone(), backend);
        } else {
            events::cache_hit(&key.display().to_string(), "session");
        }

        let backend = sessions
            .get_mut(&key)
            .ok_or_else(|| EfiError::internal("Session missing after insertion"))?;
        backend.infer(tensor)
    }
}

impl SegmentationEngine for U2NetEngine {
    fn remove_background(&self, request: &SegmentationRequest) -> Result<Vec<u8>> {
        let start = Instant::now();

        let image = image::load_from_memory(&request.input).map_err(|e| {
            EfiError::processing_stage_error(
                "decode input",
                &e.to_string(),
                Some(&format!("{} bytes", request.input.len())),
            )
        })?;
        let (width, height) = (image.width(), image.height());

        let _span = spans::segmentation(request.model.engine_model_name(), (width, height)).entered();

        let tensor = ImagePreprocessor::preprocess(&image, &self.preprocessing)?;
        let output = self.run_model(request, &tensor)?;
        let mask = ImagePreprocessor::mask_from_output(&output, width, height)?;
        let cutout = matting::cutout(&image.to_rgba8(), &mask, &request.alpha_matting)?;

        let mut encoded = Vec::new();
        cutout
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .map_err(|e| EfiError::processing_stage_error("encode result", &e.to_string(), None))?;

        events::performance_metric(
            "segmentation",
            start.elapsed().as_millis() as u64,
            Some(&format!("{}x{}", width, height)),
        );
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_invalid_input_is_processing_error() {
        let engine = U2NetEngine::new(BackendType::default(), ExecutionProvider::Cpu);
        let request = SegmentationRequest {
            input: b"definitely not an image".to_vec(),
            model: ModelKind::Objects,
            model_path: PathBuf::from("/nonexistent/u2net.onnx"),
            alpha_matting: AlphaMattingConfig::default(),
        };

        let err = engine.remove_background(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Processing);
        assert_eq!(engine.session_count(), 0);
    }

    #[test]
    fn test_missing_model_does_not_cache_session() {
        let mut input = Vec::new();
        image::RgbImage::new(4, 4)
            .write_to(&mut Cursor::new(&mut input), ImageFormat::Png)
            .unwrap();

        let engine = U2NetEngine::new(BackendType::default(), ExecutionProvider::Cpu);
        let request = SegmentationRequest {
            input,
            model: ModelKind::Objects,
            model_path: PathBuf::from("/nonexistent/u2net.onnx"),
            alpha_matting: AlphaMattingConfig::default(),
        };

        assert!(engine.remove_background(&request).is_err());
        assert_eq!(engine.session_count(), 0);
    }
}
