//! Configuration types for model acquisition and background removal

use crate::error::{EfiError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Inputs strictly larger than this ask for confirmation (10 MiB)
pub const DEFAULT_LARGE_INPUT_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = EfiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(EfiError::invalid_config(format!(
                "Unknown execution provider '{}'. Expected auto, cpu, cuda or coreml",
                other
            ))),
        }
    }
}

/// Inference backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(feature = "onnx") || !cfg!(feature = "tract") {
            Self::Onnx
        } else {
            Self::Tract
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = EfiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(EfiError::invalid_config(format!(
                "Unknown backend '{}'. Expected onnx or tract",
                other
            ))),
        }
    }
}

/// How much an existing cache file is trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CacheValidation {
    /// Any existing file counts as present, even a truncated one
    #[default]
    TrustExisting,
    /// Existing files must still meet the artifact's minimum size
    Strict,
}

/// Alpha matting parameters handed to the segmentation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlphaMattingConfig {
    /// Refine edges with a trimap; when off the soft mask is used directly
    pub enabled: bool,
    /// Mask values above this are definite foreground
    pub foreground_threshold: u8,
    /// Mask values below this are definite background
    pub background_threshold: u8,
    /// Side of the square structuring element used to erode both regions
    pub erode_size: u32,
}

impl Default for AlphaMattingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            foreground_threshold: 240,
            background_threshold: 10,
            erode_size: 10,
        }
    }
}

/// Network settings for model downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub connect_timeout_secs: u64,
    /// Bounds the wait for response headers and every chunk read, not the
    /// whole transfer
    pub read_timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 60,
            read_timeout_secs: 60,
        }
    }
}

impl DownloadConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Override for the platform cache root
    pub cache_dir: Option<PathBuf>,
    /// Inference backend
    pub backend: BackendType,
    /// Execution provider for the ONNX backend
    pub execution_provider: ExecutionProvider,
    /// Trust level for existing cache files
    pub cache_validation: CacheValidation,
    /// Matting parameters passed to the engine
    pub alpha_matting: AlphaMattingConfig,
    /// Size above which the front end asks before submitting
    pub large_input_threshold_bytes: u64,
    /// Download timeouts
    pub download: DownloadConfig,
    /// JPEG quality used when exporting onto a white canvas (1-100)
    pub jpeg_quality: u8,
    /// Emit completion notifications
    pub notifications: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::Auto,
            cache_validation: CacheValidation::TrustExisting,
            alpha_matting: AlphaMattingConfig::default(),
            large_input_threshold_bytes: DEFAULT_LARGE_INPUT_THRESHOLD,
            download: DownloadConfig::default(),
            jpeg_quality: 95,
            notifications: true,
        }
    }
}

impl AppConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::new()
    }

    /// Load configuration from a JSON file; missing fields take their defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - Invalid JSON
    /// - Values fail validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EfiError::file_io_error("read configuration file", path, &e))?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            EfiError::invalid_config(format!("Failed to parse '{}': {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    /// - JPEG quality outside 1-100
    /// - Background threshold not below foreground threshold
    /// - Zero download timeouts
    pub fn validate(&self) -> Result<()> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(EfiError::invalid_config(format!(
                "JPEG quality {} out of range (valid range: 1-100)",
                self.jpeg_quality
            )));
        }

        let matting = &self.alpha_matting;
        if matting.background_threshold >= matting.foreground_threshold {
            return Err(EfiError::invalid_config(format!(
                "Background threshold {} must be below foreground threshold {}",
                matting.background_threshold, matting.foreground_threshold
            )));
        }

        if self.download.connect_timeout_secs == 0 || self.download.read_timeout_secs == 0 {
            return Err(EfiError::invalid_config(
                "Download timeouts must be at least one second",
            ));
        }

        Ok(())
    }
}

/// Builder for `AppConfig`
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.backend = backend;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn cache_validation(mut self, validation: CacheValidation) -> Self {
        self.config.cache_validation = validation;
        self
    }

    #[must_use]
    pub fn alpha_matting(mut self, matting: AlphaMattingConfig) -> Self {
        self.config.alpha_matting = matting;
        self
    }

    #[must_use]
    pub fn large_input_threshold(mut self, bytes: u64) -> Self {
        self.config.large_input_threshold_bytes = bytes;
        self
    }

    #[must_use]
    pub fn download(mut self, download: DownloadConfig) -> Self {
        self.config.download = download;
        self
    }

    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    #[must_use]
    pub fn notifications(mut self, enabled: bool) -> Self {
        self.config.notifications = enabled;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Configuration validation failures
    pub fn build(self) -> Result<AppConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
