//! Error types for model acquisition, processing and export

use thiserror::Error;

/// Result type alias for library operations
pub type Result<T> = std::result::Result<T, EfiError>;

/// Coarse error category, copyable so the control side can branch on it
/// without holding on to the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Image,
    InvalidConfig,
    ModelUnavailable,
    Download,
    Processing,
    Inference,
    Save,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Io => "io",
            Self::Image => "image",
            Self::InvalidConfig => "invalid-config",
            Self::ModelUnavailable => "model-unavailable",
            Self::Download => "download",
            Self::Processing => "processing",
            Self::Inference => "inference",
            Self::Save => "save",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Error types for background removal operations
#[derive(Error, Debug)]
pub enum EfiError {
    /// Input/output errors (cache directory creation, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested model has no published artifact yet
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Network, HTTP status or validation failure while fetching a model
    #[error("model download failed: {0}")]
    Download(String),

    /// Failure while reading, segmenting or decoding an input image
    #[error("Processing error: {0}")]
    Processing(String),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Failure while encoding or writing an exported result
    #[error("Save error: {0}")]
    Save(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EfiError {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model-unavailable error
    pub fn model_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    /// Create a new download error
    pub fn download<S: Into<String>>(cause: S) -> Self {
        Self::Download(cause.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new save error
    pub fn save<S: Into<String>>(msg: S) -> Self {
        Self::Save(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {})", info),
            None => String::new(),
        };

        Self::Processing(format!(
            "Processing failed at stage '{}'{}: {}",
            stage, input_context, details
        ))
    }

    /// Re-tag any error raised while fetching a model as a download error.
    ///
    /// Errors that already are download errors pass through unchanged so the
    /// message is not prefixed twice.
    #[must_use]
    pub fn into_download(self) -> Self {
        match self {
            Self::Download(_) => self,
            other => Self::Download(other.to_string()),
        }
    }

    /// Category tag of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::Image(_) => ErrorKind::Image,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            Self::Download(_) => ErrorKind::Download,
            Self::Processing(_) => ErrorKind::Processing,
            Self::Inference(_) => ErrorKind::Inference,
            Self::Save(_) => ErrorKind::Save,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
