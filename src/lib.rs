#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # EFI Background Removal
//!
//! Background removal built around two pieces:
//!
//! - **Model cache**: resolves a platform cache directory, checks for the
//!   U²-Net model and downloads it on demand with progress reporting and
//!   size/checksum validation.
//! - **Single-flight processor**: runs at most one image job at a time on a
//!   worker task, publishes progress and the result in shared state and
//!   delivers the outcome through a [`JobHandle`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use efi_bgremove::{AppConfig, BackgroundRemovalProcessor, ModelKind, Submission};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let processor = BackgroundRemovalProcessor::from_config(AppConfig::default())?;
//!
//! match processor.submit("photo.jpg", ModelKind::Objects) {
//!     Submission::Accepted(handle) => {
//!         let report = handle.wait().await?;
//!         println!("{}", report.completion_message());
//!         processor.save_default()?;
//!         processor.save_as("photo_white.jpg")?;
//!     },
//!     Submission::Rejected => println!("Busy, try again later"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract`: Pure Rust backend
//! - `cli` (default): command-line front end
//! - `tracing-json`: JSON log output for the CLI
//! - `webp-support`: WebP input and output

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod segmentation;
pub mod services;
pub mod tracing_config;
pub mod utils;

pub use backends::*;
pub use cache::{format_size, resolve_cache_dir, CachedModelInfo, ModelCache, CACHE_DIR_ENV};
pub use config::{
    AlphaMattingConfig, AppConfig, AppConfigBuilder, BackendType, CacheValidation,
    DownloadConfig, ExecutionProvider,
};
pub use download::{verify_file_integrity, DownloadProgress, ModelDownloader};
pub use error::{EfiError, ErrorKind, Result};
pub use inference::{create_backend, InferenceBackend};
pub use models::{ModelArtifact, ModelKind, ModelRegistry};
pub use processor::{
    BackgroundRemovalProcessor, JobFailure, JobHandle, JobReport, ProcessingJob, ResultImage,
    Submission,
};
pub use segmentation::{SegmentationEngine, SegmentationRequest, U2NetEngine};
pub use services::{
    ConsoleProgressReporter, ImageIOService, InputAdvisory, LogNotifier, NoOpNotifier,
    NoOpProgressReporter, Notification, Notifier, ProcessingStage, ProcessingTimings,
    ProgressReporter, ProgressUpdate,
};
pub use tracing_config::{events, spans, TracingConfig, TracingFormat};

#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
