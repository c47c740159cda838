//! Progress reporting service
//!
//! This module separates progress reporting concerns from business logic,
//! allowing different frontends to implement their own progress handling.
//! The segmentation engine offers no intermediate callback, so job progress
//! is reported as coarse milestones with download percentages interleaved.

use instant::Instant;

/// Progress stages of a background removal job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Checking whether the model is cached
    ModelCheck,
    /// Downloading the model into the cache
    ModelDownload,
    /// Input read, segmentation running
    Segmentation,
    /// Processing completed
    Completed,
}

impl ProcessingStage {
    /// Get a human-readable description of the processing stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::ModelCheck => "Checking model cache",
            ProcessingStage::ModelDownload => "Downloading model",
            ProcessingStage::Segmentation => "Removing background",
            ProcessingStage::Completed => "Processing completed",
        }
    }

    /// Milestone percentage reported when the stage begins
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            ProcessingStage::ModelCheck | ProcessingStage::ModelDownload => 0,
            ProcessingStage::Segmentation => 50,
            ProcessingStage::Completed => 100,
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current processing stage
    pub stage: ProcessingStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since the job started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    /// Create a milestone update for `stage`
    #[must_use]
    pub fn new(stage: ProcessingStage, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }

    /// Create a download update carrying the transfer percentage
    #[must_use]
    pub fn download(percent: u8, file_name: &str, start_time: Instant) -> Self {
        Self {
            stage: ProcessingStage::ModelDownload,
            progress: percent.min(100),
            description: format!("Downloading {}", file_name),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        }
    }
}

/// Timings of a finished job
///
/// `total_ms` covers reading the input, segmentation and decoding the
/// result. Model acquisition is tracked separately and not part of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingTimings {
    /// Cache check plus any download
    pub model_acquisition_ms: u64,
    /// Reading the input file
    pub input_read_ms: u64,
    /// Segmentation engine call
    pub segmentation_ms: u64,
    /// Decoding the engine output
    pub decode_ms: u64,
    /// Read + segmentation + decode
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Elapsed seconds rounded to one decimal, as shown to users
    #[must_use]
    pub fn elapsed_seconds_display(&self) -> String {
        format!("{:.1}", self.total_ms as f64 / 1000.0)
    }
}

/// Trait for reporting progress during background removal operations
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report processing completion with final timings
    fn report_completion(&self, timings: ProcessingTimings);

    /// Report an error during processing
    ///
    /// # Arguments
    /// * `stage` - Stage where error occurred
    /// * `error` - Error description
    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
#[derive(Debug, Default)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: ProcessingTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Console progress reporter that logs progress through `log`
#[derive(Debug)]
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `verbose` - Whether to show elapsed times and detailed timings
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        log::info!(
            "✅ Background removed in {}s",
            timings.elapsed_seconds_display()
        );

        if self.verbose {
            log::info!("  📊 Detailed timings:");
            log::info!("    • Model acquisition: {}ms", timings.model_acquisition_ms);
            log::info!("    • Input read: {}ms", timings.input_read_ms);
            log::info!("    • Segmentation: {}ms", timings.segmentation_ms);
            log::info!("    • Decode: {}ms", timings.decode_ms);
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }
}
