//! Single-flight background removal processor
//!
//! At most one job runs at a time. [`BackgroundRemovalProcessor::submit`]
//! either starts a worker task and hands back a [`JobHandle`], or rejects the
//! request synchronously while another job is in flight. The worker ensures
//! the model is cached, reads the input, runs segmentation off the async
//! threads, decodes the result and publishes it in shared state before the
//! busy flag is released and the outcome is delivered over a one-shot
//! channel.

use crate::config::AppConfig;
use crate::download::{DownloadProgress, ModelDownloader};
use crate::error::{EfiError, ErrorKind, Result};
use crate::models::ModelKind;
use crate::segmentation::{SegmentationEngine, SegmentationRequest, U2NetEngine};
use crate::services::export;
use crate::services::io::ImageIOService;
use crate::services::notification::{LogNotifier, Notification, Notifier};
use crate::services::progress::{
    ConsoleProgressReporter, ProcessingStage, ProcessingTimings, ProgressReporter, ProgressUpdate,
};
use crate::tracing_config::spans;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use instant::Instant;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::Instrument;

/// A submitted processing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingJob {
    /// Process-unique job number
    pub id: u64,
    /// Input image path
    pub input: PathBuf,
    /// Selected mode
    pub mode: ModelKind,
    /// Wall-clock submission time
    pub started_at: DateTime<Utc>,
}

/// The most recent successful result
#[derive(Debug, Clone)]
pub struct ResultImage {
    /// Decoded image with alpha
    pub image: DynamicImage,
    /// Default export location derived from the input
    pub output_path: PathBuf,
    /// Input the result was produced from
    pub source: PathBuf,
}

/// Successful job outcome
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: ProcessingJob,
    pub output_path: PathBuf,
    /// Read + segmentation + decode, model acquisition excluded
    pub elapsed: Duration,
    pub timings: ProcessingTimings,
    /// Whether the model had to be downloaded for this job
    pub model_downloaded: bool,
}

impl JobReport {
    /// User-facing completion line with the elapsed time to one decimal
    #[must_use]
    pub fn completion_message(&self) -> String {
        format!(
            "Background removed in {:.1} seconds",
            self.elapsed.as_secs_f64()
        )
    }
}

/// Failure of the last job, readable after the fact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub job_id: u64,
    pub kind: ErrorKind,
    pub message: String,
}

/// Answer to [`BackgroundRemovalProcessor::submit`]
#[derive(Debug)]
pub enum Submission {
    /// A worker was started for the job
    Accepted(JobHandle),
    /// Another job is still running; nothing was started
    Rejected,
}

impl Submission {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// The handle of an accepted submission
    #[must_use]
    pub fn into_handle(self) -> Option<JobHandle> {
        match self {
            Self::Accepted(handle) => Some(handle),
            Self::Rejected => None,
        }
    }
}

/// Receiving end of a running job
#[derive(Debug)]
pub struct JobHandle {
    job: ProcessingJob,
    outcome: oneshot::Receiver<Result<JobReport>>,
}

impl JobHandle {
    #[must_use]
    pub fn job(&self) -> &ProcessingJob {
        &self.job
    }

    /// Wait for the terminal outcome of the job
    ///
    /// # Errors
    /// - The job failed (download, processing, ...)
    /// - The worker stopped without reporting an outcome
    pub async fn wait(self) -> Result<JobReport> {
        self.outcome.await.map_err(|_| {
            EfiError::internal(format!(
                "Worker for job {} terminated without an outcome",
                self.job.id
            ))
        })?
    }
}

#[derive(Debug, Default)]
struct SharedState {
    busy: AtomicBool,
    progress: AtomicU8,
    result: RwLock<Option<Arc<ResultImage>>>,
    last_error: RwLock<Option<JobFailure>>,
}

/// Holds the busy flag; releases it when dropped, including during unwinding
#[derive(Debug)]
struct BusyGuard {
    state: Arc<SharedState>,
}

impl BusyGuard {
    fn try_acquire(state: &Arc<SharedState>) -> Option<Self> {
        state
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                state: Arc::clone(state),
            })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.state.busy.store(false, Ordering::Release);
    }
}

/// Everything a worker needs, detached from the processor
#[derive(Clone)]
struct Worker {
    config: AppConfig,
    downloader: Arc<ModelDownloader>,
    engine: Arc<dyn SegmentationEngine>,
    notifier: Arc<dyn Notifier>,
    reporter: Arc<dyn ProgressReporter>,
    state: Arc<SharedState>,
}

impl Worker {
    fn set_progress(&self, update: ProgressUpdate) {
        self.state.progress.store(update.progress, Ordering::Release);
        self.reporter.report_progress(update);
    }

    async fn run(self, job: ProcessingJob, guard: BusyGuard, outcome: oneshot::Sender<Result<JobReport>>) {
        let mut stage = ProcessingStage::ModelCheck;
        let result = self.pipeline(&job, &mut stage).await;

        match &result {
            Ok(report) => {
                log::info!("{}", report.completion_message());
            },
            Err(e) => {
                log::error!("Job {} failed: {}", job.id, e);
                self.reporter.report_error(stage, &e.to_string());
                if let Ok(mut last_error) = self.state.last_error.write() {
                    *last_error = Some(JobFailure {
                        job_id: job.id,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            },
        }

        drop(guard);
        if outcome.send(result).is_err() {
            log::debug!("Job {} finished after its handle was dropped", job.id);
        }
    }

    async fn pipeline(&self, job: &ProcessingJob, stage: &mut ProcessingStage) -> Result<JobReport> {
        let job_start = Instant::now();
        self.set_progress(ProgressUpdate::new(ProcessingStage::ModelCheck, job_start));

        let downloaded = Arc::new(AtomicBool::new(false));
        let model_path = {
            let worker = self.clone();
            let downloaded = Arc::clone(&downloaded);
            self.downloader
                .ensure_model(job.mode, move |progress: &DownloadProgress| {
                    downloaded.store(true, Ordering::Relaxed);
                    if let Some(percent) = progress.percent() {
                        worker.set_progress(ProgressUpdate::download(
                            percent,
                            &progress.file_name,
                            job_start,
                        ));
                    }
                })
                .await?
        };
        let model_acquisition_ms = job_start.elapsed().as_millis() as u64;
        let input_label = job.input.display().to_string();

        *stage = ProcessingStage::Segmentation;
        let work_start = Instant::now();
        let input = ImageIOService::read_input(&job.input)
            .await
            .map_err(|e| as_processing("read input", &input_label, e))?;
        let input_read_ms = work_start.elapsed().as_millis() as u64;

        self.set_progress(ProgressUpdate::new(ProcessingStage::Segmentation, job_start));

        let request = SegmentationRequest {
            input,
            model: job.mode,
            model_path,
            alpha_matting: self.config.alpha_matting,
        };
        let engine = Arc::clone(&self.engine);
        let segmentation_start = Instant::now();
        let encoded = tokio::task::spawn_blocking(move || engine.remove_background(&request))
            .await
            .map_err(|e| {
                EfiError::processing_stage_error(
                    "segmentation",
                    &format!("segmentation task failed: {}", e),
                    Some(&input_label),
                )
            })?
            .map_err(|e| as_processing("segmentation", &input_label, e))?;
        let segmentation_ms = segmentation_start.elapsed().as_millis() as u64;

        let decode_start = Instant::now();
        let image = ImageIOService::load_from_bytes(&encoded)?;
        let decode_ms = decode_start.elapsed().as_millis() as u64;
        let elapsed = work_start.elapsed();

        let output_path = ImageIOService::default_output_path(&job.input);
        let result = Arc::new(ResultImage {
            image,
            output_path: output_path.clone(),
            source: job.input.clone(),
        });
        *self
            .state
            .result
            .write()
            .map_err(|_| EfiError::internal("result lock poisoned, cannot publish result"))? =
            Some(result);

        let timings = ProcessingTimings {
            model_acquisition_ms,
            input_read_ms,
            segmentation_ms,
            decode_ms,
            total_ms: elapsed.as_millis() as u64,
        };

        *stage = ProcessingStage::Completed;
        self.set_progress(ProgressUpdate::new(ProcessingStage::Completed, job_start));
        self.reporter.report_completion(timings);

        if self.config.notifications {
            if let Err(e) = self.notifier.notify(&Notification::background_removed()) {
                log::warn!("Failed to deliver notification: {}", e);
            }
        }

        Ok(JobReport {
            job: job.clone(),
            output_path,
            elapsed,
            timings,
            model_downloaded: downloaded.load(Ordering::Relaxed),
        })
    }
}

/// Wrap non-processing failures of the read/segment/decode steps
fn as_processing(stage: &str, input: &str, error: EfiError) -> EfiError {
    match error {
        EfiError::Processing(_) => error,
        other => EfiError::processing_stage_error(stage, &other.to_string(), Some(input)),
    }
}

/// Single-flight processor for background removal jobs
pub struct BackgroundRemovalProcessor {
    worker: Worker,
    runtime: Handle,
    next_job_id: AtomicU64,
}

impl std::fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("busy", &self.is_busy())
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Create a processor with log notifications and console progress
    ///
    /// Workers are spawned on the runtime this is called from.
    ///
    /// # Errors
    /// - Called outside a tokio runtime
    pub fn new(
        config: AppConfig,
        downloader: ModelDownloader,
        engine: Arc<dyn SegmentationEngine>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            EfiError::internal(format!("Processor requires a tokio runtime: {}", e))
        })?;
        Ok(Self {
            worker: Worker {
                config,
                downloader: Arc::new(downloader),
                engine,
                notifier: Arc::new(LogNotifier),
                reporter: Arc::new(ConsoleProgressReporter::new(false)),
                state: Arc::new(SharedState::default()),
            },
            runtime,
            next_job_id: AtomicU64::new(1),
        })
    }

    /// Create a processor with the U²-Net engine and downloader described by `config`
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Cache directory cannot be created
    /// - Called outside a tokio runtime
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let downloader = ModelDownloader::from_config(&config)?;
        let engine = Arc::new(U2NetEngine::new(config.backend, config.execution_provider));
        Self::new(config, downloader, engine)
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.worker.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.worker.reporter = reporter;
        self
    }

    /// Spawn workers on a different runtime
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = runtime;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.worker.config
    }

    #[must_use]
    pub fn downloader(&self) -> &ModelDownloader {
        &self.worker.downloader
    }

    /// Start processing `input` unless a job is already running
    ///
    /// Never blocks: the busy check is a single atomic compare-exchange and
    /// all work happens on the spawned worker.
    pub fn submit<P: AsRef<Path>>(&self, input: P, mode: ModelKind) -> Submission {
        let Some(guard) = BusyGuard::try_acquire(&self.worker.state) else {
            log::warn!("A background removal is already running, wait for it to finish");
            return Submission::Rejected;
        };

        let job = ProcessingJob {
            id: self.next_job_id.fetch_add(1, Ordering::Relaxed),
            input: input.as_ref().to_path_buf(),
            mode,
            started_at: Utc::now(),
        };
        log::info!("Processing {} ({} mode)", job.input.display(), mode);

        self.worker.state.progress.store(0, Ordering::Release);
        if let Ok(mut last_error) = self.worker.state.last_error.write() {
            *last_error = None;
        }

        let (sender, receiver) = oneshot::channel();
        let span = spans::job(job.id, &job.input, mode.key());
        self.runtime.spawn(
            self.worker
                .clone()
                .run(job.clone(), guard, sender)
                .instrument(span),
        );

        Submission::Accepted(JobHandle {
            job,
            outcome: receiver,
        })
    }

    /// Whether a job is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.worker.state.busy.load(Ordering::Acquire)
    }

    /// Last reported progress percentage
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.worker.state.progress.load(Ordering::Acquire)
    }

    /// The most recent successful result
    #[must_use]
    pub fn current_result(&self) -> Option<Arc<ResultImage>> {
        self.worker
            .state
            .result
            .read()
            .ok()
            .and_then(|result| result.clone())
    }

    /// Failure of the most recent job, cleared when a new job starts
    #[must_use]
    pub fn last_error(&self) -> Option<JobFailure> {
        self.worker
            .state
            .last_error
            .read()
            .ok()
            .and_then(|failure| failure.clone())
    }

    /// Write the current result as PNG to its default path
    ///
    /// # Errors
    /// - [`EfiError::Save`] when there is no result or writing fails
    pub fn save_default(&self) -> Result<PathBuf> {
        let result = self.require_result()?;
        export::save_default(&result.image, &result.output_path)?;
        Ok(result.output_path.clone())
    }

    /// Write the current result to `path`, flattening onto white for JPEG
    ///
    /// # Errors
    /// - [`EfiError::Save`] when there is no result, the extension is not
    ///   supported or writing fails
    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let result = self.require_result()?;
        export::save_as(&result.image, path, self.worker.config.jpeg_quality)
    }

    fn require_result(&self) -> Result<Arc<ResultImage>> {
        self.current_result()
            .ok_or_else(|| EfiError::save("there is no processed image to save"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ModelCache;
    use crate::config::{CacheValidation, DownloadConfig};
    use crate::models::{ModelArtifact, ModelRegistry};
    use crate::services::notification::RecordingNotifier;
    use std::io::Cursor;
    use tempfile::TempDir;

    struct EchoEngine;

    impl SegmentationEngine for EchoEngine {
        fn remove_background(&self, request: &SegmentationRequest) -> Result<Vec<u8>> {
            let image = image::load_from_memory(&request.input)?.to_rgba8();
            let mut out = Vec::new();
            image.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)?;
            Ok(out)
        }
    }

    struct PanickingEngine;

    impl SegmentationEngine for PanickingEngine {
        fn remove_background(&self, _request: &SegmentationRequest) -> Result<Vec<u8>> {
            panic!("engine crashed");
        }
    }

    fn cached_downloader(temp: &TempDir) -> ModelDownloader {
        let cache = ModelCache::with_root(temp.path()).unwrap();
        let registry = ModelRegistry::default().with_artifact(
            ModelKind::Objects,
            ModelArtifact::new("u2net.onnx", "http://127.0.0.1:1/u2net.onnx", 50_000_000),
        );
        std::fs::write(cache.cache_dir().join("u2net.onnx"), b"stub").unwrap();
        ModelDownloader::with_parts(cache, registry, CacheValidation::TrustExisting, DownloadConfig::default())
            .unwrap()
    }

    fn write_input(temp: &TempDir) -> PathBuf {
        let path = temp.path().join("photo.png");
        image::RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_busy_guard_is_exclusive() {
        let state = Arc::new(SharedState::default());
        let guard = BusyGuard::try_acquire(&state).unwrap();
        assert!(state.busy.load(Ordering::Acquire));
        assert!(BusyGuard::try_acquire(&state).is_none());

        drop(guard);
        assert!(!state.busy.load(Ordering::Acquire));
        assert!(BusyGuard::try_acquire(&state).is_some());
    }

    #[test]
    fn test_new_requires_runtime() {
        let temp = TempDir::new().unwrap();
        let result = BackgroundRemovalProcessor::new(
            AppConfig::default(),
            cached_downloader(&temp),
            Arc::new(EchoEngine),
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_successful_job_publishes_result() {
        let temp = TempDir::new().unwrap();
        let input = write_input(&temp);
        let notifier = Arc::new(RecordingNotifier::new());
        let processor = BackgroundRemovalProcessor::new(
            AppConfig::default(),
            cached_downloader(&temp),
            Arc::new(EchoEngine),
        )
        .unwrap()
        .with_notifier(notifier.clone());

        let handle = processor.submit(&input, ModelKind::Objects).into_handle().unwrap();
        assert_eq!(handle.job().id, 1);
        let report = handle.wait().await.unwrap();

        assert!(!processor.is_busy());
        assert_eq!(processor.progress(), 100);
        assert!(!report.model_downloaded);
        assert_eq!(report.output_path, temp.path().join("photo_sin_fondo.png"));
        assert!(report.completion_message().starts_with("Background removed in "));

        let result = processor.current_result().unwrap();
        assert_eq!(result.image.width(), 4);
        assert_eq!(notifier.sent(), vec![Notification::background_removed()]);
        assert!(processor.last_error().is_none());
    }

    #[tokio::test]
    async fn test_engine_panic_releases_busy_flag() {
        let temp = TempDir::new().unwrap();
        let input = write_input(&temp);
        let processor = BackgroundRemovalProcessor::new(
            AppConfig::default(),
            cached_downloader(&temp),
            Arc::new(PanickingEngine),
        )
        .unwrap();

        let handle = processor.submit(&input, ModelKind::Objects).into_handle().unwrap();
        let err = handle.wait().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Processing);
        assert!(!processor.is_busy());
        assert!(processor.current_result().is_none());
        assert_eq!(processor.last_error().unwrap().kind, ErrorKind::Processing);
    }

    #[tokio::test]
    async fn test_unpublishable_result_fails_job() {
        let temp = TempDir::new().unwrap();
        let input = write_input(&temp);
        let notifier = Arc::new(RecordingNotifier::new());
        let processor = BackgroundRemovalProcessor::new(
            AppConfig::default(),
            cached_downloader(&temp),
            Arc::new(EchoEngine),
        )
        .unwrap()
        .with_notifier(notifier.clone());

        let state = Arc::clone(&processor.worker.state);
        let poisoner = std::thread::spawn(move || {
            let _slot = state.result.write().unwrap();
            panic!("poison result slot");
        });
        assert!(poisoner.join().is_err());

        let handle = processor.submit(&input, ModelKind::Objects).into_handle().unwrap();
        let err = handle.wait().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!processor.is_busy());
        assert!(processor.current_result().is_none());
        assert!(notifier.sent().is_empty());
        assert_eq!(processor.last_error().unwrap().kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_save_without_result() {
        let temp = TempDir::new().unwrap();
        let processor = BackgroundRemovalProcessor::new(
            AppConfig::default(),
            cached_downloader(&temp),
            Arc::new(EchoEngine),
        )
        .unwrap();

        assert_eq!(processor.save_default().unwrap_err().kind(), ErrorKind::Save);
        assert_eq!(
            processor.save_as(temp.path().join("x.png")).unwrap_err().kind(),
            ErrorKind::Save
        );
    }
}
