//! Shared fixtures for integration tests
//!
//! - A minimal HTTP server on a local port that counts requests
//! - Temporary caches and input images
//! - Mock segmentation engines and a recording progress reporter

#![allow(dead_code)]

use efi_bgremove::{
    CacheValidation, DownloadConfig, ModelArtifact, ModelCache, ModelDownloader, ModelKind,
    ModelRegistry, ProcessingStage, ProcessingTimings, ProgressReporter, ProgressUpdate, Result,
    SegmentationEngine, SegmentationRequest,
};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const MODEL_FILE: &str = "u2net.onnx";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// How the test server answers every request
#[derive(Debug, Clone)]
pub struct ServerBehavior {
    pub status: u16,
    pub body: Vec<u8>,
    /// Send a `Content-Length` header
    pub content_length: bool,
    /// Stop after this many body bytes while announcing the full length
    pub truncate_at: Option<usize>,
}

impl ServerBehavior {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            body,
            content_length: true,
            truncate_at: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: b"not found".to_vec(),
            content_length: true,
            truncate_at: None,
        }
    }

    pub fn without_content_length(mut self) -> Self {
        self.content_length = false;
        self
    }

    pub fn truncated(mut self, at: usize) -> Self {
        self.truncate_at = Some(at);
        self
    }
}

/// Local HTTP server serving one model file
pub struct TestServer {
    pub url: String,
    requests: Arc<AtomicUsize>,
    behavior: Arc<Mutex<ServerBehavior>>,
}

impl TestServer {
    pub async fn start(behavior: ServerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let behavior = Arc::new(Mutex::new(behavior));

        let counter = Arc::clone(&requests);
        let shared = Arc::clone(&behavior);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let behavior = shared.lock().unwrap().clone();
                tokio::spawn(async move {
                    read_request_head(&mut socket).await;
                    let _ = write_response(&mut socket, &behavior).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            url: format!("http://{}/{}", addr, MODEL_FILE),
            requests,
            behavior,
        }
    }

    /// Server that accepts connections and never answers
    pub async fn silent() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&requests);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        Self {
            url: format!("http://{}/{}", addr, MODEL_FILE),
            requests,
            behavior: Arc::new(Mutex::new(ServerBehavior::status(200))),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn set_behavior(&self, behavior: ServerBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }
}

async fn read_request_head(socket: &mut tokio::net::TcpStream) {
    let mut head = Vec::new();
    let mut buffer = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buffer[..n]),
        }
    }
}

async fn write_response(
    socket: &mut tokio::net::TcpStream,
    behavior: &ServerBehavior,
) -> std::io::Result<()> {
    let mut head = format!("HTTP/1.1 {} TEST\r\nConnection: close\r\n", behavior.status);
    if behavior.content_length {
        head.push_str(&format!("Content-Length: {}\r\n", behavior.body.len()));
    }
    head.push_str("\r\n");
    socket.write_all(head.as_bytes()).await?;

    let end = behavior
        .truncate_at
        .unwrap_or(behavior.body.len())
        .min(behavior.body.len());
    socket.write_all(&behavior.body[..end]).await?;
    socket.flush().await
}

/// Deterministic model payload of `len` bytes
pub fn model_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Registry whose objects model is served from `url`
pub fn registry_for(url: &str, min_size_bytes: u64) -> ModelRegistry {
    ModelRegistry::default().with_artifact(
        ModelKind::Objects,
        ModelArtifact::new(MODEL_FILE, url, min_size_bytes),
    )
}

pub fn downloader(cache_root: &Path, url: &str, min_size_bytes: u64) -> ModelDownloader {
    downloader_with(cache_root, url, min_size_bytes, CacheValidation::TrustExisting)
}

pub fn downloader_with(
    cache_root: &Path,
    url: &str,
    min_size_bytes: u64,
    validation: CacheValidation,
) -> ModelDownloader {
    let cache = ModelCache::with_root(cache_root).unwrap();
    ModelDownloader::with_parts(
        cache,
        registry_for(url, min_size_bytes),
        validation,
        DownloadConfig::default(),
    )
    .unwrap()
}

/// Downloader for a custom objects artifact and download settings
pub fn downloader_for(
    cache_root: &Path,
    artifact: ModelArtifact,
    download: DownloadConfig,
) -> ModelDownloader {
    let cache = ModelCache::with_root(cache_root).unwrap();
    let registry = ModelRegistry::default().with_artifact(ModelKind::Objects, artifact);
    ModelDownloader::with_parts(cache, registry, CacheValidation::TrustExisting, download).unwrap()
}

/// Downloader whose model file already exists; any network use would fail
pub fn cached_downloader(cache_root: &Path) -> ModelDownloader {
    let downloader = downloader(cache_root, "http://127.0.0.1:1/u2net.onnx", 16);
    std::fs::write(downloader.cache().cache_dir().join(MODEL_FILE), model_bytes(64)).unwrap();
    downloader
}

/// Write a small opaque RGB image and return its path
pub fn write_input(dir: &TempDir, name: &str) -> PathBuf {
    write_input_sized(dir, name, 8, 6)
}

pub fn write_input_sized(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.path().join(name);
    image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, 90])
    })
    .save(&path)
    .unwrap();
    path
}

fn encode_png(image: &image::RgbaImage) -> Vec<u8> {
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

/// Engine that keeps the left half opaque and makes the right half transparent
pub struct HalfMaskEngine;

impl SegmentationEngine for HalfMaskEngine {
    fn remove_background(&self, request: &SegmentationRequest) -> Result<Vec<u8>> {
        let mut image = image::load_from_memory(&request.input)?.to_rgba8();
        let half = image.width() / 2;
        for (x, _, pixel) in image.enumerate_pixels_mut() {
            pixel.0[3] = if x < half { 255 } else { 0 };
        }
        Ok(encode_png(&image))
    }
}

/// Engine that fails every request
pub struct FailingEngine;

impl SegmentationEngine for FailingEngine {
    fn remove_background(&self, _request: &SegmentationRequest) -> Result<Vec<u8>> {
        Err(efi_bgremove::EfiError::inference("model rejected the input"))
    }
}

/// Engine that blocks until the test releases it
pub struct GatedEngine {
    gate: Mutex<Receiver<()>>,
}

impl GatedEngine {
    pub fn new() -> (Self, SyncSender<()>) {
        let (sender, receiver) = sync_channel(1);
        (
            Self {
                gate: Mutex::new(receiver),
            },
            sender,
        )
    }
}

impl SegmentationEngine for GatedEngine {
    fn remove_background(&self, request: &SegmentationRequest) -> Result<Vec<u8>> {
        let _ = self.gate.lock().unwrap().recv();
        HalfMaskEngine.remove_background(request)
    }
}

/// Progress reporter recording everything it receives
#[derive(Default)]
pub struct RecordingReporter {
    updates: Mutex<Vec<ProgressUpdate>>,
    completions: Mutex<Vec<ProcessingTimings>>,
    errors: Mutex<Vec<(ProcessingStage, String)>>,
}

impl RecordingReporter {
    pub fn progress_values(&self) -> Vec<u8> {
        self.updates.lock().unwrap().iter().map(|u| u.progress).collect()
    }

    pub fn stages(&self) -> Vec<ProcessingStage> {
        self.updates.lock().unwrap().iter().map(|u| u.stage).collect()
    }

    pub fn completion_count(&self) -> usize {
        self.completions.lock().unwrap().len()
    }

    pub fn errors(&self) -> Vec<(ProcessingStage, String)> {
        self.errors.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.updates.lock().unwrap().push(update);
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        self.completions.lock().unwrap().push(timings);
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        self.errors.lock().unwrap().push((stage, error.to_string()));
    }
}
