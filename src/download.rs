//! Model downloading with progress reporting and integrity validation
//!
//! Downloads stream into `<file>.part` inside the cache directory and are only
//! renamed to their final name once the transfer finished and the file passed
//! validation. Interrupted or undersized transfers leave the `.part` file
//! behind, so the model is never considered present and the next
//! [`ModelDownloader::ensure_model`] call starts a fresh download.

use crate::cache::ModelCache;
use crate::config::{AppConfig, CacheValidation, DownloadConfig};
use crate::error::{EfiError, Result};
use crate::models::{ModelArtifact, ModelKind, ModelRegistry};
use crate::tracing_config::{events, spans};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::Instrument;

const CHUNK_SIZE: usize = 8192;

/// Download progress information
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// File being downloaded
    pub file_name: String,
    /// Bytes downloaded
    pub downloaded: u64,
    /// Total file size (if the server sent `Content-Length`)
    pub total: Option<u64>,
    /// Download completed
    pub completed: bool,
}

impl DownloadProgress {
    /// Whole-number percentage, `None` when the total size is unknown
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some(((self.downloaded.min(total) * 100) / total) as u8),
        }
    }
}

/// Model downloader backed by a [`ModelCache`]
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
    registry: ModelRegistry,
    validation: CacheValidation,
    read_timeout: Duration,
}

impl ModelDownloader {
    /// Create a downloader with default settings in the platform cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - Failed to initialize model cache
    pub fn new() -> Result<Self> {
        Self::from_config(&AppConfig::default())
    }

    /// Create a downloader from application configuration
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - Failed to initialize model cache
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let cache = ModelCache::from_override(config.cache_dir.as_deref())?;
        Self::with_parts(
            cache,
            ModelRegistry::default(),
            config.cache_validation,
            config.download,
        )
    }

    /// Create a downloader from explicit parts
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_parts(
        cache: ModelCache,
        registry: ModelRegistry,
        validation: CacheValidation,
        download: DownloadConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(download.connect_timeout())
            .user_agent(concat!("efi-bgremove/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EfiError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            cache,
            registry,
            validation,
            read_timeout: download.read_timeout(),
        })
    }

    /// Get the model cache for other operations
    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Get the model registry
    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Final cache path of the model for `kind`
    ///
    /// # Errors
    /// - No artifact registered for the mode
    pub fn model_path(&self, kind: ModelKind) -> Result<PathBuf> {
        Ok(self.cache.model_path(self.registry.artifact(kind)?))
    }

    /// Return the cached model for `kind`, downloading it first if absent
    ///
    /// An existing file is returned without any network access. Under the
    /// default [`CacheValidation::TrustExisting`] it is trusted even if it is
    /// smaller than a complete download.
    ///
    /// # Errors
    /// - The mode has no published model
    /// - Any download failure (see [`ModelDownloader::download_model`])
    pub async fn ensure_model<F>(&self, kind: ModelKind, on_progress: F) -> Result<PathBuf>
    where
        F: Fn(&DownloadProgress) + Send + Sync,
    {
        let artifact = self.registry.artifact(kind)?;
        let path = self.cache.model_path(artifact);

        if self.cache.is_model_present(artifact, self.validation) {
            events::cache_hit(&artifact.filename, "ensure_model");
            return Ok(path);
        }

        events::cache_miss(&artifact.filename, "ensure_model");
        self.download_model(kind, on_progress).await
    }

    /// Download the model for `kind` into the cache
    ///
    /// Progress is reported after every chunk. When the server does not send
    /// `Content-Length`, [`DownloadProgress::percent`] is `None` for every
    /// update and only the byte count advances.
    ///
    /// # Errors
    /// Every failure is reported as [`EfiError::Download`]:
    /// - Network errors, timeouts or non-success HTTP status
    /// - Truncated transfer or file smaller than the artifact minimum
    /// - SHA-256 mismatch
    /// - File system errors while writing the cache
    pub async fn download_model<F>(&self, kind: ModelKind, on_progress: F) -> Result<PathBuf>
    where
        F: Fn(&DownloadProgress) + Send + Sync,
    {
        let (artifact, url) = self.registry.downloadable(kind)?;
        let destination = self.cache.model_path(artifact);
        let partial = self.cache.partial_path(artifact);

        log::info!("Downloading {} model from: {}", kind, url);

        let result = self
            .fetch(url, artifact, &partial, &on_progress)
            .instrument(spans::download(url, &destination))
            .await;
        let result = match result {
            Ok(()) => tokio::fs::rename(&partial, &destination).await.map_err(|e| {
                EfiError::file_io_error("move downloaded model into cache", &destination, &e)
            }),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                log::info!("Model ready at {}", destination.display());
                Ok(destination)
            },
            Err(e) => {
                let e = e.into_download();
                log::warn!("{}", e);
                Err(e)
            },
        }
    }

    /// Stream `url` into `partial` and validate the result
    async fn fetch(
        &self,
        url: &str,
        artifact: &ModelArtifact,
        partial: &Path,
        on_progress: &(dyn Fn(&DownloadProgress) + Send + Sync),
    ) -> Result<()> {
        let response = tokio::time::timeout(self.read_timeout, self.client.get(url).send())
            .await
            .map_err(|_| {
                EfiError::download(format!(
                    "no response within {}s from {}",
                    self.read_timeout.as_secs(),
                    url
                ))
            })?
            .map_err(|e| EfiError::download(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(EfiError::download(format!(
                "HTTP error {} for {}",
                response.status(),
                url
            )));
        }

        let total_size = response.content_length();

        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(|e| EfiError::file_io_error("create file", partial, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = artifact.sha256.as_ref().map(|_| Sha256::new());
        let mut downloaded = 0u64;
        let mut buffer = vec![0; CHUNK_SIZE];

        loop {
            let bytes_read = tokio::time::timeout(self.read_timeout, stream.read(&mut buffer))
                .await
                .map_err(|_| {
                    EfiError::download(format!(
                        "no data received for {}s from {}",
                        self.read_timeout.as_secs(),
                        url
                    ))
                })?
                .map_err(|e| EfiError::download(format!("failed to read download stream: {}", e)))?;

            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            file.write_all(chunk)
                .await
                .map_err(|e| EfiError::file_io_error("write to file", partial, &e))?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(chunk);
            }

            downloaded += bytes_read as u64;
            events::download_progress(url, downloaded, total_size);
            on_progress(&DownloadProgress {
                file_name: artifact.filename.clone(),
                downloaded,
                total: total_size,
                completed: false,
            });
        }

        file.flush()
            .await
            .map_err(|e| EfiError::file_io_error("flush file", partial, &e))?;
        drop(file);

        if let Some(total) = total_size {
            if downloaded != total {
                return Err(EfiError::download(format!(
                    "transfer ended after {} of {} bytes",
                    downloaded, total
                )));
            }
        }

        let written = tokio::fs::metadata(partial)
            .await
            .map_err(|e| EfiError::file_io_error("read downloaded file metadata", partial, &e))?
            .len();
        if written < artifact.min_size_bytes {
            return Err(EfiError::download(format!(
                "downloaded model is incomplete ({} bytes, expected at least {})",
                written, artifact.min_size_bytes
            )));
        }

        if let (Some(expected), Some(hasher)) = (artifact.sha256.as_deref(), hasher) {
            let actual = format!("{:x}", hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(EfiError::download(format!(
                    "checksum mismatch for {}: expected {}, got {}",
                    artifact.filename, expected, actual
                )));
            }
        }

        on_progress(&DownloadProgress {
            file_name: artifact.filename.clone(),
            downloaded,
            total: total_size,
            completed: true,
        });

        log::debug!("Downloaded {} bytes to {}", downloaded, partial.display());
        Ok(())
    }
}

/// Verify the SHA-256 digest of a file on disk
///
/// # Errors
/// - The file cannot be read
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };

    let contents = std::fs::read(file_path)
        .map_err(|e| EfiError::file_io_error("read file for verification", file_path, &e))?;

    let actual_hash = format!("{:x}", Sha256::digest(&contents));
    if actual_hash.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {}, got {}",
            file_path.display(),
            expected,
            actual_hash
        );
        Ok(false)
    }
}
