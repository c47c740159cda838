//! Model cache management for downloaded models
//!
//! Models live in a platform cache directory that survives application runs:
//! - Linux: `$XDG_CACHE_HOME/BackgroundRemover/model_cache/` or `~/.cache/...`
//! - macOS: `~/Library/Caches/BackgroundRemover/model_cache/`
//! - Windows: `%LOCALAPPDATA%\BackgroundRemover\model_cache\`
//!
//! In-flight downloads are written next to their final file with a `.part`
//! suffix, so only completed and validated downloads ever occupy a model path.

use crate::config::CacheValidation;
use crate::error::{EfiError, Result};
use crate::models::{ModelArtifact, ModelKind, ModelRegistry};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "EFI_BGREMOVE_CACHE_DIR";

const APP_DIR_NAME: &str = "BackgroundRemover";
const MODEL_CACHE_DIR_NAME: &str = "model_cache";

/// Information about a cached model file
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Mode the file belongs to
    pub kind: ModelKind,
    /// Path to the cached file
    pub path: PathBuf,
    /// File size in bytes
    pub size_bytes: u64,
    /// Whether the file meets the artifact's minimum size
    pub meets_min_size: bool,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

/// Resolve the platform cache directory and create it if missing
///
/// # Errors
/// - No cache directory could be determined for this platform
/// - Directory creation failed
pub fn resolve_cache_dir() -> Result<PathBuf> {
    let root = match std::env::var_os(CACHE_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::cache_dir()
            .ok_or_else(|| {
                EfiError::invalid_config(format!(
                    "Failed to determine cache directory. Set {} environment variable.",
                    CACHE_DIR_ENV
                ))
            })?
            .join(APP_DIR_NAME),
    };
    create_model_dir(&root)
}

fn create_model_dir(root: &Path) -> Result<PathBuf> {
    let cache_dir = root.join(MODEL_CACHE_DIR_NAME);
    fs::create_dir_all(&cache_dir)
        .map_err(|e| EfiError::file_io_error("create cache directory", &cache_dir, &e))?;
    Ok(cache_dir)
}

impl ModelCache {
    /// Create a cache manager in the platform cache directory
    ///
    /// # Errors
    /// - Failed to determine cache directory
    /// - Failed to create cache directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            cache_dir: resolve_cache_dir()?,
        })
    }

    /// Create a cache manager under a custom root; models go to `<root>/model_cache`
    ///
    /// # Errors
    /// - Failed to create cache directory
    pub fn with_root<P: AsRef<Path>>(root: P) -> Result<Self> {
        Ok(Self {
            cache_dir: create_model_dir(root.as_ref())?,
        })
    }

    /// Cache manager for an optional root override
    ///
    /// # Errors
    /// - Same as [`ModelCache::new`] / [`ModelCache::with_root`]
    pub fn from_override(root: Option<&Path>) -> Result<Self> {
        match root {
            Some(root) => Self::with_root(root),
            None => Self::new(),
        }
    }

    /// Directory holding the model files
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Final location of an artifact (may not exist)
    #[must_use]
    pub fn model_path(&self, artifact: &ModelArtifact) -> PathBuf {
        self.cache_dir.join(&artifact.filename)
    }

    /// Location of an in-progress download
    #[must_use]
    pub fn partial_path(&self, artifact: &ModelArtifact) -> PathBuf {
        self.cache_dir.join(artifact.partial_filename())
    }

    /// Check whether an artifact is available for use
    ///
    /// With [`CacheValidation::TrustExisting`] any existing file counts, even
    /// one that is smaller than a complete download. `Strict` re-applies the
    /// minimum size on every call.
    #[must_use]
    pub fn is_model_present(&self, artifact: &ModelArtifact, validation: CacheValidation) -> bool {
        let path = self.model_path(artifact);
        match validation {
            CacheValidation::TrustExisting => path.is_file(),
            CacheValidation::Strict => fs::metadata(&path)
                .map(|meta| meta.is_file() && meta.len() >= artifact.min_size_bytes)
                .unwrap_or(false),
        }
    }

    /// List cached model files for every registered mode
    ///
    /// # Errors
    /// - Failed to read file metadata
    pub fn list_cached_models(&self, registry: &ModelRegistry) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();
        for (kind, artifact) in registry.iter() {
            let path = self.model_path(artifact);
            if !path.is_file() {
                continue;
            }
            let size_bytes = fs::metadata(&path)
                .map_err(|e| EfiError::file_io_error("read model metadata", &path, &e))?
                .len();
            models.push(CachedModelInfo {
                kind,
                path,
                size_bytes,
                meets_min_size: size_bytes >= artifact.min_size_bytes,
            });
        }
        Ok(models)
    }

    /// Remove one cached artifact and any partial download of it
    ///
    /// # Returns
    /// `true` if a completed model file was removed
    ///
    /// # Errors
    /// - Failed to remove the files
    pub fn clear_model(&self, artifact: &ModelArtifact) -> Result<bool> {
        let partial = self.partial_path(artifact);
        if partial.exists() {
            fs::remove_file(&partial)
                .map_err(|e| EfiError::file_io_error("remove partial download", &partial, &e))?;
        }

        let path = self.model_path(artifact);
        if !path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {}", artifact.filename);
        fs::remove_file(&path)
            .map_err(|e| EfiError::file_io_error("remove cached model", &path, &e))?;
        Ok(true)
    }

    /// Remove every file in the cache directory
    ///
    /// # Returns
    /// Names of the removed files
    ///
    /// # Errors
    /// - Failed to read the cache directory
    /// - Failed to remove a file
    pub fn clear_all(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            EfiError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                EfiError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;
            let path = entry.path();
            if path.is_file() {
                fs::remove_file(&path)
                    .map_err(|e| EfiError::file_io_error("remove cached file", &path, &e))?;
                removed.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        removed.sort();
        log::info!("Cleared {} file(s) from {}", removed.len(), self.cache_dir.display());
        Ok(removed)
    }
}

/// Format a byte count for display
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS.get(unit).copied().unwrap_or("GB"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn artifact() -> ModelArtifact {
        ModelArtifact::new("model.onnx", "http://127.0.0.1:1/model.onnx", 1024)
    }

    #[test]
    fn test_with_root_creates_directory() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_root(temp.path().join("nested").join("root")).unwrap();
        assert!(cache.cache_dir().is_dir());
        assert!(cache.cache_dir().ends_with("model_cache"));
    }

    #[test]
    fn test_with_root_propagates_creation_failure() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, b"not a directory").unwrap();

        let err = ModelCache::with_root(&blocker).unwrap_err();
        assert!(err.to_string().contains("create cache directory"));
    }

    #[test]
    fn test_presence_trusts_small_files_by_default() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_root(temp.path()).unwrap();
        let artifact = artifact();

        assert!(!cache.is_model_present(&artifact, CacheValidation::TrustExisting));

        fs::write(cache.model_path(&artifact), vec![0u8; 10]).unwrap();
        assert!(cache.is_model_present(&artifact, CacheValidation::TrustExisting));
        assert!(!cache.is_model_present(&artifact, CacheValidation::Strict));

        fs::write(cache.model_path(&artifact), vec![0u8; 1024]).unwrap();
        assert!(cache.is_model_present(&artifact, CacheValidation::Strict));
    }

    #[test]
    fn test_partial_file_is_not_present() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_root(temp.path()).unwrap();
        let artifact = artifact();

        fs::write(cache.partial_path(&artifact), vec![0u8; 4096]).unwrap();
        assert!(!cache.is_model_present(&artifact, CacheValidation::TrustExisting));
    }

    #[test]
    fn test_list_and_clear() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_root(temp.path()).unwrap();
        let registry = ModelRegistry::default().with_artifact(ModelKind::Objects, artifact());
        let artifact = artifact();

        assert!(cache.list_cached_models(&registry).unwrap().is_empty());

        fs::write(cache.model_path(&artifact), vec![0u8; 100]).unwrap();
        fs::write(cache.partial_path(&artifact), vec![0u8; 5]).unwrap();

        let models = cache.list_cached_models(&registry).unwrap();
        assert_eq!(models.len(), 1);
        let first = models.first().unwrap();
        assert_eq!(first.kind, ModelKind::Objects);
        assert_eq!(first.size_bytes, 100);
        assert!(!first.meets_min_size);

        assert!(cache.clear_model(&artifact).unwrap());
        assert!(!cache.partial_path(&artifact).exists());
        assert!(!cache.clear_model(&artifact).unwrap());
    }

    #[test]
    fn test_clear_all() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_root(temp.path()).unwrap();
        fs::write(cache.cache_dir().join("b.onnx"), b"b").unwrap();
        fs::write(cache.cache_dir().join("a.onnx.part"), b"a").unwrap();

        let removed = cache.clear_all().unwrap();
        assert_eq!(removed, vec!["a.onnx.part".to_string(), "b.onnx".to_string()]);
        assert!(cache.clear_all().unwrap().is_empty());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(176_000_000), "167.8 MB");
    }
}
