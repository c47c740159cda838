//! Segmentation model registry
//!
//! Each processing mode maps to exactly one model artifact: a file name inside
//! the cache, the URL it is published at, and the smallest size a complete
//! download can have.

use crate::error::{EfiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Published location of the U2-Net general object model
pub const U2NET_URL: &str = "https://github.com/jesuspinedaof/efi/releases/download/v1.0/u2net.onnx";

/// Known model files are ~170 MB; anything under 50 MB is a broken download
pub const DEFAULT_MIN_MODEL_SIZE: u64 = 50_000_000;

/// Processing mode selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// General salient-object segmentation (U2-Net)
    #[default]
    Objects,
    /// Human segmentation (U2-Net human seg), not published yet
    People,
}

impl ModelKind {
    /// All modes in display order
    pub const ALL: [ModelKind; 2] = [ModelKind::Objects, ModelKind::People];

    /// Registry key of this mode
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Objects => "objects",
            Self::People => "people",
        }
    }

    /// Session name understood by the segmentation engine
    #[must_use]
    pub fn engine_model_name(self) -> &'static str {
        match self {
            Self::Objects => "u2net",
            Self::People => "u2net_human_seg",
        }
    }

    /// Human readable label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Objects => "Objects",
            Self::People => "People",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ModelKind {
    type Err = EfiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "objects" | "objetos" => Ok(Self::Objects),
            "people" | "personas" => Ok(Self::People),
            other => Err(EfiError::invalid_config(format!(
                "Unknown mode '{}'. Expected one of: objects, people",
                other
            ))),
        }
    }
}

/// A downloadable model file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// File name inside the cache directory
    pub filename: String,
    /// Remote source, `None` while the model is not published
    pub url: Option<String>,
    /// Smallest size in bytes a complete file can have
    pub min_size_bytes: u64,
    /// Optional hex SHA-256 of the complete file, compared case-insensitively
    pub sha256: Option<String>,
}

impl ModelArtifact {
    /// Create an artifact published at `url`
    pub fn new<F: Into<String>, U: Into<String>>(filename: F, url: U, min_size_bytes: u64) -> Self {
        Self {
            filename: filename.into(),
            url: Some(url.into()),
            min_size_bytes,
            sha256: None,
        }
    }

    /// Create an artifact that has a known file name but no source yet
    pub fn unpublished<F: Into<String>>(filename: F, min_size_bytes: u64) -> Self {
        Self {
            filename: filename.into(),
            url: None,
            min_size_bytes,
            sha256: None,
        }
    }

    /// Attach an expected SHA-256 digest
    #[must_use]
    pub fn with_sha256<S: Into<String>>(mut self, digest: S) -> Self {
        self.sha256 = Some(digest.into().to_ascii_lowercase());
        self
    }

    /// Name of the in-progress download file
    #[must_use]
    pub fn partial_filename(&self) -> String {
        format!("{}.part", self.filename)
    }
}

/// Mapping from processing mode to model artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRegistry {
    artifacts: HashMap<ModelKind, ModelArtifact>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        let mut artifacts = HashMap::new();
        artifacts.insert(
            ModelKind::Objects,
            ModelArtifact::new("u2net.onnx", U2NET_URL, DEFAULT_MIN_MODEL_SIZE),
        );
        artifacts.insert(
            ModelKind::People,
            ModelArtifact::unpublished("u2net_human_seg.onnx", DEFAULT_MIN_MODEL_SIZE),
        );
        Self { artifacts }
    }
}

impl ModelRegistry {
    /// Registry with the published defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the artifact registered for `kind`
    #[must_use]
    pub fn with_artifact(mut self, kind: ModelKind, artifact: ModelArtifact) -> Self {
        self.artifacts.insert(kind, artifact);
        self
    }

    /// Artifact registered for `kind`, whether published or not
    ///
    /// # Errors
    /// - No artifact registered for the mode
    pub fn artifact(&self, kind: ModelKind) -> Result<&ModelArtifact> {
        self.artifacts.get(&kind).ok_or_else(|| {
            EfiError::model_unavailable(format!("No model registered for mode '{}'", kind))
        })
    }

    /// Artifact for `kind` together with its source URL
    ///
    /// # Errors
    /// - The mode has no published model yet
    pub fn downloadable(&self, kind: ModelKind) -> Result<(&ModelArtifact, &str)> {
        let artifact = self.artifact(kind)?;
        let url = artifact.url.as_deref().ok_or_else(|| {
            EfiError::model_unavailable(format!(
                "{} mode is still in development, no model has been published for it",
                kind.label()
            ))
        })?;
        Ok((artifact, url))
    }

    /// Registered artifacts in mode order
    pub fn iter(&self) -> impl Iterator<Item = (ModelKind, &ModelArtifact)> {
        ModelKind::ALL
            .into_iter()
            .filter_map(move |kind| self.artifacts.get(&kind).map(|a| (kind, a)))
    }
}
