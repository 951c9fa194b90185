//! Field-of-view image rows.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A feature vector produced by an embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// Name of the model that produced the vector
    pub model: String,
    /// Vector components
    pub vector: Vec<f32>,
}

impl Embedding {
    /// Create an embedding.
    pub fn new(model: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            model: model.into(),
            vector,
        }
    }

    /// Vector dimension.
    pub fn dim(&self) -> usize {
        self.vector.len()
    }
}

/// One uploaded field of view and its derived projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Catalog identifier
    pub id: u64,
    /// Owning experiment
    pub experiment_id: u64,
    /// Filename as uploaded
    pub original_filename: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Number of Z slices in the source stack
    #[serde(default)]
    pub z_slices: Option<u32>,
    /// Maximum-intensity projection on disk
    #[serde(default)]
    pub mip_path: Option<PathBuf>,
    /// Sum projection on disk
    #[serde(default)]
    pub sum_path: Option<PathBuf>,
    /// Thumbnail on disk
    #[serde(default)]
    pub thumbnail_path: Option<PathBuf>,
    /// Processing status label
    pub status: String,
    /// Whole-image embedding
    #[serde(default)]
    pub embedding: Option<Embedding>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Create an unsaved image row.
    pub fn new(
        experiment_id: u64,
        original_filename: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            id: 0,
            experiment_id,
            original_filename: original_filename.into(),
            width,
            height,
            z_slices: None,
            mip_path: None,
            sum_path: None,
            thumbnail_path: None,
            status: "uploaded".to_string(),
            embedding: None,
            created_at: Utc::now(),
        }
    }

    /// Set the projection paths.
    pub fn with_projections(mut self, mip: Option<PathBuf>, sum: Option<PathBuf>) -> Self {
        self.mip_path = mip;
        self.sum_path = sum;
        self
    }

    /// Set the thumbnail path.
    pub fn with_thumbnail(mut self, thumbnail: PathBuf) -> Self {
        self.thumbnail_path = Some(thumbnail);
        self
    }

    /// Set the number of Z slices.
    pub fn with_z_slices(mut self, z_slices: u32) -> Self {
        self.z_slices = Some(z_slices);
        self
    }

    /// Set the status label.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Set the embedding.
    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Filename without its extension.
    pub fn stem(&self) -> &str {
        self.original_filename
            .rsplit_once('.')
            .map(|(base, _)| base)
            .unwrap_or(&self.original_filename)
    }
}
