//! Archive manifest and per-row documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::layout::FORMAT_VERSION;
use crate::export::ExportOptions;
use crate::format::FormatError;
use crate::model::{BoundingBox, CropRecord, Experiment, ImageRecord, ProteinRef};

/// Aggregate counts of an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportStatistics {
    /// Experiments written
    pub experiment_count: usize,
    /// Images written
    pub image_count: usize,
    /// Crops written
    pub crop_count: usize,
    /// Masks written (image and crop)
    pub mask_count: usize,
    /// Embedding rows written (image and crop)
    #[serde(default)]
    pub embedding_count: usize,
}

/// Root document of a native archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Layout version, `major.minor`
    pub format_version: String,
    /// When the archive was generated
    pub exported_at: DateTime<Utc>,
    /// Options the export ran with
    pub options: ExportOptions,
    /// Counts of what the archive holds
    pub statistics: ExportStatistics,
    /// Experiment IDs with a subtree under `experiments/`
    pub experiment_ids: Vec<u64>,
}

impl Manifest {
    /// Create a manifest for the current layout version.
    pub fn new(options: ExportOptions, experiment_ids: Vec<u64>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            exported_at: Utc::now(),
            options,
            statistics: ExportStatistics::default(),
            experiment_ids,
        }
    }

    /// Check the layout version against the one this build reads.
    ///
    /// A different major version is an error; a newer minor version imports
    /// with the returned warning.
    pub fn check_version(&self) -> Result<Option<String>, FormatError> {
        let (major, minor) = parse_version(&self.format_version)?;
        let (our_major, our_minor) = parse_version(FORMAT_VERSION)?;

        if major != our_major {
            return Err(FormatError::VersionMismatch {
                expected: FORMAT_VERSION.to_string(),
                found: self.format_version.clone(),
            });
        }
        if minor > our_minor {
            return Ok(Some(format!(
                "archive format {} is newer than {}; unknown fields are ignored",
                self.format_version, FORMAT_VERSION
            )));
        }
        Ok(None)
    }
}

fn parse_version(version: &str) -> Result<(u32, u32), FormatError> {
    let invalid = || FormatError::invalid_format(format!("invalid format version '{}'", version));
    let (major, minor) = version.trim().split_once('.').unwrap_or((version.trim(), "0"));
    Ok((
        major.parse().map_err(|_| invalid())?,
        minor.parse().map_err(|_| invalid())?,
    ))
}

/// `experiment.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDocument {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
    #[serde(default)]
    pub protein: Option<ProteinRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Experiment> for ExperimentDocument {
    fn from(experiment: &Experiment) -> Self {
        Self {
            id: experiment.id,
            name: experiment.name.clone(),
            description: experiment.description.clone(),
            status: experiment.status.clone(),
            protein: experiment.protein.clone(),
            created_at: experiment.created_at,
            updated_at: experiment.updated_at,
        }
    }
}

impl ExperimentDocument {
    /// Unsaved experiment row owned by `user_id`.
    pub fn to_experiment(&self, user_id: u64, name: Option<&str>) -> Experiment {
        Experiment {
            id: 0,
            user_id,
            name: name.unwrap_or(&self.name).to_string(),
            description: self.description.clone(),
            status: self.status.clone(),
            protein: self.protein.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }
}

/// `images/<id>/metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDocument {
    pub id: u64,
    pub experiment_id: u64,
    pub original_filename: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub z_slices: Option<u32>,
    pub status: String,
    /// Model of the row in `fov_embeddings.npy`, if any
    #[serde(default)]
    pub embedding_model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&ImageRecord> for ImageDocument {
    fn from(image: &ImageRecord) -> Self {
        Self {
            id: image.id,
            experiment_id: image.experiment_id,
            original_filename: image.original_filename.clone(),
            width: image.width,
            height: image.height,
            z_slices: image.z_slices,
            status: image.status.clone(),
            embedding_model: image.embedding.as_ref().map(|e| e.model.clone()),
            created_at: image.created_at,
        }
    }
}

impl ImageDocument {
    /// Unsaved image row in `experiment_id`, without file paths.
    pub fn to_image(&self, experiment_id: u64) -> ImageRecord {
        let mut image = ImageRecord::new(
            experiment_id,
            self.original_filename.clone(),
            self.width,
            self.height,
        )
        .with_status(self.status.clone());
        image.z_slices = self.z_slices;
        image.created_at = self.created_at;
        image
    }
}

/// `crops/<id>/metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropDocument {
    pub id: u64,
    pub image_id: u64,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub detection_confidence: Option<f32>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub protein_name: Option<String>,
    /// Model of the row in `crop_embeddings.npy`, if any
    #[serde(default)]
    pub embedding_model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&CropRecord> for CropDocument {
    fn from(crop: &CropRecord) -> Self {
        Self {
            id: crop.id,
            image_id: crop.image_id,
            bbox: crop.bbox,
            detection_confidence: crop.detection_confidence,
            class_name: crop.class_name.clone(),
            protein_name: crop.protein_name.clone(),
            embedding_model: crop.embedding.as_ref().map(|e| e.model.clone()),
            created_at: crop.created_at,
        }
    }
}

impl CropDocument {
    /// Unsaved crop row on `image_id`, without file paths.
    pub fn to_crop(&self, image_id: u64) -> CropRecord {
        let mut crop = CropRecord::new(image_id, self.bbox);
        crop.detection_confidence = self.detection_confidence;
        crop.class_name = self.class_name.clone();
        crop.protein_name = self.protein_name.clone();
        crop.created_at = self.created_at;
        crop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_check() {
        let mut manifest = Manifest::new(ExportOptions::default(), vec![1]);
        assert_eq!(manifest.check_version().unwrap(), None);

        manifest.format_version = "1.4".into();
        assert!(manifest.check_version().unwrap().is_some());

        manifest.format_version = "2.0".into();
        assert!(matches!(
            manifest.check_version(),
            Err(FormatError::VersionMismatch { .. })
        ));

        manifest.format_version = "one".into();
        assert!(manifest.check_version().is_err());
    }

    #[test]
    fn test_manifest_json_shape() {
        let manifest = Manifest::new(ExportOptions::default(), vec![4, 5]);
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["format_version"], "1.0");
        assert_eq!(value["experiment_ids"], serde_json::json!([4, 5]));
        assert_eq!(value["options"]["bbox_format"], "COCO");
        assert_eq!(value["statistics"]["crop_count"], 0);
    }

    #[test]
    fn test_crop_document_roundtrip() {
        let crop = CropRecord::new(3, BoundingBox::new(1.0, 2.0, 3.0, 4.0))
            .with_confidence(0.5)
            .with_protein("TP53");
        let document = CropDocument::from(&crop);
        let json = serde_json::to_string(&document).unwrap();
        let back: CropDocument = serde_json::from_str(&json).unwrap();
        let restored = back.to_crop(42);
        assert_eq!(restored.image_id, 42);
        assert_eq!(restored.bbox, crop.bbox);
        assert_eq!(restored.protein_name.as_deref(), Some("TP53"));
        assert_eq!(restored.detection_confidence, Some(0.5));
    }
}
