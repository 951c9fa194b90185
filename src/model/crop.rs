//! Detected crop rows.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Embedding;

/// Axis-aligned box in absolute pixel coordinates (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Create a bounding box.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Area in square pixels.
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Whether the box has positive extent.
    pub fn is_valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.x.is_finite() && self.y.is_finite()
    }

    /// Clamp the box to an image of the given size.
    pub fn clamped_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let x0 = self.x.clamp(0.0, w);
        let y0 = self.y.clamp(0.0, h);
        let x1 = (self.x + self.width).clamp(0.0, w);
        let y1 = (self.y + self.height).clamp(0.0, h);
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }
}

/// A detected rectangular sub-region of a field of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropRecord {
    /// Catalog identifier
    pub id: u64,
    /// Image the crop was cut from
    pub image_id: u64,
    /// Location within the image
    pub bbox: BoundingBox,
    /// Detector confidence
    #[serde(default)]
    pub detection_confidence: Option<f32>,
    /// Detector class label
    #[serde(default)]
    pub class_name: Option<String>,
    /// Protein the crop was assigned to
    #[serde(default)]
    pub protein_name: Option<String>,
    /// Maximum-intensity projection on disk
    #[serde(default)]
    pub mip_path: Option<PathBuf>,
    /// Sum projection on disk
    #[serde(default)]
    pub sum_path: Option<PathBuf>,
    /// Crop embedding
    #[serde(default)]
    pub embedding: Option<Embedding>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl CropRecord {
    /// Create an unsaved crop row.
    pub fn new(image_id: u64, bbox: BoundingBox) -> Self {
        Self {
            id: 0,
            image_id,
            bbox,
            detection_confidence: None,
            class_name: None,
            protein_name: None,
            mip_path: None,
            sum_path: None,
            embedding: None,
            created_at: Utc::now(),
        }
    }

    /// Set the detector confidence.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.detection_confidence = Some(confidence);
        self
    }

    /// Set the detector class label.
    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    /// Set the assigned protein.
    pub fn with_protein(mut self, protein_name: impl Into<String>) -> Self {
        self.protein_name = Some(protein_name.into());
        self
    }

    /// Set the projection paths.
    pub fn with_projections(mut self, mip: Option<PathBuf>, sum: Option<PathBuf>) -> Self {
        self.mip_path = mip;
        self.sum_path = sum;
        self
    }

    /// Set the embedding.
    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped_to_image() {
        let bbox = BoundingBox::new(-5.0, 90.0, 20.0, 20.0);
        let clamped = bbox.clamped_to(100, 100);
        assert_eq!(clamped, BoundingBox::new(0.0, 90.0, 15.0, 10.0));
        assert!(clamped.is_valid());
    }

    #[test]
    fn test_degenerate_box_invalid() {
        assert!(!BoundingBox::new(10.0, 10.0, 0.0, 5.0).is_valid());
        assert!(BoundingBox::new(10.0, 10.0, 1.0, 5.0).is_valid());
    }
}
