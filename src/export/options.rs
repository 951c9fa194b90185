//! Export option set.

use serde::{Deserialize, Serialize};

use crate::format::{BboxFormat, MaskFormat};

fn yes() -> bool {
    true
}

/// What an export contains and how annotations and masks are encoded.
///
/// COCO annotations are always written; `bbox_format` only selects one
/// additional format (selecting COCO adds nothing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Write MIP/SUM projections and thumbnails of each image
    #[serde(default = "yes")]
    pub include_fov_images: bool,

    /// Write MIP/SUM projections of each crop
    #[serde(default = "yes")]
    pub include_crop_images: bool,

    /// Write image and crop embedding tables
    #[serde(default = "yes")]
    pub include_embeddings: bool,

    /// Write image and crop masks
    #[serde(default = "yes")]
    pub include_masks: bool,

    /// Extra bounding-box format next to COCO
    #[serde(default)]
    pub bbox_format: BboxFormat,

    /// Mask serialization
    #[serde(default)]
    pub mask_format: MaskFormat,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_fov_images: true,
            include_crop_images: true,
            include_embeddings: true,
            include_masks: true,
            bbox_format: BboxFormat::default(),
            mask_format: MaskFormat::default(),
        }
    }
}

impl ExportOptions {
    /// Create options with everything included.
    pub fn new() -> Self {
        Self::default()
    }

    /// Include or skip image projections.
    pub fn fov_images(mut self, include: bool) -> Self {
        self.include_fov_images = include;
        self
    }

    /// Include or skip crop projections.
    pub fn crop_images(mut self, include: bool) -> Self {
        self.include_crop_images = include;
        self
    }

    /// Include or skip embeddings.
    pub fn embeddings(mut self, include: bool) -> Self {
        self.include_embeddings = include;
        self
    }

    /// Include or skip masks.
    pub fn masks(mut self, include: bool) -> Self {
        self.include_masks = include;
        self
    }

    /// Select the additional bounding-box format.
    pub fn bbox_format(mut self, format: BboxFormat) -> Self {
        self.bbox_format = format;
        self
    }

    /// Select the mask serialization.
    pub fn mask_format(mut self, format: MaskFormat) -> Self {
        self.mask_format = format;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_default_to_everything() {
        let options: ExportOptions = serde_json::from_str(r#"{"bbox_format": "YOLO"}"#).unwrap();
        assert!(options.include_fov_images);
        assert!(options.include_masks);
        assert_eq!(options.bbox_format, BboxFormat::Yolo);
        assert_eq!(options.mask_format, MaskFormat::Png);
    }

    #[test]
    fn test_builder() {
        let options = ExportOptions::new()
            .embeddings(false)
            .mask_format(MaskFormat::CocoStringRle);
        assert!(!options.include_embeddings);
        assert!(options.include_crop_images);
        assert_eq!(options.mask_format, MaskFormat::CocoStringRle);
    }
}
