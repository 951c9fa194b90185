//! Shared types and helpers for the bounding-box codecs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::BoundingBox;

/// Class name used for crops without one; always YOLO class 0.
pub const DEFAULT_CLASS: &str = "cell";

/// One image and the boxes detected on it, as handed to an encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedImage {
    /// Catalog image ID (COCO image id)
    pub id: u64,
    /// Original filename of the image
    pub file_name: String,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Boxes on this image
    pub boxes: Vec<BoxAnnotation>,
}

impl AnnotatedImage {
    /// Create an image entry without boxes.
    pub fn new(id: u64, file_name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id,
            file_name: file_name.into(),
            width,
            height,
            boxes: Vec::new(),
        }
    }

    /// Add a box.
    pub fn with_box(mut self, annotation: BoxAnnotation) -> Self {
        self.boxes.push(annotation);
        self
    }
}

/// A single crop bounding box in absolute pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxAnnotation {
    /// Catalog crop ID (COCO annotation id)
    pub id: u64,
    /// Box in pixels, top-left origin
    pub bbox: BoundingBox,
    /// Class label; `None` encodes as [`DEFAULT_CLASS`]
    pub class_name: Option<String>,
    /// Detector confidence
    pub confidence: Option<f32>,
}

impl BoxAnnotation {
    /// Create a box annotation.
    pub fn new(id: u64, bbox: BoundingBox) -> Self {
        Self {
            id,
            bbox,
            class_name: None,
            confidence: None,
        }
    }

    /// Set the class label.
    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    /// Set the detector confidence.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Class label with the default applied.
    pub fn class(&self) -> &str {
        match self.class_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => DEFAULT_CLASS,
        }
    }
}

/// Normalized crop produced by every non-native decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropImportData {
    /// Filename of the image the crop belongs to, as written in the annotation
    pub image_filename: String,
    /// Left edge in pixels
    pub bbox_x: f32,
    /// Top edge in pixels
    pub bbox_y: f32,
    /// Width in pixels
    pub bbox_w: f32,
    /// Height in pixels
    pub bbox_h: f32,
    /// Detector confidence, if the format carries one
    pub confidence: Option<f32>,
    /// Class label
    pub class_name: String,
}

impl CropImportData {
    /// Create a crop from a filename and an absolute box.
    pub fn new(image_filename: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            image_filename: image_filename.into(),
            bbox_x: bbox.x,
            bbox_y: bbox.y,
            bbox_w: bbox.width,
            bbox_h: bbox.height,
            confidence: None,
            class_name: DEFAULT_CLASS.to_string(),
        }
    }

    /// Set the detector confidence.
    pub fn with_confidence(mut self, confidence: Option<f32>) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the class label; blank names keep the default.
    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        let class_name = class_name.into();
        if !class_name.trim().is_empty() {
            self.class_name = class_name;
        }
        self
    }

    /// The crop box.
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(self.bbox_x, self.bbox_y, self.bbox_w, self.bbox_h)
    }

    /// Whether this crop refers to `file_name`, comparing base names with or
    /// without extension.
    pub fn matches_image(&self, file_name: &str) -> bool {
        let ours = base_name(&self.image_filename);
        let theirs = base_name(file_name);
        ours == theirs || file_stem(ours) == file_stem(theirs)
    }
}

/// Ordered class list: [`DEFAULT_CLASS`] first, then every other name sorted.
pub fn class_list(images: &[AnnotatedImage]) -> Vec<String> {
    let others: BTreeSet<&str> = images
        .iter()
        .flat_map(|image| image.boxes.iter().map(|b| b.class()))
        .filter(|name| *name != DEFAULT_CLASS)
        .collect();

    std::iter::once(DEFAULT_CLASS)
        .chain(others)
        .map(str::to_string)
        .collect()
}

/// Last path component of a `/` or `\` separated name.
pub fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// File name without its final extension.
pub fn file_stem(name: &str) -> &str {
    let name = base_name(name);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

// ============================================================================
// Coordinate Conversion Utilities
// ============================================================================

/// Convert a bounding box to normalized YOLO format (x_center, y_center, width, height).
pub fn bbox_to_yolo(bbox: &BoundingBox, img_width: u32, img_height: u32) -> (f32, f32, f32, f32) {
    let x_center = (bbox.x + bbox.width / 2.0) / img_width as f32;
    let y_center = (bbox.y + bbox.height / 2.0) / img_height as f32;
    let w = bbox.width / img_width as f32;
    let h = bbox.height / img_height as f32;
    (x_center, y_center, w, h)
}

/// Convert normalized YOLO format to an absolute bounding box.
///
/// The top-left corner is clamped to zero when the center minus half the
/// size falls outside the image.
pub fn yolo_to_bbox(
    x_center: f32,
    y_center: f32,
    w: f32,
    h: f32,
    img_width: u32,
    img_height: u32,
) -> BoundingBox {
    let width = w * img_width as f32;
    let height = h * img_height as f32;
    let x = (x_center * img_width as f32 - width / 2.0).max(0.0);
    let y = (y_center * img_height as f32 - height / 2.0).max(0.0);
    BoundingBox::new(x, y, width, height)
}
