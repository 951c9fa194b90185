//! Segmentation mask rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::format::{BinaryMask, Rle, check_mask_size, rasterize_polygon};

/// What a mask is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MaskScope {
    /// Whole field-of-view segmentation of an image
    Image(u64),
    /// Cell outline of a single crop
    Crop(u64),
}

/// Stored mask geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaskGeometry {
    /// Closed polygon in absolute pixel coordinates
    Polygon { points: Vec<(f32, f32)> },
    /// Column-major run-length encoding
    Rle(Rle),
}

/// A binary segmentation mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskRecord {
    /// Catalog identifier
    pub id: u64,
    /// Owner of the mask
    pub scope: MaskScope,
    /// Mask width in pixels
    pub width: u32,
    /// Mask height in pixels
    pub height: u32,
    /// Shape of the mask
    pub geometry: MaskGeometry,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl MaskRecord {
    /// Create an unsaved polygon mask.
    pub fn polygon(scope: MaskScope, width: u32, height: u32, points: Vec<(f32, f32)>) -> Self {
        Self {
            id: 0,
            scope,
            width,
            height,
            geometry: MaskGeometry::Polygon { points },
            created_at: Utc::now(),
        }
    }

    /// Create an unsaved run-length mask; the size is taken from the encoding.
    pub fn rle(scope: MaskScope, rle: Rle) -> Self {
        Self {
            id: 0,
            scope,
            width: rle.width,
            height: rle.height,
            geometry: MaskGeometry::Rle(rle),
            created_at: Utc::now(),
        }
    }

    /// Rasterize the mask into a bitmap.
    pub fn to_bitmap(&self) -> Result<BinaryMask, crate::format::FormatError> {
        match &self.geometry {
            MaskGeometry::Polygon { points } => {
                check_mask_size(self.width, self.height)?;
                Ok(rasterize_polygon(points, self.width, self.height))
            }
            MaskGeometry::Rle(rle) => rle.decode(),
        }
    }

    /// Foreground pixel count.
    pub fn area(&self) -> u64 {
        match &self.geometry {
            MaskGeometry::Rle(rle) => rle.area(),
            MaskGeometry::Polygon { .. } => self
                .to_bitmap()
                .map(|bitmap| bitmap.count_ones())
                .unwrap_or(0),
        }
    }
}
