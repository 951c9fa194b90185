//! Annotation and mask codecs.
//!
//! This module converts between catalog rows and the file formats an archive
//! carries. Bounding-box formats are strategies behind the
//! [`AnnotationCodec`] trait and are looked up through the
//! [`FormatRegistry`]; mask codecs and run-length encoding are plain
//! functions.
//!
//! ## Supported Formats
//!
//! - **COCO JSON**: always written, one `annotations/coco.json`
//! - **YOLO TXT**: `classes.txt` plus one label file per image
//! - **Pascal VOC XML**: one XML document per image
//! - **CSV**: one row per crop
//! - **Masks**: PNG, COCO RLE (integer or compressed string) and polygon JSON
//! - **Embeddings**: float32 `.npy` tables with a JSON list of row IDs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cellport::format::{BboxFormat, FormatRegistry};
//!
//! let registry = FormatRegistry::new();
//! let codec = registry.get(BboxFormat::Yolo)?;
//! let encoded = codec.encode(&images)?;
//! ```

mod common;
mod embeddings;
mod error;
pub mod formats;
mod mask;
mod registry;
mod rle;
mod traits;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use common::{
    AnnotatedImage, BoxAnnotation, CropImportData, DEFAULT_CLASS, base_name, bbox_to_yolo,
    class_list, file_stem, yolo_to_bbox,
};
pub use embeddings::EmbeddingTable;
pub use error::FormatError;
pub use mask::{EncodedMask, MaskDocument, RleCounts, decode_mask, encode_mask, rasterize_polygon};
pub use registry::FormatRegistry;
pub use rle::{BinaryMask, MAX_MASK_PIXELS, Rle, check_mask_size};
pub use traits::{AnnotationCodec, DecodeInput, DecodeResult, EncodedAnnotations};

/// Additional bounding-box format written next to COCO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BboxFormat {
    /// COCO JSON
    #[default]
    Coco,
    /// YOLO text labels
    Yolo,
    /// Pascal VOC XML
    Voc,
    /// Comma separated rows
    Csv,
}

impl BboxFormat {
    /// All bounding-box formats, in detection priority order.
    pub const ALL: [BboxFormat; 4] = [
        BboxFormat::Coco,
        BboxFormat::Voc,
        BboxFormat::Yolo,
        BboxFormat::Csv,
    ];

    /// Lowercase identifier.
    pub fn id(&self) -> &'static str {
        match self {
            BboxFormat::Coco => "coco",
            BboxFormat::Yolo => "yolo",
            BboxFormat::Voc => "voc",
            BboxFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for BboxFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for BboxFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coco" => Ok(BboxFormat::Coco),
            "yolo" => Ok(BboxFormat::Yolo),
            "voc" | "pascal_voc" | "pascal-voc" => Ok(BboxFormat::Voc),
            "csv" => Ok(BboxFormat::Csv),
            other => Err(FormatError::invalid_format(format!(
                "unknown bounding-box format '{}'",
                other
            ))),
        }
    }
}

/// Serialization used for exported masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaskFormat {
    /// 8-bit grayscale PNG, foreground 255
    #[default]
    Png,
    /// COCO RLE with integer counts
    CocoRle,
    /// COCO RLE with compressed string counts
    CocoStringRle,
    /// Polygon vertices as JSON
    Polygon,
}

impl MaskFormat {
    /// File extension used for masks of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            MaskFormat::Png => "png",
            _ => "json",
        }
    }

    /// Identifier as accepted by [`FromStr`].
    pub fn id(&self) -> &'static str {
        match self {
            MaskFormat::Png => "png",
            MaskFormat::CocoRle => "coco_rle",
            MaskFormat::CocoStringRle => "coco_string_rle",
            MaskFormat::Polygon => "polygon",
        }
    }
}

impl fmt::Display for MaskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for MaskFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "png" => Ok(MaskFormat::Png),
            "coco_rle" | "rle" => Ok(MaskFormat::CocoRle),
            "coco_string_rle" | "string_rle" => Ok(MaskFormat::CocoStringRle),
            "polygon" => Ok(MaskFormat::Polygon),
            other => Err(FormatError::invalid_format(format!(
                "unknown mask format '{}'",
                other
            ))),
        }
    }
}

/// Layout of an uploaded archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// Full-fidelity layout with `manifest.json`
    Native,
    /// COCO JSON annotations
    Coco,
    /// YOLO text labels
    Yolo,
    /// Pascal VOC XML
    Voc,
    /// Comma separated rows
    Csv,
}

impl ArchiveFormat {
    /// The annotation codec for non-native archives.
    pub fn bbox_format(&self) -> Option<BboxFormat> {
        match self {
            ArchiveFormat::Native => None,
            ArchiveFormat::Coco => Some(BboxFormat::Coco),
            ArchiveFormat::Yolo => Some(BboxFormat::Yolo),
            ArchiveFormat::Voc => Some(BboxFormat::Voc),
            ArchiveFormat::Csv => Some(BboxFormat::Csv),
        }
    }

    /// Lowercase identifier.
    pub fn id(&self) -> &'static str {
        match self {
            ArchiveFormat::Native => "native",
            other => other.bbox_format().map(|f| f.id()).unwrap_or("native"),
        }
    }
}

impl From<BboxFormat> for ArchiveFormat {
    fn from(format: BboxFormat) -> Self {
        match format {
            BboxFormat::Coco => ArchiveFormat::Coco,
            BboxFormat::Yolo => ArchiveFormat::Yolo,
            BboxFormat::Voc => ArchiveFormat::Voc,
            BboxFormat::Csv => ArchiveFormat::Csv,
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ArchiveFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("native") {
            return Ok(ArchiveFormat::Native);
        }
        s.parse::<BboxFormat>().map(ArchiveFormat::from)
    }
}
