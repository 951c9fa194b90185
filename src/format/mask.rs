//! Mask rasterization and on-disk mask codecs.
//!
//! Masks are written as one file each: an 8-bit PNG (foreground 255) or a
//! small JSON document holding `size: [height, width]` plus either COCO RLE
//! `counts` (integer list or compressed string) or a COCO-style flat polygon
//! `segmentation`.

use std::io::Cursor;

use image::{GrayImage, ImageFormat, Luma};
use serde::{Deserialize, Serialize};

use crate::format::MaskFormat;
use crate::format::error::FormatError;
use crate::format::rle::{BinaryMask, Rle, check_mask_size};
use crate::model::{MaskGeometry, MaskRecord, MaskScope};

/// Rasterize a closed polygon with the even-odd rule, sampling pixel centers.
pub fn rasterize_polygon(points: &[(f32, f32)], width: u32, height: u32) -> BinaryMask {
    let mut mask = BinaryMask::new(width, height);
    let n = points.len();
    if n < 3 {
        return mask;
    }

    let mut crossings: Vec<f32> = Vec::new();
    for y in 0..height {
        let yc = y as f32 + 0.5;
        crossings.clear();

        for i in 0..n {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % n];
            if (y0 <= yc && y1 > yc) || (y1 <= yc && y0 > yc) {
                let t = (yc - y0) / (y1 - y0);
                crossings.push(x0 + t * (x1 - x0));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for span in crossings.chunks_exact(2) {
            // pixel x is inside when span[0] <= x + 0.5 < span[1]
            let start = (span[0] - 0.5).ceil().max(0.0) as u32;
            let end = (span[1] - 0.5).ceil().clamp(0.0, width as f32) as u32;
            for x in start..end {
                mask.set(x, y, true);
            }
        }
    }

    mask
}

/// JSON mask document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskDocument {
    /// `[height, width]`, as in COCO
    pub size: [u32; 2],

    /// RLE counts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<RleCounts>,

    /// Polygons as flat `[x1, y1, x2, y2, ...]` lists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<Vec<Vec<f32>>>,
}

/// Integer or compressed-string RLE counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RleCounts {
    /// Plain run lengths
    Integers(Vec<u64>),
    /// pycocotools compressed string
    Compressed(String),
}

/// A mask serialized into one archive file.
#[derive(Debug, Clone)]
pub struct EncodedMask {
    /// `png` or `json`
    pub extension: &'static str,
    /// File content
    pub bytes: Vec<u8>,
    /// Set when the requested format could not be honored exactly
    pub warning: Option<String>,
}

/// Serialize a mask in the requested format.
///
/// RLE masks cannot be turned back into polygons, so a `POLYGON` request for
/// one is written as integer RLE and reported through `warning`.
pub fn encode_mask(mask: &MaskRecord, format: MaskFormat) -> Result<EncodedMask, FormatError> {
    match format {
        MaskFormat::Png => encode_png(mask),
        MaskFormat::CocoRle => encode_rle(mask, false, None),
        MaskFormat::CocoStringRle => encode_rle(mask, true, None),
        MaskFormat::Polygon => match &mask.geometry {
            MaskGeometry::Polygon { points } => {
                let flat: Vec<f32> = points.iter().flat_map(|&(x, y)| [x, y]).collect();
                let doc = MaskDocument {
                    size: [mask.height, mask.width],
                    counts: None,
                    segmentation: Some(vec![flat]),
                };
                Ok(EncodedMask {
                    extension: "json",
                    bytes: serde_json::to_vec(&doc)?,
                    warning: None,
                })
            }
            MaskGeometry::Rle(_) => encode_rle(
                mask,
                false,
                Some(format!(
                    "mask {} is stored as RLE and cannot be written as a polygon; wrote COCO RLE instead",
                    mask.id
                )),
            ),
        },
    }
}

fn encode_png(mask: &MaskRecord) -> Result<EncodedMask, FormatError> {
    if mask.width == 0 || mask.height == 0 {
        return Err(FormatError::invalid_format(format!(
            "mask {} has an empty size {}x{}",
            mask.id, mask.width, mask.height
        )));
    }

    let bitmap = mask.to_bitmap()?;
    let image = GrayImage::from_fn(mask.width, mask.height, |x, y| {
        Luma([if bitmap.get(x, y) { 255 } else { 0 }])
    });

    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, ImageFormat::Png)?;

    Ok(EncodedMask {
        extension: "png",
        bytes: cursor.into_inner(),
        warning: None,
    })
}

fn encode_rle(
    mask: &MaskRecord,
    compressed: bool,
    warning: Option<String>,
) -> Result<EncodedMask, FormatError> {
    let rle = match &mask.geometry {
        MaskGeometry::Rle(rle) => rle.clone(),
        MaskGeometry::Polygon { .. } => Rle::encode(&mask.to_bitmap()?),
    };

    let counts = if compressed {
        RleCounts::Compressed(rle.to_compressed_string())
    } else {
        RleCounts::Integers(rle.counts)
    };
    let doc = MaskDocument {
        size: [rle.height, rle.width],
        counts: Some(counts),
        segmentation: None,
    };

    Ok(EncodedMask {
        extension: "json",
        bytes: serde_json::to_vec(&doc)?,
        warning,
    })
}

/// Parse a mask file written by [`encode_mask`] (or a compatible tool).
///
/// The format is chosen from the file extension of `file_name`.
pub fn decode_mask(
    scope: MaskScope,
    file_name: &str,
    bytes: &[u8],
) -> Result<MaskRecord, FormatError> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => {
            let (width, height) =
                image::ImageReader::with_format(Cursor::new(bytes), ImageFormat::Png)
                    .into_dimensions()?;
            check_mask_size(width, height)?;
            let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)?.to_luma8();
            let bitmap = BinaryMask::from_fn(image.width(), image.height(), |x, y| {
                image.get_pixel(x, y).0[0] > 127
            });
            Ok(MaskRecord::rle(scope, Rle::encode(&bitmap)))
        }
        "json" => {
            let doc: MaskDocument = serde_json::from_slice(bytes)?;
            let [height, width] = doc.size;

            if let Some(segmentation) = doc.segmentation {
                let flat = segmentation
                    .into_iter()
                    .next()
                    .ok_or_else(|| FormatError::missing_field("segmentation[0]"))?;
                if flat.len() < 6 || flat.len() % 2 != 0 {
                    return Err(FormatError::invalid_coordinates(format!(
                        "polygon needs at least 3 (x, y) pairs, got {} values",
                        flat.len()
                    )));
                }
                check_mask_size(width, height)?;
                let points = flat.chunks_exact(2).map(|c| (c[0], c[1])).collect();
                return Ok(MaskRecord::polygon(scope, width, height, points));
            }

            let rle = match doc.counts {
                Some(RleCounts::Integers(counts)) => Rle::from_counts(height, width, counts)?,
                Some(RleCounts::Compressed(s)) => Rle::from_compressed_string(height, width, &s)?,
                None => return Err(FormatError::missing_field("counts")),
            };
            Ok(MaskRecord::rle(scope, rle))
        }
        other => Err(FormatError::invalid_format(format!(
            "unsupported mask file extension '{}'",
            other
        ))),
    }
}
