//! COCO JSON codec.
//!
//! Writes one `annotations/coco.json` holding every exported image and crop.
//! Image ids are catalog image ids, annotation ids are catalog crop ids and
//! the detector confidence travels in the non-standard `score` field that
//! most COCO tooling accepts for detection results.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::format::common::{AnnotatedImage, CropImportData, DEFAULT_CLASS, base_name, class_list};
use crate::format::error::FormatError;
use crate::format::traits::{AnnotationCodec, DecodeInput, DecodeResult, EncodedAnnotations};
use crate::format::BboxFormat;
use crate::model::BoundingBox;

/// Archive path of the COCO annotation file.
pub const COCO_PATH: &str = "annotations/coco.json";

/// JSON files in an archive that are never COCO annotations.
const NON_ANNOTATION_JSON: &[&str] = &["manifest.json", "metadata.json", "experiment.json"];

/// COCO JSON codec.
///
/// Supports:
/// - Bounding boxes as `[x, y, width, height]`
/// - Categories, with `cell` always category 1
/// - Detector confidence via `score`
pub struct CocoCodec;

impl AnnotationCodec for CocoCodec {
    fn format(&self) -> BboxFormat {
        BboxFormat::Coco
    }

    fn display_name(&self) -> &'static str {
        "COCO (JSON)"
    }

    fn accepts_entry(&self, name: &str) -> bool {
        let base = base_name(name).to_ascii_lowercase();
        base.ends_with(".json")
            && !NON_ANNOTATION_JSON.contains(&base.as_str())
            && !base.ends_with("_ids.json")
            && !name.split('/').any(|part| part == "masks")
    }

    fn encode(&self, images: &[AnnotatedImage]) -> Result<EncodedAnnotations, FormatError> {
        let mut result = EncodedAnnotations::new();
        let mut coco = CocoDataset::new();

        let classes = class_list(images);
        let category_ids: HashMap<&str, u32> = classes
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx as u32 + 1))
            .collect();
        for (idx, name) in classes.iter().enumerate() {
            coco.categories.push(CocoCategory {
                id: idx as u32 + 1,
                name: name.clone(),
                supercategory: "cell".into(),
            });
        }

        for image in images {
            if image.width == 0 || image.height == 0 {
                result.warnings.push(format!(
                    "Image '{}' has no dimensions, area calculations may be incorrect",
                    image.file_name
                ));
            }

            coco.images.push(CocoImage {
                id: image.id,
                file_name: image.file_name.replace('\\', "/"),
                width: image.width,
                height: image.height,
            });

            for annotation in &image.boxes {
                let bbox = annotation.bbox;
                coco.annotations.push(CocoAnnotation {
                    id: annotation.id,
                    image_id: image.id,
                    category_id: category_ids.get(annotation.class()).copied().unwrap_or(1),
                    bbox: Some([bbox.x, bbox.y, bbox.width, bbox.height]),
                    area: bbox.area(),
                    iscrowd: 0,
                    score: annotation.confidence,
                });
                result.annotations_written += 1;
            }
        }

        let json = serde_json::to_string_pretty(&coco)?;
        result.add_file(COCO_PATH, json);

        log::debug!(
            "Encoded {} images with {} COCO annotations",
            images.len(),
            result.annotations_written
        );

        Ok(result)
    }

    fn decode(&self, input: &DecodeInput) -> Result<DecodeResult, FormatError> {
        let mut result = DecodeResult::new();
        let mut referenced = BTreeSet::new();
        let mut parsed_any = false;

        for (path, content) in &input.files {
            let coco: CocoDataset = match serde_json::from_str(content) {
                Ok(coco) => coco,
                Err(e) => {
                    result.warn(format!("Skipping '{}': not a COCO annotation file ({})", path, e));
                    continue;
                }
            };
            parsed_any = true;

            let image_names: HashMap<u64, &str> = coco
                .images
                .iter()
                .map(|img| (img.id, img.file_name.as_str()))
                .collect();
            let category_names: HashMap<u32, &str> = coco
                .categories
                .iter()
                .map(|cat| (cat.id, cat.name.as_str()))
                .collect();

            for ann in &coco.annotations {
                let Some(&file_name) = image_names.get(&ann.image_id) else {
                    result.warn(format!(
                        "{}: annotation {} refers to unknown image {}",
                        path, ann.id, ann.image_id
                    ));
                    continue;
                };
                let Some([x, y, w, h]) = ann.bbox else {
                    result.warn(format!("{}: annotation {} has no bbox", path, ann.id));
                    continue;
                };
                let bbox = BoundingBox::new(x, y, w, h);
                if !bbox.is_valid() {
                    result.warn(format!(
                        "{}: annotation {} has an invalid bbox [{}, {}, {}, {}]",
                        path, ann.id, x, y, w, h
                    ));
                    continue;
                }

                let class_name = category_names
                    .get(&ann.category_id)
                    .copied()
                    .unwrap_or(DEFAULT_CLASS);
                result.crops.push(
                    CropImportData::new(file_name, bbox)
                        .with_confidence(ann.score)
                        .with_class(class_name),
                );
                referenced.insert(file_name.to_string());
            }
        }

        if !parsed_any && !input.files.is_empty() {
            return Err(FormatError::invalid_format(
                "no readable COCO annotation file in archive",
            ));
        }

        result.images_referenced = referenced.len();
        Ok(result)
    }
}

// COCO format structures

#[derive(Debug, Serialize, Deserialize)]
struct CocoDataset {
    #[serde(default)]
    info: CocoInfo,
    images: Vec<CocoImage>,
    annotations: Vec<CocoAnnotation>,
    #[serde(default)]
    categories: Vec<CocoCategory>,
}

impl CocoDataset {
    fn new() -> Self {
        Self {
            info: CocoInfo {
                description: "cellport export".into(),
                version: "1.0".into(),
            },
            images: Vec::new(),
            annotations: Vec::new(),
            categories: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CocoInfo {
    #[serde(default)]
    description: String,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoImage {
    id: u64,
    file_name: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoAnnotation {
    id: u64,
    image_id: u64,
    #[serde(default = "default_category")]
    category_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bbox: Option<[f32; 4]>,
    #[serde(default)]
    area: f32,
    #[serde(default)]
    iscrowd: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    score: Option<f32>,
}

fn default_category() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoCategory {
    id: u32,
    name: String,
    #[serde(default)]
    supercategory: String,
}
