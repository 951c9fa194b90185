//! YOLO TXT codec.
//!
//! One `classes.txt` lists class names (line number = class index) and one
//! `<image-stem>.txt` per image holds `class cx cy w h [confidence]` lines in
//! coordinates normalized to the image size.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::format::common::{
    AnnotatedImage, CropImportData, DEFAULT_CLASS, base_name, bbox_to_yolo, class_list, file_stem,
    yolo_to_bbox,
};
use crate::format::error::FormatError;
use crate::format::traits::{AnnotationCodec, DecodeInput, DecodeResult, EncodedAnnotations};
use crate::format::BboxFormat;

/// Archive directory of YOLO label files.
pub const YOLO_DIR: &str = "annotations/yolo";

const CLASSES_FILE: &str = "classes.txt";

/// YOLO TXT codec.
///
/// Supports:
/// - Bounding boxes only (normalized coordinates)
/// - Per-image label files
/// - `classes.txt` for class names, `cell` always class 0
/// - An optional sixth confidence column
///
/// Images without known dimensions cannot be normalized and are skipped with
/// a warning.
pub struct YoloCodec;

impl AnnotationCodec for YoloCodec {
    fn format(&self) -> BboxFormat {
        BboxFormat::Yolo
    }

    fn display_name(&self) -> &'static str {
        "YOLO (TXT)"
    }

    fn accepts_entry(&self, name: &str) -> bool {
        base_name(name).to_ascii_lowercase().ends_with(".txt")
    }

    fn encode(&self, images: &[AnnotatedImage]) -> Result<EncodedAnnotations, FormatError> {
        let mut result = EncodedAnnotations::new();

        let classes = class_list(images);
        let class_ids: HashMap<&str, usize> = classes
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();

        let mut classes_txt = classes.join("\n");
        classes_txt.push('\n');
        result.add_file(format!("{}/{}", YOLO_DIR, CLASSES_FILE), classes_txt);

        for image in images {
            if image.width == 0 || image.height == 0 {
                result.warnings.push(format!(
                    "Skipped '{}' in YOLO labels: image has no dimensions",
                    image.file_name
                ));
                continue;
            }

            let path = format!("{}/{}.txt", YOLO_DIR, file_stem(&image.file_name));
            if result.files.contains_key(&path) {
                result.warnings.push(format!(
                    "Skipped '{}' in YOLO labels: another image has the same stem",
                    image.file_name
                ));
                continue;
            }

            let mut lines = String::new();
            for annotation in &image.boxes {
                let class_id = class_ids.get(annotation.class()).copied().unwrap_or(0);
                let (cx, cy, w, h) = bbox_to_yolo(&annotation.bbox, image.width, image.height);
                lines.push_str(&format!("{} {:.6} {:.6} {:.6} {:.6}", class_id, cx, cy, w, h));
                if let Some(confidence) = annotation.confidence {
                    lines.push_str(&format!(" {:.6}", confidence));
                }
                lines.push('\n');
                result.annotations_written += 1;
            }

            result.add_file(path, lines);
        }

        log::debug!(
            "Encoded {} YOLO label files with {} boxes",
            result.files.len().saturating_sub(1),
            result.annotations_written
        );

        Ok(result)
    }

    fn decode(&self, input: &DecodeInput) -> Result<DecodeResult, FormatError> {
        let mut result = DecodeResult::new();
        let mut referenced = BTreeSet::new();

        let classes: Vec<String> = input
            .files
            .iter()
            .find(|(path, _)| base_name(path).eq_ignore_ascii_case(CLASSES_FILE))
            .map(|(_, content)| {
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let label_files: BTreeMap<&str, &str> = input
            .files
            .iter()
            .filter(|(path, _)| !base_name(path).eq_ignore_ascii_case(CLASSES_FILE))
            .map(|(path, content)| (path.as_str(), content.as_str()))
            .collect();

        for (path, content) in label_files {
            let stem = file_stem(path);
            let Some((image_name, width, height)) = input.size_for_stem(stem) else {
                result.warn(format!(
                    "Skipping '{}': no image with stem '{}' and known dimensions",
                    path, stem
                ));
                continue;
            };

            for (line_no, line) in content.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                match parse_yolo_line(line) {
                    Some(label) => {
                        let bbox = yolo_to_bbox(label.cx, label.cy, label.w, label.h, width, height);
                        if !bbox.is_valid() {
                            result.warn(format!("{}:{}: empty box", path, line_no + 1));
                            continue;
                        }
                        let class_name = class_name_for(&classes, label.class_id);
                        result.crops.push(
                            CropImportData::new(image_name.clone(), bbox)
                                .with_confidence(label.confidence)
                                .with_class(class_name),
                        );
                        referenced.insert(image_name.clone());
                    }
                    None => {
                        result.warn(format!("{}:{}: malformed YOLO line", path, line_no + 1));
                    }
                }
            }
        }

        result.images_referenced = referenced.len();
        Ok(result)
    }
}

/// One parsed label line.
#[derive(Debug, Clone, Copy, PartialEq)]
struct YoloLabel {
    class_id: usize,
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
    confidence: Option<f32>,
}

/// Parse a single YOLO annotation line.
fn parse_yolo_line(line: &str) -> Option<YoloLabel> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 || parts.len() > 6 {
        return None;
    }

    let confidence = match parts.get(5) {
        Some(value) => Some(value.parse().ok()?),
        None => None,
    };

    Some(YoloLabel {
        class_id: parts[0].parse().ok()?,
        cx: parts[1].parse().ok()?,
        cy: parts[2].parse().ok()?,
        w: parts[3].parse().ok()?,
        h: parts[4].parse().ok()?,
        confidence,
    })
}

/// Class name for an index; index 0 defaults to `cell` without a classes file.
fn class_name_for(classes: &[String], class_id: usize) -> String {
    match classes.get(class_id) {
        Some(name) => name.clone(),
        None if class_id == 0 => DEFAULT_CLASS.to_string(),
        None => format!("class_{}", class_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yolo_line() {
        let label = parse_yolo_line("1 0.5 0.25 0.1 0.2").unwrap();
        assert_eq!(label.class_id, 1);
        assert_eq!(label.cx, 0.5);
        assert_eq!(label.confidence, None);

        let label = parse_yolo_line("0 0.5 0.5 0.1 0.1 0.875").unwrap();
        assert_eq!(label.confidence, Some(0.875));

        assert!(parse_yolo_line("0 0.5 0.5").is_none());
        assert!(parse_yolo_line("x 0.5 0.5 0.1 0.1").is_none());
        assert!(parse_yolo_line("0 0.5 0.5 0.1 0.1 0.9 extra").is_none());
    }

    #[test]
    fn test_class_name_for() {
        let classes = vec!["cell".to_string(), "nucleus".to_string()];
        assert_eq!(class_name_for(&classes, 1), "nucleus");
        assert_eq!(class_name_for(&[], 0), "cell");
        assert_eq!(class_name_for(&classes, 7), "class_7");
    }
}
