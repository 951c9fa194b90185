//! CSV codec.
//!
//! A single `annotations/annotations.csv` with one row per crop:
//!
//! ```text
//! image_filename,bbox_x,bbox_y,bbox_w,bbox_h,confidence,class_name
//! fov_01.tif,12.5,40,32,32,0.91,cell
//! ```
//!
//! Fields are quoted when they contain a comma, quote or line break. The
//! reader looks columns up by header name, so extra columns and a different
//! column order are accepted.

use std::collections::{BTreeSet, HashMap};

use crate::format::common::{AnnotatedImage, CropImportData, base_name};
use crate::format::error::FormatError;
use crate::format::traits::{AnnotationCodec, DecodeInput, DecodeResult, EncodedAnnotations};
use crate::format::BboxFormat;
use crate::model::BoundingBox;

/// Archive path of the CSV file.
pub const CSV_PATH: &str = "annotations/annotations.csv";

/// Column order written by the encoder.
pub const CSV_HEADER: [&str; 7] = [
    "image_filename",
    "bbox_x",
    "bbox_y",
    "bbox_w",
    "bbox_h",
    "confidence",
    "class_name",
];

/// CSV codec.
pub struct CsvCodec;

impl AnnotationCodec for CsvCodec {
    fn format(&self) -> BboxFormat {
        BboxFormat::Csv
    }

    fn display_name(&self) -> &'static str {
        "CSV"
    }

    fn accepts_entry(&self, name: &str) -> bool {
        base_name(name).to_ascii_lowercase().ends_with(".csv")
    }

    fn encode(&self, images: &[AnnotatedImage]) -> Result<EncodedAnnotations, FormatError> {
        let mut result = EncodedAnnotations::new();
        let mut out = CSV_HEADER.join(",");
        out.push('\n');

        for image in images {
            for annotation in &image.boxes {
                let bbox = annotation.bbox;
                let confidence = annotation
                    .confidence
                    .map(|c| c.to_string())
                    .unwrap_or_default();
                let row = [
                    quote(&image.file_name),
                    bbox.x.to_string(),
                    bbox.y.to_string(),
                    bbox.width.to_string(),
                    bbox.height.to_string(),
                    confidence,
                    quote(annotation.class()),
                ];
                out.push_str(&row.join(","));
                out.push('\n');
                result.annotations_written += 1;
            }
        }

        result.add_file(CSV_PATH, out);
        Ok(result)
    }

    fn decode(&self, input: &DecodeInput) -> Result<DecodeResult, FormatError> {
        let mut result = DecodeResult::new();
        let mut referenced = BTreeSet::new();

        for (path, content) in &input.files {
            let records = parse_records(content)?;
            let mut rows = records.into_iter().enumerate();

            let Some((_, header)) = rows.next() else {
                result.warn(format!("Skipping '{}': empty file", path));
                continue;
            };
            let columns = match Columns::from_header(&header) {
                Ok(columns) => columns,
                Err(e) => {
                    result.warn(format!("Skipping '{}': {}", path, e));
                    continue;
                }
            };

            for (idx, row) in rows {
                if row.iter().all(|field| field.trim().is_empty()) {
                    continue;
                }
                match columns.parse_row(&row) {
                    Ok(crop) => {
                        referenced.insert(crop.image_filename.clone());
                        result.crops.push(crop);
                    }
                    Err(e) => result.warn(format!("{}:{}: {}", path, idx + 1, e)),
                }
            }
        }

        result.images_referenced = referenced.len();
        Ok(result)
    }
}

/// Header positions of the columns the reader needs.
struct Columns {
    image: usize,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    confidence: Option<usize>,
    class_name: Option<usize>,
}

impl Columns {
    fn from_header(header: &[String]) -> Result<Self, FormatError> {
        let index: HashMap<String, usize> = header
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim().to_ascii_lowercase(), idx))
            .collect();
        let find = |names: &[&str]| names.iter().find_map(|name| index.get(*name).copied());
        let require = |names: &[&str]| {
            find(names).ok_or_else(|| FormatError::missing_field(names[0].to_string()))
        };

        Ok(Self {
            image: require(&["image_filename", "filename", "image", "file_name"])?,
            x: require(&["bbox_x", "x"])?,
            y: require(&["bbox_y", "y"])?,
            w: require(&["bbox_w", "w", "width"])?,
            h: require(&["bbox_h", "h", "height"])?,
            confidence: find(&["confidence", "score"]),
            class_name: find(&["class_name", "class", "label"]),
        })
    }

    fn parse_row(&self, row: &[String]) -> Result<CropImportData, FormatError> {
        let field = |idx: usize| row.get(idx).map(|s| s.trim()).unwrap_or("");
        let number = |idx: usize, name: &str| -> Result<f32, FormatError> {
            field(idx).parse::<f32>().map_err(|_| {
                FormatError::invalid_coordinates(format!("{} is not a number: '{}'", name, field(idx)))
            })
        };

        let image = field(self.image);
        if image.is_empty() {
            return Err(FormatError::missing_field("image_filename"));
        }

        let bbox = BoundingBox::new(
            number(self.x, "bbox_x")?,
            number(self.y, "bbox_y")?,
            number(self.w, "bbox_w")?,
            number(self.h, "bbox_h")?,
        );
        if !bbox.is_valid() {
            return Err(FormatError::invalid_coordinates("box has no area"));
        }

        let confidence = match self.confidence.map(field) {
            Some(value) if !value.is_empty() => Some(value.parse::<f32>().map_err(|_| {
                FormatError::invalid_format(format!("confidence is not a number: '{}'", value))
            })?),
            _ => None,
        };
        let class_name = self.class_name.map(field).unwrap_or("");

        Ok(CropImportData::new(image, bbox)
            .with_confidence(confidence)
            .with_class(class_name))
    }
}

/// Quote a field when needed.
fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split CSV text into records, honoring quoted fields.
fn parse_records(content: &str) -> Result<Vec<Vec<String>>, FormatError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(FormatError::invalid_format("unterminated quoted CSV field"));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("a,b"), "\"a,b\"");
        assert_eq!(quote("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_parse_records_with_quotes() {
        let records = parse_records("a,b\r\n\"x, y\",\"q\"\"z\"\n\"multi\nline\",2").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], vec!["x, y", "q\"z"]);
        assert_eq!(records[2], vec!["multi\nline", "2"]);
    }

    #[test]
    fn test_parse_records_unterminated_quote() {
        assert!(parse_records("a,\"b\n").is_err());
    }

    #[test]
    fn test_header_aliases() {
        let header: Vec<String> = ["Filename", "x", "y", "width", "height", "score", "label"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let columns = Columns::from_header(&header).unwrap();
        assert_eq!(columns.image, 0);
        assert_eq!(columns.confidence, Some(5));
        assert_eq!(columns.class_name, Some(6));

        let missing: Vec<String> = vec!["image_filename".into(), "bbox_x".into()];
        assert!(Columns::from_header(&missing).is_err());
    }
}
