//! Pascal VOC XML codec.
//!
//! One XML document per image under `annotations/voc/`, with `<object>`
//! elements whose `<bndbox>` holds absolute pixel corners.

use std::collections::BTreeSet;
use std::io::Write;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::format::common::{AnnotatedImage, CropImportData, base_name, file_stem};
use crate::format::error::FormatError;
use crate::format::traits::{AnnotationCodec, DecodeInput, DecodeResult, EncodedAnnotations};
use crate::format::BboxFormat;
use crate::model::BoundingBox;

/// Archive directory of VOC documents.
pub const VOC_DIR: &str = "annotations/voc";

/// Pascal VOC XML codec.
///
/// Supports:
/// - Bounding boxes only
/// - Per-image annotation files
/// - Object names and bndbox coordinates
///
/// Does not carry detector confidence.
pub struct PascalVocCodec;

impl AnnotationCodec for PascalVocCodec {
    fn format(&self) -> BboxFormat {
        BboxFormat::Voc
    }

    fn display_name(&self) -> &'static str {
        "Pascal VOC (XML)"
    }

    fn accepts_entry(&self, name: &str) -> bool {
        base_name(name).to_ascii_lowercase().ends_with(".xml")
    }

    fn encode(&self, images: &[AnnotatedImage]) -> Result<EncodedAnnotations, FormatError> {
        let mut result = EncodedAnnotations::new();

        for image in images {
            let path = format!("{}/{}.xml", VOC_DIR, file_stem(&image.file_name));
            if result.files.contains_key(&path) {
                result.warnings.push(format!(
                    "Skipped '{}' in VOC annotations: another image has the same stem",
                    image.file_name
                ));
                continue;
            }

            let xml = build_xml(image)?;
            result.annotations_written += image.boxes.len();
            result.add_file(path, xml);
        }

        log::debug!(
            "Encoded {} VOC documents with {} objects",
            result.files.len(),
            result.annotations_written
        );

        Ok(result)
    }

    fn decode(&self, input: &DecodeInput) -> Result<DecodeResult, FormatError> {
        let mut result = DecodeResult::new();
        let mut referenced = BTreeSet::new();

        for (path, content) in &input.files {
            let document = match parse_xml(content) {
                Ok(document) => document,
                Err(e) => {
                    result.warn(format!("Skipping '{}': {}", path, e));
                    continue;
                }
            };

            // Fall back to the document stem when <filename> is absent
            let image_name = if document.filename.is_empty() {
                file_stem(path).to_string()
            } else {
                document.filename.clone()
            };

            for object in document.objects {
                let bbox = BoundingBox::new(
                    object.xmin,
                    object.ymin,
                    object.xmax - object.xmin,
                    object.ymax - object.ymin,
                );
                if !bbox.is_valid() {
                    result.warn(format!(
                        "{}: object '{}' has an empty bndbox",
                        path, object.name
                    ));
                    continue;
                }
                result
                    .crops
                    .push(CropImportData::new(image_name.clone(), bbox).with_class(object.name));
                referenced.insert(image_name.clone());
            }
        }

        result.images_referenced = referenced.len();
        Ok(result)
    }
}

fn xml_error(e: impl std::fmt::Display) -> FormatError {
    FormatError::Xml(e.to_string())
}

/// Build the XML document for one image.
fn build_xml(image: &AnnotatedImage) -> Result<String, FormatError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("annotation")))
        .map_err(xml_error)?;

    write_text_element(&mut writer, "folder", "images")?;
    write_text_element(&mut writer, "filename", &image.file_name)?;

    writer
        .write_event(Event::Start(BytesStart::new("size")))
        .map_err(xml_error)?;
    write_text_element(&mut writer, "width", &image.width.to_string())?;
    write_text_element(&mut writer, "height", &image.height.to_string())?;
    write_text_element(&mut writer, "depth", "1")?;
    writer
        .write_event(Event::End(BytesEnd::new("size")))
        .map_err(xml_error)?;

    write_text_element(&mut writer, "segmented", "0")?;

    for annotation in &image.boxes {
        let bbox = annotation.bbox;
        writer
            .write_event(Event::Start(BytesStart::new("object")))
            .map_err(xml_error)?;
        write_text_element(&mut writer, "name", annotation.class())?;
        write_text_element(&mut writer, "pose", "Unspecified")?;
        write_text_element(&mut writer, "truncated", "0")?;
        write_text_element(&mut writer, "difficult", "0")?;

        writer
            .write_event(Event::Start(BytesStart::new("bndbox")))
            .map_err(xml_error)?;
        write_text_element(&mut writer, "xmin", &bbox.x.to_string())?;
        write_text_element(&mut writer, "ymin", &bbox.y.to_string())?;
        write_text_element(&mut writer, "xmax", &(bbox.x + bbox.width).to_string())?;
        write_text_element(&mut writer, "ymax", &(bbox.y + bbox.height).to_string())?;
        writer
            .write_event(Event::End(BytesEnd::new("bndbox")))
            .map_err(xml_error)?;

        writer
            .write_event(Event::End(BytesEnd::new("object")))
            .map_err(xml_error)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("annotation")))
        .map_err(xml_error)?;

    String::from_utf8(writer.into_inner())
        .map_err(|_| FormatError::invalid_format("Invalid UTF-8 in XML"))
}

/// Write a simple text element.
fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), FormatError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)?;
    Ok(())
}

#[derive(Debug, Default)]
struct VocDocument {
    filename: String,
    objects: Vec<VocObject>,
}

#[derive(Debug, Default)]
struct VocObject {
    name: String,
    xmin: f32,
    ymin: f32,
    xmax: f32,
    ymax: f32,
}

/// Parse one VOC document.
fn parse_xml(content: &str) -> Result<VocDocument, FormatError> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut document = VocDocument::default();
    let mut saw_root = false;

    let mut current_element = String::new();
    let mut in_object = false;
    let mut in_bndbox = false;
    let mut object = VocObject::default();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "annotation" => saw_root = true,
                    "object" => {
                        in_object = true;
                        object = VocObject::default();
                    }
                    "bndbox" => in_bndbox = true,
                    _ => {}
                }
                current_element = name;
            }
            Event::End(e) => {
                match e.name().as_ref() {
                    b"object" => {
                        document.objects.push(std::mem::take(&mut object));
                        in_object = false;
                    }
                    b"bndbox" => in_bndbox = false,
                    _ => {}
                }
                current_element.clear();
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(xml_error)?.to_string();

                if in_bndbox {
                    let value: f32 = text.trim().parse().map_err(|_| {
                        FormatError::invalid_coordinates(format!(
                            "<{}> is not a number: '{}'",
                            current_element, text
                        ))
                    })?;
                    match current_element.as_str() {
                        "xmin" => object.xmin = value,
                        "ymin" => object.ymin = value,
                        "xmax" => object.xmax = value,
                        "ymax" => object.ymax = value,
                        _ => {}
                    }
                } else if in_object {
                    if current_element == "name" {
                        object.name = text;
                    }
                } else if current_element == "filename" {
                    document.filename = text;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(FormatError::missing_field("annotation"));
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_document() {
        let xml = r#"<annotation>
            <filename>a.png</filename>
            <object><name>cell</name>
                <bndbox><xmin>1.5</xmin><ymin>2</ymin><xmax>11.5</xmax><ymax>22</ymax></bndbox>
            </object>
        </annotation>"#;
        let document = parse_xml(xml).unwrap();
        assert_eq!(document.filename, "a.png");
        assert_eq!(document.objects.len(), 1);
        assert_eq!(document.objects[0].xmin, 1.5);
        assert_eq!(document.objects[0].ymax, 22.0);
    }

    #[test]
    fn test_parse_rejects_non_voc() {
        assert!(parse_xml("<svg></svg>").is_err());
        assert!(parse_xml("<annotation><object><bndbox><xmin>abc</xmin></bndbox></object></annotation>").is_err());
    }
}
