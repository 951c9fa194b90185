//! Tests for the Pascal VOC codec.

use super::sample_images;
use crate::format::formats::{PascalVocCodec, VOC_DIR};
use crate::format::traits::{AnnotationCodec, DecodeInput};

#[test]
fn test_voc_codec_metadata() {
    let codec = PascalVocCodec;
    assert_eq!(codec.display_name(), "Pascal VOC (XML)");
    assert!(codec.accepts_entry("Annotations/img.xml"));
    assert!(!codec.accepts_entry("img.txt"));
}

#[test]
fn test_voc_encode_structure() {
    let encoded = PascalVocCodec.encode(&sample_images()).unwrap();
    assert_eq!(encoded.files.len(), 2);
    assert_eq!(encoded.annotations_written, 3);

    let xml = String::from_utf8(encoded.files[&format!("{}/fov_01.xml", VOC_DIR)].clone()).unwrap();
    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains("<filename>fov_01.tif</filename>"));
    assert!(xml.contains("<width>200</width>"));
    assert!(xml.contains("<name>mitotic</name>"));
    assert!(xml.contains("<xmin>20</xmin>"));
    assert!(xml.contains("<xmax>80</xmax>"));
    assert!(xml.contains("<ymax>70</ymax>"));
}

#[test]
fn test_voc_decode_own_output() {
    let encoded = PascalVocCodec.encode(&sample_images()).unwrap();
    let mut input = DecodeInput::new();
    for (path, bytes) in &encoded.files {
        input = input.with_file(path.clone(), String::from_utf8(bytes.clone()).unwrap());
    }

    let result = PascalVocCodec.decode(&input).unwrap();
    assert_eq!(result.crops.len(), 3);
    assert_eq!(result.images_referenced, 2);

    let first = &result.crops[0];
    assert_eq!(first.image_filename, "fov_01.tif");
    assert_eq!((first.bbox_x, first.bbox_y, first.bbox_w, first.bbox_h), (20.0, 40.0, 60.0, 30.0));
    assert_eq!(first.class_name, "cell");
    assert_eq!(first.confidence, None);
}

#[test]
fn test_voc_decode_without_filename_uses_document_stem() {
    let xml = r#"<annotation>
        <object><name>cell</name><bndbox><xmin>0</xmin><ymin>0</ymin><xmax>5</xmax><ymax>5</ymax></bndbox></object>
        <object><name>cell</name><bndbox><xmin>5</xmin><ymin>5</ymin><xmax>5</xmax><ymax>9</ymax></bndbox></object>
    </annotation>"#;
    let input = DecodeInput::new().with_file("voc/plate_3.xml", xml);

    let result = PascalVocCodec.decode(&input).unwrap();
    assert_eq!(result.crops.len(), 1);
    assert_eq!(result.crops[0].image_filename, "plate_3");
    assert_eq!(result.warnings.len(), 1);
}

#[test]
fn test_voc_decode_skips_broken_documents() {
    let input = DecodeInput::new()
        .with_file("a.xml", "<annotation><object></annotation>")
        .with_file("b.xml", "<svg/>");
    let result = PascalVocCodec.decode(&input).unwrap();
    assert!(result.crops.is_empty());
    assert_eq!(result.warnings.len(), 2);
}
