//! Tests for the YOLO codec.

use super::sample_images;
use crate::format::common::AnnotatedImage;
use crate::format::formats::{YOLO_DIR, YoloCodec};
use crate::format::traits::{AnnotationCodec, DecodeInput};

fn text(bytes: &[u8]) -> String {
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[test]
fn test_yolo_codec_metadata() {
    let codec = YoloCodec;
    assert_eq!(codec.display_name(), "YOLO (TXT)");
    assert!(codec.accepts_entry("labels/a.TXT"));
    assert!(!codec.accepts_entry("labels/a.json"));
}

#[test]
fn test_yolo_encode_files() {
    let encoded = YoloCodec.encode(&sample_images()).unwrap();

    let classes = text(&encoded.files[&format!("{}/classes.txt", YOLO_DIR)]);
    assert_eq!(classes, "cell\nmitotic\n");

    let labels = text(&encoded.files[&format!("{}/fov_01.txt", YOLO_DIR)]);
    let lines: Vec<&str> = labels.lines().collect();
    assert_eq!(lines.len(), 2);
    // (20 + 30) / 200, (40 + 15) / 100, 60 / 200, 30 / 100
    assert_eq!(lines[0], "0 0.250000 0.550000 0.300000 0.300000 0.900000");
    assert!(lines[1].starts_with("1 "));

    let second = text(&encoded.files[&format!("{}/fov_02.txt", YOLO_DIR)]);
    assert_eq!(second.lines().next().unwrap().split_whitespace().count(), 5);
    assert_eq!(encoded.annotations_written, 3);
}

#[test]
fn test_yolo_encode_skips_images_without_size() {
    let images = vec![AnnotatedImage::new(1, "broken.tif", 0, 0)];
    let encoded = YoloCodec.encode(&images).unwrap();
    assert_eq!(encoded.files.len(), 1);
    assert_eq!(encoded.warnings.len(), 1);
}

#[test]
fn test_yolo_decode_denormalizes() {
    let input = DecodeInput::new()
        .with_file("labels/classes.txt", "cell\nnucleus\n")
        .with_file("labels/img1.txt", "1 0.5 0.5 0.25 0.5 0.8\n0 0.1 0.1 0.2 0.2\n")
        .with_image_size("img1.png", 100, 40);

    let result = YoloCodec.decode(&input).unwrap();
    assert_eq!(result.crops.len(), 2);
    assert_eq!(result.images_referenced, 1);

    let first = &result.crops[0];
    assert_eq!(first.image_filename, "img1.png");
    assert_eq!(first.class_name, "nucleus");
    assert_eq!(first.confidence, Some(0.8));
    assert!((first.bbox_x - 37.5).abs() < 1e-4);
    assert!((first.bbox_y - 10.0).abs() < 1e-4);
    assert!((first.bbox_w - 25.0).abs() < 1e-4);
    assert!((first.bbox_h - 20.0).abs() < 1e-4);

    // Center minus half width is clamped at the image edge
    assert_eq!(result.crops[1].bbox_x, 0.0);
}

#[test]
fn test_yolo_decode_warnings() {
    let input = DecodeInput::new()
        .with_file("labels/img1.txt", "0 0.5 0.5 0.1 0.1\nnot a label\n")
        .with_file("labels/missing.txt", "0 0.5 0.5 0.1 0.1\n")
        .with_image_size("img1.png", 10, 10);

    let result = YoloCodec.decode(&input).unwrap();
    assert_eq!(result.crops.len(), 1);
    assert_eq!(result.crops[0].class_name, "cell");
    // malformed line + label file without a matching image
    assert_eq!(result.warnings.len(), 2);
}
