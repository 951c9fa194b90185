//! Tests for the COCO JSON codec.

use super::sample_images;
use crate::format::formats::{COCO_PATH, CocoCodec};
use crate::format::traits::{AnnotationCodec, DecodeInput};

#[test]
fn test_coco_codec_metadata() {
    let codec = CocoCodec;
    assert_eq!(codec.display_name(), "COCO (JSON)");
    assert_eq!(codec.format().id(), "coco");
}

#[test]
fn test_coco_encode_structure() {
    let encoded = CocoCodec.encode(&sample_images()).unwrap();
    assert_eq!(encoded.files.len(), 1);
    assert_eq!(encoded.annotations_written, 3);

    let json: serde_json::Value = serde_json::from_slice(&encoded.files[COCO_PATH]).unwrap();

    let categories = json["categories"].as_array().unwrap();
    assert_eq!(categories[0]["id"], 1);
    assert_eq!(categories[0]["name"], "cell");
    assert_eq!(categories[1]["name"], "mitotic");

    let images = json["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0]["id"], 10);
    assert_eq!(images[0]["file_name"], "fov_01.tif");
    assert_eq!(images[1]["width"], 400);

    let annotations = json["annotations"].as_array().unwrap();
    assert_eq!(annotations.len(), 3);
    assert_eq!(annotations[0]["id"], 100);
    assert_eq!(annotations[0]["image_id"], 10);
    assert_eq!(annotations[0]["bbox"], serde_json::json!([20.0, 40.0, 60.0, 30.0]));
    assert_eq!(annotations[0]["area"], 1800.0);
    assert_eq!(annotations[1]["category_id"], 2);
    // No confidence, no score field
    assert!(annotations[2].get("score").is_none());
    assert_eq!(annotations[2]["category_id"], 1);
}

#[test]
fn test_coco_decode_own_output() {
    let encoded = CocoCodec.encode(&sample_images()).unwrap();
    let json = String::from_utf8(encoded.files[COCO_PATH].clone()).unwrap();
    let input = DecodeInput::new().with_file(COCO_PATH, json);

    let result = CocoCodec.decode(&input).unwrap();
    assert_eq!(result.crops.len(), 3);
    assert_eq!(result.images_referenced, 2);
    assert!(result.warnings.is_empty());

    let first = &result.crops[0];
    assert_eq!(first.image_filename, "fov_01.tif");
    assert_eq!((first.bbox_x, first.bbox_y, first.bbox_w, first.bbox_h), (20.0, 40.0, 60.0, 30.0));
    assert_eq!(first.confidence, Some(0.9));
    assert_eq!(result.crops[1].class_name, "mitotic");
    assert_eq!(result.crops[2].class_name, "cell");
    assert_eq!(result.crops[2].confidence, None);
}

#[test]
fn test_coco_decode_third_party_file() {
    let json = r#"{
        "images": [{"id": 1, "file_name": "train/a.png", "width": 64, "height": 64}],
        "annotations": [
            {"id": 1, "image_id": 1, "category_id": 7, "bbox": [1, 2, 3, 4], "area": 12, "iscrowd": 0},
            {"id": 2, "image_id": 99, "category_id": 7, "bbox": [1, 2, 3, 4]},
            {"id": 3, "image_id": 1, "category_id": 7, "bbox": [1, 2, 0, 4]},
            {"id": 4, "image_id": 1, "category_id": 7}
        ],
        "categories": [{"id": 7, "name": "nucleus"}]
    }"#;
    let input = DecodeInput::new().with_file("annotations/instances.json", json);

    let result = CocoCodec.decode(&input).unwrap();
    assert_eq!(result.crops.len(), 1);
    assert_eq!(result.crops[0].image_filename, "train/a.png");
    assert_eq!(result.crops[0].class_name, "nucleus");
    // unknown image, empty box, missing bbox
    assert_eq!(result.warnings.len(), 3);
}

#[test]
fn test_coco_decode_unreadable_file_is_an_error() {
    let input = DecodeInput::new().with_file("annotations/coco.json", "{ not json");
    assert!(CocoCodec.decode(&input).is_err());
}

#[test]
fn test_coco_decode_skips_unrelated_json_next_to_annotations() {
    let encoded = CocoCodec.encode(&sample_images()).unwrap();
    let json = String::from_utf8(encoded.files[COCO_PATH].clone()).unwrap();
    let input = DecodeInput::new()
        .with_file(COCO_PATH, json)
        .with_file("settings.json", r#"{"theme": "dark"}"#);

    let result = CocoCodec.decode(&input).unwrap();
    assert_eq!(result.crops.len(), 3);
    assert_eq!(result.warnings.len(), 1);
}
