//! Encode/decode round trips through every bounding-box codec.

use super::sample_images;
use crate::format::common::CropImportData;
use crate::format::registry::FormatRegistry;
use crate::format::traits::DecodeInput;
use crate::format::BboxFormat;

/// Encode the sample through `format` and decode the files back.
fn roundtrip(format: BboxFormat) -> Vec<CropImportData> {
    let registry = FormatRegistry::new();
    let codec = registry.get(format).unwrap();
    let images = sample_images();

    let encoded = codec.encode(&images).unwrap();
    let mut input = DecodeInput::new();
    for (path, bytes) in &encoded.files {
        assert!(codec.accepts_entry(path), "{} should accept {}", format, path);
        input = input.with_file(path.clone(), String::from_utf8(bytes.clone()).unwrap());
    }
    for image in &images {
        input = input.with_image_size(image.file_name.clone(), image.width, image.height);
    }

    let result = codec.decode(&input).unwrap();
    assert!(result.warnings.is_empty(), "{}: {:?}", format, result.warnings);
    result.crops
}

#[test]
fn test_boxes_and_classes_survive_every_format() {
    for format in BboxFormat::ALL {
        let crops = roundtrip(format);
        assert_eq!(crops.len(), 3, "{}", format);

        let mut boxes: Vec<(String, [f32; 4], String)> = crops
            .iter()
            .map(|c| {
                (
                    c.image_filename.clone(),
                    [c.bbox_x, c.bbox_y, c.bbox_w, c.bbox_h],
                    c.class_name.clone(),
                )
            })
            .collect();
        boxes.sort_by(|a, b| a.0.cmp(&b.0).then(a.1[0].total_cmp(&b.1[0])));

        assert_eq!(boxes[0].0, "fov_01.tif", "{}", format);
        assert_eq!(boxes[0].2, "cell", "{}", format);
        assert_eq!(boxes[1].2, "mitotic", "{}", format);
        assert_eq!(boxes[2].0, "fov_02.tif", "{}", format);

        let expected = [20.0, 40.0, 60.0, 30.0];
        for (got, want) in boxes[0].1.iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "{}: {:?}", format, boxes[0].1);
        }
    }
}

#[test]
fn test_confidence_survives_formats_that_carry_it() {
    for format in [BboxFormat::Coco, BboxFormat::Yolo, BboxFormat::Csv] {
        let crops = roundtrip(format);
        let confidences: Vec<Option<f32>> = crops.iter().map(|c| c.confidence).collect();
        assert!(confidences.contains(&Some(0.9)), "{}: {:?}", format, confidences);
        assert!(confidences.contains(&None), "{}: {:?}", format, confidences);
    }

    let voc = roundtrip(BboxFormat::Voc);
    assert!(voc.iter().all(|c| c.confidence.is_none()));
}

#[test]
fn test_detection_recognizes_encoded_output() {
    let registry = FormatRegistry::new();
    let images = sample_images();

    for format in BboxFormat::ALL {
        let encoded = registry.get(format).unwrap().encode(&images).unwrap();
        let mut names: Vec<&str> = encoded.files.keys().map(String::as_str).collect();
        names.push("images/fov_01.tif");
        assert_eq!(
            registry.detect_format(names.iter().copied()),
            Some(format.into()),
            "{}",
            format
        );
    }
}
