//! Tests for the CSV codec.

use super::sample_images;
use crate::format::common::{AnnotatedImage, BoxAnnotation};
use crate::format::formats::{CSV_PATH, CsvCodec};
use crate::format::traits::{AnnotationCodec, DecodeInput};
use crate::model::BoundingBox;

#[test]
fn test_csv_encode_rows() {
    let encoded = CsvCodec.encode(&sample_images()).unwrap();
    let csv = String::from_utf8(encoded.files[CSV_PATH].clone()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();

    assert_eq!(
        lines[0],
        "image_filename,bbox_x,bbox_y,bbox_w,bbox_h,confidence,class_name"
    );
    assert_eq!(lines[1], "fov_01.tif,20,40,60,30,0.9,cell");
    assert_eq!(lines[3], "fov_02.tif,0,0,40,20,,cell");
    assert_eq!(lines.len(), 4);
}

#[test]
fn test_csv_roundtrip_with_quoting() {
    let images = vec![AnnotatedImage::new(1, "plate A, well 3.tif", 50, 50).with_box(
        BoxAnnotation::new(1, BoundingBox::new(1.5, 2.5, 10.0, 12.0)).with_class("big \"round\" cell"),
    )];
    let encoded = CsvCodec.encode(&images).unwrap();
    let csv = String::from_utf8(encoded.files[CSV_PATH].clone()).unwrap();

    let result = CsvCodec
        .decode(&DecodeInput::new().with_file(CSV_PATH, csv))
        .unwrap();
    assert_eq!(result.crops.len(), 1);
    assert_eq!(result.crops[0].image_filename, "plate A, well 3.tif");
    assert_eq!(result.crops[0].class_name, "big \"round\" cell");
    assert_eq!(result.crops[0].bbox_x, 1.5);
}

#[test]
fn test_csv_decode_reordered_columns_and_bad_rows() {
    let csv = "class,filename,x,y,w,h\n\
               nucleus,a.png,1,2,3,4\n\
               cell,a.png,1,2,zero,4\n\
               \n\
               ,b.png,0,0,5,5\n";
    let result = CsvCodec
        .decode(&DecodeInput::new().with_file("boxes.csv", csv))
        .unwrap();

    assert_eq!(result.crops.len(), 2);
    assert_eq!(result.crops[0].class_name, "nucleus");
    assert_eq!(result.crops[1].class_name, "cell");
    assert_eq!(result.images_referenced, 2);
    assert_eq!(result.warnings.len(), 1);
}

#[test]
fn test_csv_decode_missing_columns_warns() {
    let result = CsvCodec
        .decode(&DecodeInput::new().with_file("boxes.csv", "name,value\na,1\n"))
        .unwrap();
    assert!(result.crops.is_empty());
    assert_eq!(result.warnings.len(), 1);
}
