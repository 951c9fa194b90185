//! Unit tests for the bounding-box codecs.
//!
//! These tests check the files each encoder writes, what each decoder
//! accepts and skips, and encode/decode round trips across formats.

mod coco_tests;
mod csv_tests;
mod pascal_voc_tests;
mod roundtrip_tests;
mod yolo_tests;

use crate::format::common::{AnnotatedImage, BoxAnnotation};
use crate::model::BoundingBox;

/// Two images with three boxes, one of them without a class or confidence.
fn sample_images() -> Vec<AnnotatedImage> {
    vec![
        AnnotatedImage::new(10, "fov_01.tif", 200, 100)
            .with_box(
                BoxAnnotation::new(100, BoundingBox::new(20.0, 40.0, 60.0, 30.0))
                    .with_class("cell")
                    .with_confidence(0.9),
            )
            .with_box(
                BoxAnnotation::new(101, BoundingBox::new(100.0, 10.0, 50.0, 50.0))
                    .with_class("mitotic")
                    .with_confidence(0.75),
            ),
        AnnotatedImage::new(11, "fov_02.tif", 400, 300)
            .with_box(BoxAnnotation::new(102, BoundingBox::new(0.0, 0.0, 40.0, 20.0))),
    ]
}
