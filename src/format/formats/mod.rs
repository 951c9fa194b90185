//! Bounding-box codec implementations.

mod coco;
mod csv;
mod pascal_voc;
mod yolo;

#[cfg(test)]
mod tests;

pub use coco::{COCO_PATH, CocoCodec};
pub use csv::{CSV_HEADER, CSV_PATH, CsvCodec};
pub use pascal_voc::{PascalVocCodec, VOC_DIR};
pub use yolo::{YOLO_DIR, YoloCodec};
