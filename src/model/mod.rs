//! Catalog rows moved by export and import.
//!
//! These mirror the relational rows owned by the catalog: experiments own
//! images (fields of view), images own crops, and masks hang off either an
//! image or a crop. Records are created with `id == 0`; the catalog assigns
//! the real identifier when the row is inserted.

mod crop;
mod experiment;
mod image;
mod mask;

pub use crop::{BoundingBox, CropRecord};
pub use experiment::{Experiment, ProteinRef};
pub use image::{Embedding, ImageRecord};
pub use mask::{MaskGeometry, MaskRecord, MaskScope};
