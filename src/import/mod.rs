//! Import side of the migration pipeline.
//!
//! [`ImportValidator`] inspects an upload without writing to the catalog;
//! [`ImportExecutor`] later materializes a validated upload inside one
//! catalog transaction.

mod executor;
mod generic;
mod native;
mod validator;

pub use executor::{ImportExecutor, ImportOutcome};
pub use generic::{IMAGE_EXTENSIONS, ImageEntry, image_dimensions, is_image_filename};
pub use native::IdMap;
pub use validator::{ImportValidation, ImportValidator};
