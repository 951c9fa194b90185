//! cellport - experiment bundle export and import
//!
//! Moves experiments (images, projections, crops, masks and embeddings) out
//! of one catalog and back into another through ZIP archives, either in the
//! native round-trip layout or as COCO, YOLO, Pascal VOC or CSV annotations.
//!
//! Both directions are two-phase jobs tracked in a [`jobs::JobStore`]:
//! - export: [`MigrationService::prepare_export`], then
//!   [`MigrationService::generate_export_stream`]
//! - import: [`MigrationService::validate_import`], then
//!   [`MigrationService::execute_import`]

pub mod archive;
pub mod catalog;
pub mod config;
pub mod error;
pub mod export;
pub mod format;
pub mod import;
pub mod jobs;
pub mod model;
pub mod service;
pub mod storage;

pub use catalog::{Catalog, CatalogTxn, MemoryCatalog};
pub use config::MigrationConfig;
pub use error::MigrationError;
pub use export::{ExportOptions, ExportPlan, ExportStream};
pub use format::{ArchiveFormat, BboxFormat, MaskFormat};
pub use import::{ImportOutcome, ImportValidation};
pub use jobs::{JobStatus, JobStatusView};
pub use service::MigrationService;
pub use storage::FileStorage;
