//! Native archive container: entry layout, manifest documents, and guarded
//! ZIP writing and reading.

pub mod layout;
mod manifest;
mod reader;
mod writer;

pub use manifest::{CropDocument, ExperimentDocument, ExportStatistics, ImageDocument, Manifest};
pub use reader::{ArchiveStats, EntryInfo, SafeArchive};
pub use writer::ArchiveWriter;
