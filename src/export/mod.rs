//! Export side of the migration pipeline.
//!
//! [`prepare_export`] checks ownership, counts items and records a job;
//! [`ExportStreamer`] later turns that job into a finished archive.

mod options;
mod preparer;
mod streamer;

pub use options::ExportOptions;
pub use preparer::{ExportPlan, estimate_bytes, prepare_export};
pub use streamer::{ExportStream, ExportStreamer};
