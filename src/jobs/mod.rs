//! Job records, their lifecycle and the store that keeps them between calls.

mod cancel;
mod record;
mod status;
mod store;

pub use cancel::CancelToken;
pub use record::{JobCounts, JobKind, JobRecord, JobStatusView, ValidationReport};
pub use status::JobStatus;
pub use store::{FileBackend, JobBackend, JobStore, MemoryBackend};
