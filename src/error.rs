//! Service-level error taxonomy.

use thiserror::Error;

use crate::format::FormatError;
use crate::jobs::JobStatus;

/// Errors returned by the export/import services.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Bad options or an ownership mismatch; surfaced to the caller verbatim
    #[error("Validation error: {0}")]
    Validation(String),

    /// An archive or path broke a safety limit; nothing was written
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// Unknown job, experiment or archive entry
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed archive or annotation content
    #[error(transparent)]
    Format(#[from] FormatError),

    /// An import transaction failed and was rolled back
    #[error("Transaction failed: {0}")]
    TransactionFailure(String),

    /// A job was asked to move to a state its lifecycle does not allow
    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The job being updated
        job_id: String,
        /// Status currently stored
        from: JobStatus,
        /// Requested status
        to: JobStatus,
    },

    /// The caller cancelled the running job
    #[error("Job cancelled")]
    Cancelled,

    /// I/O error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive container error
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON error on job records or catalog snapshots
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrationError {
    /// Create a validation error with a message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a security violation with a message.
    pub fn security(message: impl Into<String>) -> Self {
        Self::SecurityViolation(message.into())
    }

    /// Create a not-found error with a message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Short name of the error kind, recorded on failed jobs.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::Validation(_) => "ValidationError",
            MigrationError::SecurityViolation(_) => "SecurityViolation",
            MigrationError::NotFound(_) => "NotFoundError",
            MigrationError::Format(_) => "FormatError",
            MigrationError::TransactionFailure(_) => "TransactionFailure",
            MigrationError::InvalidTransition { .. } => "InvalidTransition",
            MigrationError::Cancelled => "Cancelled",
            MigrationError::Io(_) => "IoError",
            MigrationError::Zip(_) => "ArchiveError",
            MigrationError::Json(_) => "JsonError",
        }
    }
}

/// Render an ID list for diagnostics, keeping at most `limit` entries.
pub fn truncated_ids(ids: &[u64], limit: usize) -> String {
    let shown: Vec<String> = ids.iter().take(limit).map(|id| id.to_string()).collect();
    if ids.len() > limit {
        format!("[{}, ... +{} more]", shown.join(", "), ids.len() - limit)
    } else {
        format!("[{}]", shown.join(", "))
    }
}
