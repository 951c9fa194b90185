//! Persisted job records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobStatus;
use crate::export::ExportOptions;
use crate::format::ArchiveFormat;

/// Direction of a migration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Export,
    Import,
}

/// Item counts tracked on a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobCounts {
    pub experiment_count: usize,
    pub image_count: usize,
    pub crop_count: usize,
    pub mask_count: usize,
    /// Images created by an import
    pub images_imported: usize,
    /// Crops created by an import
    pub crops_created: usize,
}

/// Outcome of validating an uploaded archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Layout recognized from the entry names
    pub detected_format: Option<ArchiveFormat>,
    /// Whether the archive can be imported
    pub is_valid: bool,
    /// Image files (generic) or manifest image count (native)
    pub image_count: usize,
    /// Boxes parsed (generic) or manifest crop count (native)
    pub annotation_count: usize,
    pub has_embeddings: bool,
    pub has_masks: bool,
    /// Problems that make the archive unusable
    pub errors: Vec<String>,
    /// Entries that were skipped
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Record a fatal problem.
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("Validation error: {}", message);
        self.errors.push(message);
        self.is_valid = false;
    }

    /// Record a skipped entry.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// One export or import attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Opaque unique token
    pub job_id: String,
    pub kind: JobKind,
    /// Requesting user; lookups are scoped to it
    pub user_id: u64,
    pub status: JobStatus,
    /// 0 to 100
    pub progress_percent: u8,
    /// Human-readable description of the running step
    pub current_step: String,
    /// Options of an export job
    #[serde(default)]
    pub export_options: Option<ExportOptions>,
    /// Experiments requested (export) or created (import)
    #[serde(default)]
    pub experiment_ids: Vec<u64>,
    #[serde(default)]
    pub counts: JobCounts,
    /// Estimated archive size of an export
    #[serde(default)]
    pub estimated_bytes: u64,
    /// Validation outcome of an import
    #[serde(default)]
    pub validation: Option<ValidationReport>,
    /// Upload kept between validation and execution
    #[serde(default)]
    pub staged_archive: Option<PathBuf>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A fresh job in `preparing` with a new ID.
    pub fn new(kind: JobKind, user_id: u64) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().simple().to_string(),
            kind,
            user_id,
            status: JobStatus::Preparing,
            progress_percent: 0,
            current_step: "Preparing".to_string(),
            export_options: None,
            experiment_ids: Vec::new(),
            counts: JobCounts::default(),
            estimated_bytes: 0,
            validation: None,
            staged_archive: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Format detected during validation.
    pub fn detected_format(&self) -> Option<ArchiveFormat> {
        self.validation.as_ref().and_then(|v| v.detected_format)
    }

    /// Move to a terminal status, stamping the completion time.
    pub fn finish(&mut self, status: JobStatus, step: impl Into<String>) {
        self.status = status;
        self.current_step = step.into();
        if status == JobStatus::Completed {
            self.progress_percent = 100;
        }
        self.completed_at = Some(Utc::now());
    }

    /// Move to `error` with a diagnostic message.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.finish(JobStatus::Error, "Failed");
    }
}

/// Status returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub current_step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub counts: JobCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobStatusView {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            progress_percent: job.progress_percent,
            current_step: job.current_step.clone(),
            error_message: job.error_message.clone(),
            counts: job.counts,
            completed_at: job.completed_at,
        }
    }
}
