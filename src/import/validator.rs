//! Validation of uploaded archives.
//!
//! Validation never touches the catalog. It applies the archive safety
//! gates, detects the layout, parses what it can and records the outcome on
//! a new job. Archives that pass are staged on disk until execution.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::layout::{CROP_EMBEDDINGS, FOV_EMBEDDINGS};
use crate::archive::{SafeArchive, layout};
use crate::config::ArchiveLimits;
use crate::error::MigrationError;
use crate::format::{ArchiveFormat, FormatRegistry};
use crate::import::generic::{decode_annotations, scan_images};
use crate::import::native::read_manifest;
use crate::jobs::{JobKind, JobRecord, JobStatus, JobStore, ValidationReport};

/// What `validate_import` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportValidation {
    pub job_id: String,
    #[serde(flatten)]
    pub report: ValidationReport,
}

/// Validates uploads and records import jobs.
pub struct ImportValidator<'a> {
    jobs: &'a JobStore,
    registry: &'a FormatRegistry,
    limits: &'a ArchiveLimits,
    staging_dir: &'a Path,
}

impl<'a> ImportValidator<'a> {
    pub fn new(
        jobs: &'a JobStore,
        registry: &'a FormatRegistry,
        limits: &'a ArchiveLimits,
        staging_dir: &'a Path,
    ) -> Self {
        Self {
            jobs,
            registry,
            limits,
            staging_dir,
        }
    }

    /// Validate an uploaded archive.
    ///
    /// A broken safety gate fails the call with
    /// [`MigrationError::SecurityViolation`] (the job is still recorded as
    /// `validation_failed`). Any other problem is reported in the returned
    /// validation with `is_valid == false`.
    pub fn validate(&self, archive_bytes: &[u8], user_id: u64) -> Result<ImportValidation, MigrationError> {
        let mut job = JobRecord::new(JobKind::Import, user_id);
        job.status = JobStatus::Validating;
        job.current_step = "Validating archive".to_string();
        self.jobs.save(&job)?;
        log::info!(
            "Validating upload of {} bytes for user {} (job {})",
            archive_bytes.len(),
            user_id,
            job.job_id
        );

        let mut report = ValidationReport {
            is_valid: true,
            ..ValidationReport::default()
        };

        if let Err(e) = self.inspect(archive_bytes, &mut report) {
            report.error(e.to_string());
            if matches!(e, MigrationError::SecurityViolation(_)) {
                self.finish(&mut job, report)?;
                return Err(e);
            }
        }

        if report.is_valid {
            match self.stage(&job.job_id, archive_bytes) {
                Ok(path) => job.staged_archive = Some(path),
                Err(e) => report.error(format!("could not stage archive: {}", e)),
            }
        }

        let report = self.finish(&mut job, report)?;
        Ok(ImportValidation {
            job_id: job.job_id,
            report,
        })
    }

    fn inspect(&self, archive_bytes: &[u8], report: &mut ValidationReport) -> Result<(), MigrationError> {
        let mut archive = SafeArchive::open(Cursor::new(archive_bytes), self.limits)?;

        let format = self.registry.detect_format(archive.names()).ok_or_else(|| {
            MigrationError::validation("no manifest or recognizable annotation files in the archive")
        })?;
        report.detected_format = Some(format);
        log::info!("Detected {} archive", format);

        match format.bbox_format() {
            None => {
                let (manifest, warning) = read_manifest(&mut archive)?;
                if let Some(warning) = warning {
                    report.warn(warning);
                }
                for &id in &manifest.experiment_ids {
                    if !archive.contains(&layout::experiment_file(id)) {
                        report.error(format!(
                            "experiment {} is listed in the manifest but missing from the archive",
                            id
                        ));
                    }
                }
                report.image_count = manifest.statistics.image_count;
                report.annotation_count = manifest.statistics.crop_count;
                report.has_embeddings =
                    archive.contains(FOV_EMBEDDINGS) || archive.contains(CROP_EMBEDDINGS);
                report.has_masks = archive.names().any(|name| name.contains("/masks/"));
            }
            Some(bbox_format) => {
                let codec = self.registry.get(bbox_format)?;
                let images = scan_images(&mut archive, &mut report.warnings)?;
                let decoded = decode_annotations(&mut archive, codec, &images)?;

                let unmatched = decoded
                    .crops
                    .iter()
                    .filter(|crop| !images.iter().any(|image| crop.matches_image(&image.file_name)))
                    .count();
                if unmatched > 0 {
                    report.warn(format!(
                        "{} annotations reference images missing from the archive",
                        unmatched
                    ));
                }

                report.image_count = images.len();
                report.annotation_count = decoded.crops.len();
                report.warnings.extend(decoded.warnings);
                if images.is_empty() {
                    report.error("the archive contains no readable images");
                }
            }
        }

        report.warnings.extend(archive.take_warnings());
        Ok(())
    }

    fn stage(&self, job_id: &str, archive_bytes: &[u8]) -> Result<PathBuf, MigrationError> {
        std::fs::create_dir_all(self.staging_dir)?;
        let path = self.staging_dir.join(format!("{}.zip", job_id));
        std::fs::write(&path, archive_bytes)?;
        log::debug!("Staged upload at {:?}", path);
        Ok(path)
    }

    fn finish(&self, job: &mut JobRecord, report: ValidationReport) -> Result<ValidationReport, MigrationError> {
        job.counts.image_count = report.image_count;
        job.counts.crop_count = report.annotation_count;
        if report.is_valid {
            job.status = JobStatus::Validated;
            job.progress_percent = 100;
            job.current_step = "Validated".to_string();
        } else {
            job.error_message = Some(report.errors.join("; "));
            job.finish(JobStatus::ValidationFailed, "Validation failed");
        }
        job.validation = Some(report.clone());
        self.jobs.save(job)?;
        log::info!(
            "Import job {} {}: {} images, {} annotations, {} warnings",
            job.job_id,
            job.status,
            report.image_count,
            report.annotation_count,
            report.warnings.len()
        );
        Ok(report)
    }
}
