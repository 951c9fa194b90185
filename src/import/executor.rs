//! Execution of validated imports.
//!
//! All catalog writes of one import go through a single transaction. On any
//! failure the transaction is dropped (rolling everything back), files
//! already copied into storage are removed, and the job ends in `error`.

use std::fs::File;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::archive::SafeArchive;
use crate::catalog::Catalog;
use crate::config::ArchiveLimits;
use crate::error::{MigrationError, truncated_ids};
use crate::format::{ArchiveFormat, FormatRegistry};
use crate::import::generic::import_generic;
use crate::import::native::import_native;
use crate::jobs::{CancelToken, JobKind, JobRecord, JobStatus, JobStore};
use crate::storage::FileStorage;

/// Result of a finished import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub job_id: String,
    pub status: JobStatus,
    /// First created experiment
    pub experiment_id: Option<u64>,
    /// Every created experiment, in creation order
    pub experiment_ids: Vec<u64>,
    pub images_imported: usize,
    pub crops_created: usize,
}

/// What an import created so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ImportSummary {
    pub experiment_ids: Vec<u64>,
    pub images_imported: usize,
    pub crops_created: usize,
    pub masks_created: usize,
    pub embeddings_attached: usize,
}

/// State shared by the generic and native import paths.
pub(crate) struct ImportSession<'s> {
    storage: &'s FileStorage,
    jobs: &'s JobStore,
    cancel: &'s CancelToken,
    job: JobRecord,
    written: Vec<PathBuf>,
    pub summary: ImportSummary,
}

impl<'s> ImportSession<'s> {
    fn new(storage: &'s FileStorage, jobs: &'s JobStore, cancel: &'s CancelToken, job: JobRecord) -> Self {
        Self {
            storage,
            jobs,
            cancel,
            job,
            written: Vec::new(),
            summary: ImportSummary::default(),
        }
    }

    pub fn user_id(&self) -> u64 {
        self.job.user_id
    }

    /// Write a file into the experiment's storage directory, remembering it
    /// for cleanup.
    pub fn store_file(
        &mut self,
        experiment_id: u64,
        relative: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, MigrationError> {
        let path = self
            .storage
            .write(self.job.user_id, experiment_id, relative, bytes)?;
        self.written.push(path.clone());
        Ok(path)
    }

    /// Honor cancellation and publish progress.
    pub fn checkpoint(&mut self, percent: u8, step: &str) -> Result<(), MigrationError> {
        self.cancel.check()?;
        self.job.progress_percent = percent.min(99);
        self.job.current_step = step.to_string();
        self.job.counts.images_imported = self.summary.images_imported;
        self.job.counts.crops_created = self.summary.crops_created;
        self.jobs.save(&self.job)
    }

    /// Undo file writes after a failure.
    fn discard_files(&mut self) {
        if self.written.is_empty() {
            return;
        }
        log::info!("Removing {} files written by the failed import", self.written.len());
        self.storage.remove_files(&self.written);
        for &experiment_id in &self.summary.experiment_ids {
            self.storage.remove_experiment_dir(self.job.user_id, experiment_id);
        }
        self.written.clear();
    }
}

/// Runs the execution phase of import jobs.
pub struct ImportExecutor<'a> {
    catalog: &'a dyn Catalog,
    storage: &'a FileStorage,
    jobs: &'a JobStore,
    registry: &'a FormatRegistry,
    limits: &'a ArchiveLimits,
}

impl<'a> ImportExecutor<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        storage: &'a FileStorage,
        jobs: &'a JobStore,
        registry: &'a FormatRegistry,
        limits: &'a ArchiveLimits,
    ) -> Self {
        Self {
            catalog,
            storage,
            jobs,
            registry,
            limits,
        }
    }

    /// Materialize a validated archive.
    ///
    /// `format` must be the format detected during validation. The
    /// experiment name is required for generic formats and optional for
    /// native archives, which keep their own names when it is absent.
    pub fn execute(
        &self,
        job_id: &str,
        experiment_name: Option<&str>,
        format: ArchiveFormat,
        create_crops: bool,
        user_id: u64,
        cancel: &CancelToken,
    ) -> Result<ImportOutcome, MigrationError> {
        let mut job = self
            .jobs
            .get_for_user(job_id, user_id)?
            .filter(|job| job.kind == JobKind::Import)
            .ok_or_else(|| MigrationError::not_found(format!("import job {}", job_id)))?;

        if job.status != JobStatus::Validated {
            return Err(MigrationError::validation(format!(
                "import job {} is {}, expected validated",
                job_id, job.status
            )));
        }
        if job.detected_format() != Some(format) {
            return Err(MigrationError::validation(format!(
                "confirmed format {} does not match the detected format {}",
                format,
                job.detected_format()
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "none".to_string())
            )));
        }
        if format.bbox_format().is_some() && experiment_name.is_none_or(|name| name.trim().is_empty()) {
            return Err(MigrationError::validation(format!(
                "an experiment name is required to import {} archives",
                format
            )));
        }
        let staged = job
            .staged_archive
            .clone()
            .ok_or_else(|| MigrationError::not_found(format!("staged archive of job {}", job_id)))?;

        job.status = JobStatus::Importing;
        job.progress_percent = 5;
        job.current_step = "Importing".to_string();
        self.jobs.save(&job)?;
        log::info!("Executing import job {} ({}) for user {}", job_id, format, user_id);

        let mut session = ImportSession::new(self.storage, self.jobs, cancel, job);
        let result = self.run(&staged, format, experiment_name, create_crops, &mut session);

        let ImportSession {
            mut job,
            summary,
            ..
        } = match result {
            Ok(()) => session,
            Err(e) => {
                session.discard_files();
                remove_staged(&staged);
                return Err(self.record_failure(session.job, &session.summary, e));
            }
        };

        remove_staged(&staged);
        job.staged_archive = None;
        job.experiment_ids = summary.experiment_ids.clone();
        job.counts.experiment_count = summary.experiment_ids.len();
        job.counts.images_imported = summary.images_imported;
        job.counts.crops_created = summary.crops_created;
        job.counts.mask_count = summary.masks_created;
        job.finish(JobStatus::Completed, "Completed");
        self.jobs.save(&job)?;

        log::info!(
            "Import job {} completed: experiments {}, {} images, {} crops, {} masks, {} embeddings",
            job.job_id,
            truncated_ids(&summary.experiment_ids, 20),
            summary.images_imported,
            summary.crops_created,
            summary.masks_created,
            summary.embeddings_attached
        );

        Ok(ImportOutcome {
            job_id: job.job_id,
            status: JobStatus::Completed,
            experiment_id: summary.experiment_ids.first().copied(),
            experiment_ids: summary.experiment_ids,
            images_imported: summary.images_imported,
            crops_created: summary.crops_created,
        })
    }

    fn run(
        &self,
        staged: &std::path::Path,
        format: ArchiveFormat,
        experiment_name: Option<&str>,
        create_crops: bool,
        session: &mut ImportSession<'_>,
    ) -> Result<(), MigrationError> {
        let file = File::open(staged)?;
        let mut archive = SafeArchive::open(file, self.limits)?;
        let mut txn = self.catalog.begin()?;

        match format.bbox_format() {
            None => import_native(&mut archive, &mut *txn, session, experiment_name)?,
            Some(bbox_format) => {
                let codec = self.registry.get(bbox_format)?;
                import_generic(
                    &mut archive,
                    &mut *txn,
                    session,
                    codec,
                    experiment_name.unwrap_or_default(),
                    create_crops,
                )?;
            }
        }

        session.cancel.check()?;
        txn.commit()
    }

    fn record_failure(&self, mut job: JobRecord, summary: &ImportSummary, error: MigrationError) -> MigrationError {
        let message = match &error {
            MigrationError::Cancelled => "cancelled".to_string(),
            other => format!(
                "{}: {} (experiments: {})",
                other.kind(),
                other,
                truncated_ids(&summary.experiment_ids, 20)
            ),
        };
        log::error!("Import job {} rolled back: {}", job.job_id, message);

        job.staged_archive = None;
        job.fail(message.clone());
        if let Err(save_error) = self.jobs.save(&job) {
            log::error!("Could not record failure of job {}: {}", job.job_id, save_error);
        }

        match error {
            MigrationError::Cancelled => MigrationError::Cancelled,
            _ => MigrationError::TransactionFailure(message),
        }
    }
}

fn remove_staged(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path) {
        log::debug!("Could not remove staged archive {:?}: {}", path, e);
    }
}
