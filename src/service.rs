//! Service facade over the export and import pipelines.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};

use crate::catalog::Catalog;
use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::export::{ExportOptions, ExportPlan, ExportStream, ExportStreamer, prepare_export};
use crate::format::{ArchiveFormat, FormatRegistry};
use crate::import::{ImportExecutor, ImportOutcome, ImportValidation, ImportValidator};
use crate::jobs::{CancelToken, JobKind, JobStatusView, JobStore};
use crate::storage::FileStorage;

/// Export/import entry point. Construct once per process and share it.
pub struct MigrationService {
    catalog: Arc<dyn Catalog>,
    storage: Arc<FileStorage>,
    jobs: JobStore,
    config: Arc<MigrationConfig>,
    registry: FormatRegistry,
    running: Mutex<HashMap<String, CancelToken>>,
}

impl MigrationService {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        storage: Arc<FileStorage>,
        jobs: JobStore,
        config: Arc<MigrationConfig>,
    ) -> Self {
        Self {
            catalog,
            storage,
            jobs,
            config,
            registry: FormatRegistry::new(),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Service with file storage at the configured root and an in-memory
    /// job store.
    pub fn with_config(catalog: Arc<dyn Catalog>, config: MigrationConfig) -> Self {
        let storage = Arc::new(FileStorage::new(config.storage_root.clone()));
        let jobs = JobStore::in_memory(config.job_ttl());
        Self::new(catalog, storage, jobs, Arc::new(config))
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// Check ownership, count items and record an export job.
    pub fn prepare_export(
        &self,
        experiment_ids: &[u64],
        options: ExportOptions,
        user_id: u64,
    ) -> Result<ExportPlan, MigrationError> {
        prepare_export(
            self.catalog.as_ref(),
            &self.jobs,
            &self.config.estimates,
            experiment_ids,
            options,
            user_id,
        )
    }

    /// Build the archive of a prepared export and return it in chunks.
    pub fn generate_export_stream(&self, job_id: &str) -> Result<ExportStream, MigrationError> {
        let cancel = self.register(job_id)?;
        let streamer = ExportStreamer::new(
            self.catalog.as_ref(),
            &self.storage,
            &self.jobs,
            &self.registry,
        );
        let result = streamer.run(job_id, &cancel);
        self.unregister(job_id);
        Ok(ExportStream::new(result?, self.config.limits.chunk_size))
    }

    /// Inspect an uploaded archive and record an import job.
    pub fn validate_import(
        &self,
        archive_bytes: &[u8],
        user_id: u64,
    ) -> Result<ImportValidation, MigrationError> {
        ImportValidator::new(
            &self.jobs,
            &self.registry,
            &self.config.limits,
            &self.config.staging_dir,
        )
        .validate(archive_bytes, user_id)
    }

    /// Materialize a validated import.
    pub fn execute_import(
        &self,
        job_id: &str,
        experiment_name: Option<&str>,
        format: ArchiveFormat,
        create_crops: bool,
        user_id: u64,
    ) -> Result<ImportOutcome, MigrationError> {
        let cancel = self.register(job_id)?;
        let executor = ImportExecutor::new(
            self.catalog.as_ref(),
            &self.storage,
            &self.jobs,
            &self.registry,
            &self.config.limits,
        );
        let result = executor.execute(job_id, experiment_name, format, create_crops, user_id, &cancel);
        self.unregister(job_id);
        result
    }

    /// Progress of an export job owned by `user_id`.
    pub fn export_status(&self, job_id: &str, user_id: u64) -> Result<JobStatusView, MigrationError> {
        self.status(job_id, user_id, JobKind::Export)
    }

    /// Progress of an import job owned by `user_id`.
    pub fn import_status(&self, job_id: &str, user_id: u64) -> Result<JobStatusView, MigrationError> {
        self.status(job_id, user_id, JobKind::Import)
    }

    /// Ask a running job of `user_id` to stop at its next checkpoint.
    ///
    /// Returns `false` when the job exists but is not running.
    pub fn cancel(&self, job_id: &str, user_id: u64) -> Result<bool, MigrationError> {
        if self.jobs.get_for_user(job_id, user_id)?.is_none() {
            return Err(MigrationError::not_found(format!("job {}", job_id)));
        }
        let running = self
            .running
            .lock()
            .map_err(|_| std::io::Error::other("job registry lock poisoned"))?;
        match running.get(job_id) {
            Some(token) => {
                log::info!("Cancellation requested for job {}", job_id);
                token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn status(&self, job_id: &str, user_id: u64, kind: JobKind) -> Result<JobStatusView, MigrationError> {
        self.jobs
            .get_for_user(job_id, user_id)?
            .filter(|job| job.kind == kind)
            .map(|job| JobStatusView::from(&job))
            .ok_or_else(|| MigrationError::not_found(format!("job {}", job_id)))
    }

    /// Claim `job_id` for this call. A job already running elsewhere is
    /// refused so two callers never drive the same job.
    fn register(&self, job_id: &str) -> Result<CancelToken, MigrationError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| std::io::Error::other("job registry lock poisoned"))?;
        match running.entry(job_id.to_string()) {
            Entry::Occupied(_) => Err(MigrationError::validation(format!(
                "job {} is already running",
                job_id
            ))),
            Entry::Vacant(slot) => Ok(slot.insert(CancelToken::new()).clone()),
        }
    }

    fn unregister(&self, job_id: &str) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::jobs::JobStatus;
    use crate::model::{Experiment, ImageRecord};

    fn service(dir: &std::path::Path) -> (MigrationService, u64) {
        let catalog = MemoryCatalog::new();
        let mut txn = catalog.begin().unwrap();
        let exp = txn.create_experiment(Experiment::new(1, "exp")).unwrap();
        txn.create_image(ImageRecord::new(exp, "a.tif", 8, 8)).unwrap();
        txn.commit().unwrap();
        let service = MigrationService::with_config(Arc::new(catalog), MigrationConfig::rooted_at(dir));
        (service, exp)
    }

    #[test]
    fn test_running_job_cannot_be_claimed_twice() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path());

        let token = service.register("job-1").unwrap();
        assert!(matches!(service.register("job-1"), Err(MigrationError::Validation(_))));
        assert!(matches!(
            service.execute_import("job-1", Some("x"), ArchiveFormat::Coco, true, 1),
            Err(MigrationError::Validation(_))
        ));
        // the refused calls leave the original claim in place
        assert!(!token.is_cancelled());
        assert!(service.running.lock().unwrap().contains_key("job-1"));

        service.unregister("job-1");
        assert!(service.register("job-1").is_ok());
    }

    #[test]
    fn test_status_is_scoped_to_owner_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let (service, exp) = service(dir.path());
        let plan = service.prepare_export(&[exp], ExportOptions::default(), 1).unwrap();

        let view = service.export_status(&plan.job_id, 1).unwrap();
        assert_eq!(view.status, JobStatus::Preparing);
        assert!(service.export_status(&plan.job_id, 2).is_err());
        assert!(service.import_status(&plan.job_id, 1).is_err());
    }

    #[test]
    fn test_stream_chunks_reassemble_into_archive() {
        let dir = tempfile::tempdir().unwrap();
        let (service, exp) = service(dir.path());
        let plan = service.prepare_export(&[exp], ExportOptions::default(), 1).unwrap();

        let bytes: Vec<u8> = service
            .generate_export_stream(&plan.job_id)
            .unwrap()
            .flatten()
            .collect();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert!(archive.file_names().any(|n| n == "manifest.json"));
        assert_eq!(
            service.export_status(&plan.job_id, 1).unwrap().status,
            JobStatus::Completed
        );
        assert!(!service.cancel(&plan.job_id, 1).unwrap());
    }

    #[test]
    fn test_unknown_job() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path());
        assert!(matches!(
            service.generate_export_stream("missing"),
            Err(MigrationError::NotFound(_))
        ));
        assert!(matches!(
            service.cancel("missing", 1),
            Err(MigrationError::NotFound(_))
        ));
    }
}
