//! Durable key-value storage of job records.
//!
//! Records are stored as JSON under `cellport:job:<id>` with a per-key
//! expiry. Every write is a full overwrite that refreshes the expiry. The
//! store refuses writes that would move a job out of a terminal status, so a
//! reader can never observe a terminal job change again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::{Instant, SystemTime};

use super::{JobRecord, JobStatus};
use crate::error::MigrationError;

const KEY_PREFIX: &str = "cellport:job:";

/// Key-value backend with per-key expiry.
pub trait JobBackend: Send + Sync {
    /// Store `value` under `key`, replacing any previous value and expiry.
    fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), MigrationError>;

    /// Value under `key`, or `None` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<String>, MigrationError>;
}

/// Process-local backend.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobBackend for MemoryBackend {
    fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), MigrationError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| std::io::Error::other("job store lock poisoned"))?;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, MigrationError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| std::io::Error::other("job store lock poisoned"))?;
        let now = Instant::now();
        match entries.get(key) {
            Some((_, expires)) if *expires <= now => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }
}

/// Backend keeping one JSON file per key, shared between processes.
pub struct FileBackend {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct FileEntry {
    /// Seconds since the Unix epoch
    expires_at: u64,
    value: String,
}

impl FileBackend {
    /// Use `dir` for job files, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, MigrationError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl JobBackend for FileBackend {
    fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), MigrationError> {
        let entry = FileEntry {
            expires_at: unix_now().saturating_add(ttl.as_secs()),
            value,
        };
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&entry)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, MigrationError> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: FileEntry = serde_json::from_slice(&bytes)?;
        if entry.expires_at <= unix_now() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::debug!("Could not remove expired job file {:?}: {}", path, e);
            }
            return Ok(None);
        }
        Ok(Some(entry.value))
    }
}

/// Job records over a [`JobBackend`].
#[derive(Clone)]
pub struct JobStore {
    backend: Arc<dyn JobBackend>,
    ttl: Duration,
}

impl JobStore {
    pub fn new(backend: Arc<dyn JobBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// Store backed by process memory.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), ttl)
    }

    fn key(job_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, job_id)
    }

    /// Write the full record, refreshing its expiry.
    ///
    /// Fails with [`MigrationError::InvalidTransition`] when the stored
    /// status does not allow moving to `job.status`.
    pub fn save(&self, job: &JobRecord) -> Result<(), MigrationError> {
        if let Some(current) = self.get(&job.job_id)? {
            if !current.status.can_transition_to(job.status) {
                return Err(MigrationError::InvalidTransition {
                    job_id: job.job_id.clone(),
                    from: current.status,
                    to: job.status,
                });
            }
        }
        let json = serde_json::to_string(job)?;
        self.backend.put(&Self::key(&job.job_id), json, self.ttl)?;
        log::trace!(
            "Saved job {} ({}, {}%)",
            job.job_id,
            job.status,
            job.progress_percent
        );
        Ok(())
    }

    /// Record by ID.
    pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>, MigrationError> {
        match self.backend.get(&Self::key(job_id))? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Record by ID, only if owned by `user_id`.
    pub fn get_for_user(
        &self,
        job_id: &str,
        user_id: u64,
    ) -> Result<Option<JobRecord>, MigrationError> {
        Ok(self.get(job_id)?.filter(|job| job.user_id == user_id))
    }

    /// Record by ID, or `NotFound`.
    pub fn require(&self, job_id: &str) -> Result<JobRecord, MigrationError> {
        self.get(job_id)?
            .ok_or_else(|| MigrationError::not_found(format!("job {}", job_id)))
    }

    /// Update progress fields of a stored job and return the new record.
    pub fn update_progress(
        &self,
        job_id: &str,
        percent: u8,
        step: Option<&str>,
        status: Option<JobStatus>,
    ) -> Result<JobRecord, MigrationError> {
        let mut job = self.require(job_id)?;
        job.progress_percent = percent.min(100);
        if let Some(step) = step {
            job.current_step = step.to_string();
        }
        if let Some(status) = status {
            job.status = status;
        }
        self.save(&job)?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobKind;

    fn store() -> JobStore {
        JobStore::in_memory(Duration::from_secs(60))
    }

    #[test]
    fn test_save_and_get() {
        let store = store();
        let job = JobRecord::new(JobKind::Export, 7);
        store.save(&job).unwrap();

        assert_eq!(store.get(&job.job_id).unwrap(), Some(job.clone()));
        assert!(store.get_for_user(&job.job_id, 7).unwrap().is_some());
        assert!(store.get_for_user(&job.job_id, 8).unwrap().is_none());
        assert!(store.get("unknown").unwrap().is_none());
    }

    #[test]
    fn test_update_progress() {
        let store = store();
        let job = JobRecord::new(JobKind::Export, 1);
        store.save(&job).unwrap();

        let updated = store
            .update_progress(&job.job_id, 150, Some("Writing"), Some(JobStatus::Streaming))
            .unwrap();
        assert_eq!(updated.progress_percent, 100);
        assert_eq!(updated.current_step, "Writing");
        assert_eq!(store.require(&job.job_id).unwrap().status, JobStatus::Streaming);
    }

    #[test]
    fn test_terminal_status_is_final() {
        let store = store();
        let mut job = JobRecord::new(JobKind::Import, 1);
        store.save(&job).unwrap();
        job.status = JobStatus::ValidationFailed;
        store.save(&job).unwrap();

        job.status = JobStatus::Validated;
        assert!(matches!(
            store.save(&job),
            Err(MigrationError::InvalidTransition { .. })
        ));
        assert!(store
            .update_progress(&job.job_id, 50, None, None)
            .is_err());
        assert_eq!(
            store.require(&job.job_id).unwrap().status,
            JobStatus::ValidationFailed
        );
    }

    #[test]
    fn test_expired_entries_vanish() {
        let store = JobStore::in_memory(Duration::ZERO);
        let job = JobRecord::new(JobKind::Export, 1);
        store.save(&job).unwrap();
        assert!(store.get(&job.job_id).unwrap().is_none());
    }

    #[test]
    fn test_file_backend_shared_between_stores() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobRecord::new(JobKind::Import, 2);

        let first = JobStore::new(
            Arc::new(FileBackend::open(dir.path()).unwrap()),
            Duration::from_secs(60),
        );
        first.save(&job).unwrap();

        let second = JobStore::new(
            Arc::new(FileBackend::open(dir.path()).unwrap()),
            Duration::from_secs(60),
        );
        assert_eq!(second.get(&job.job_id).unwrap(), Some(job));
    }
}
