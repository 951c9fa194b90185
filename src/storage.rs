//! Per-user, per-experiment file storage.
//!
//! Files live at `<root>/<user_id>/<experiment_id>/<relative>`. Relative
//! paths usually come from archive entry names, so every join goes through
//! [`resolve_within`], which refuses anything that could land outside the
//! experiment directory.

use std::path::{Component, Path, PathBuf};

use crate::error::MigrationError;

/// Join `relative` onto `base`, rejecting escapes.
///
/// The check is lexical: absolute paths, drive or root prefixes, `..`
/// components, NUL bytes and paths with no file component are all a
/// [`MigrationError::SecurityViolation`]. Backslashes count as separators.
pub fn resolve_within(base: &Path, relative: &str) -> Result<PathBuf, MigrationError> {
    let reject = || MigrationError::security(format!("path '{}' escapes the storage directory", relative));

    if relative.contains('\0') {
        return Err(reject());
    }
    let normalized = relative.replace('\\', "/");
    if normalized.starts_with('/') || normalized.split('/').any(|part| part.contains(':')) {
        return Err(reject());
    }

    let mut resolved = base.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(reject());
            }
        }
    }

    if depth == 0 || !resolved.starts_with(base) {
        return Err(reject());
    }
    Ok(resolved)
}

/// File tree rooted at the configured storage directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<user_id>/<experiment_id>`
    pub fn experiment_dir(&self, user_id: u64, experiment_id: u64) -> PathBuf {
        self.root
            .join(user_id.to_string())
            .join(experiment_id.to_string())
    }

    /// Write a file below an experiment directory and return its path.
    pub fn write(
        &self,
        user_id: u64,
        experiment_id: u64,
        relative: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, MigrationError> {
        let path = resolve_within(&self.experiment_dir(user_id, experiment_id), relative)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        log::trace!("Stored {:?} ({} bytes)", path, bytes.len());
        Ok(path)
    }

    /// Read a stored file.
    pub fn read(&self, path: &Path) -> Result<Vec<u8>, MigrationError> {
        Ok(std::fs::read(path)?)
    }

    /// Best-effort removal of files written by a failed import.
    pub fn remove_files(&self, paths: &[PathBuf]) {
        for path in paths {
            if let Err(e) = std::fs::remove_file(path) {
                log::warn!("Could not remove {:?}: {}", path, e);
            }
        }
    }

    /// Best-effort removal of an experiment directory.
    pub fn remove_experiment_dir(&self, user_id: u64, experiment_id: u64) {
        let dir = self.experiment_dir(user_id, experiment_id);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                log::warn!("Could not remove {:?}: {}", dir, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_within_accepts_nested_paths() {
        let base = Path::new("/data/1/2");
        assert_eq!(
            resolve_within(base, "images/a.tif").unwrap(),
            PathBuf::from("/data/1/2/images/a.tif")
        );
        assert_eq!(
            resolve_within(base, "./images\\b.tif").unwrap(),
            PathBuf::from("/data/1/2/images/b.tif")
        );
    }

    #[test]
    fn test_resolve_within_rejects_escapes() {
        let base = Path::new("/data/1/2");
        for bad in [
            "../../etc/passwd",
            "images/../../x",
            "/etc/passwd",
            "\\windows\\system32",
            "C:/evil",
            "..\\..\\evil",
            "",
            ".",
            "a\0b",
        ] {
            assert!(
                matches!(resolve_within(base, bad), Err(MigrationError::SecurityViolation(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_write_stays_inside_experiment_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        let path = storage.write(4, 9, "images/7/mip.tiff", b"abc").unwrap();
        assert!(path.starts_with(storage.experiment_dir(4, 9)));
        assert_eq!(storage.read(&path).unwrap(), b"abc");

        assert!(storage.write(4, 9, "../../../escape.txt", b"x").is_err());
        assert!(!dir.path().join("escape.txt").exists());

        storage.remove_experiment_dir(4, 9);
        assert!(!storage.experiment_dir(4, 9).exists());
    }
}
