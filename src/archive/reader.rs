//! Guarded reading of uploaded ZIP archives.
//!
//! [`SafeArchive::open`] takes an inventory of the central directory without
//! decompressing anything and rejects archives that break the configured
//! limits: total uncompressed size, overall compression ratio and entry names
//! that would escape the extraction root. Reads afterwards never return more
//! bytes than an entry declared.

use std::collections::HashMap;
use std::io::{Read, Seek};

use zip::ZipArchive;

use crate::archive::layout::MANIFEST;
use crate::config::ArchiveLimits;
use crate::error::MigrationError;
use crate::format::base_name;

/// One file entry of the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Index in the ZIP central directory
    pub index: usize,
    /// Path relative to the archive root
    pub name: String,
    /// Declared uncompressed size
    pub size: u64,
    /// Declared compressed size
    pub compressed_size: u64,
}

/// Totals gathered while opening an archive.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ArchiveStats {
    /// Number of file entries
    pub entry_count: usize,
    /// Sum of declared uncompressed sizes
    pub uncompressed_bytes: u64,
    /// Sum of declared compressed sizes
    pub compressed_bytes: u64,
}

impl ArchiveStats {
    /// Uncompressed over compressed size.
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            if self.uncompressed_bytes == 0 { 1.0 } else { f64::INFINITY }
        } else {
            self.uncompressed_bytes as f64 / self.compressed_bytes as f64
        }
    }
}

/// A ZIP archive that passed the safety gates.
pub struct SafeArchive<R> {
    archive: ZipArchive<R>,
    entries: Vec<EntryInfo>,
    by_name: HashMap<String, usize>,
    stats: ArchiveStats,
    limits: ArchiveLimits,
    warnings: Vec<String>,
}

impl<R: Read + Seek> SafeArchive<R> {
    /// Open an archive and apply the size and ratio gates.
    ///
    /// Fails with [`MigrationError::Zip`] when the bytes are not a ZIP file
    /// and with [`MigrationError::SecurityViolation`] when a gate trips.
    pub fn open(reader: R, limits: &ArchiveLimits) -> Result<Self, MigrationError> {
        let mut archive = ZipArchive::new(reader)?;
        let mut raw = Vec::with_capacity(archive.len());
        let mut stats = ArchiveStats::default();

        for index in 0..archive.len() {
            let file = archive.by_index_raw(index)?;
            let name = file.name().to_string();

            if file.is_dir() {
                continue;
            }
            if file.enclosed_name().is_none() || !is_safe_entry_name(&name) {
                return Err(MigrationError::security(format!(
                    "archive entry '{}' escapes the extraction root",
                    name
                )));
            }
            if is_ignored_entry(&name) {
                log::trace!("Skipping metadata entry: {}", name);
                continue;
            }

            stats.entry_count += 1;
            stats.uncompressed_bytes = stats.uncompressed_bytes.saturating_add(file.size());
            stats.compressed_bytes = stats.compressed_bytes.saturating_add(file.compressed_size());

            if stats.uncompressed_bytes > limits.max_uncompressed_bytes {
                return Err(MigrationError::security(format!(
                    "archive expands to more than {} bytes",
                    limits.max_uncompressed_bytes
                )));
            }

            raw.push(EntryInfo {
                index,
                name: name.replace('\\', "/"),
                size: file.size(),
                compressed_size: file.compressed_size(),
            });
        }

        let ratio = stats.compression_ratio();
        if ratio > limits.max_compression_ratio {
            return Err(MigrationError::security(format!(
                "compression ratio {:.1} exceeds the limit of {}",
                ratio, limits.max_compression_ratio
            )));
        }

        let root = archive_root(&raw);
        if !root.is_empty() {
            log::debug!("Archive content is rooted at '{}'", root);
        }
        let entries: Vec<EntryInfo> = raw
            .into_iter()
            .filter_map(|entry| {
                let name = entry.name.strip_prefix(root.as_str())?.to_string();
                Some(EntryInfo { name, ..entry })
            })
            .collect();
        let by_name = entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.name.clone(), pos))
            .collect();

        log::info!(
            "Opened archive: {} entries, {} bytes uncompressed (ratio {:.1})",
            stats.entry_count,
            stats.uncompressed_bytes,
            ratio
        );

        Ok(Self {
            archive,
            entries,
            by_name,
            stats,
            limits: limits.clone(),
            warnings: Vec::new(),
        })
    }

    /// File entries, relative to the archive root.
    pub fn entries(&self) -> &[EntryInfo] {
        &self.entries
    }

    /// Entry names, relative to the archive root.
    pub fn names(&self) -> impl Iterator<Item = &str> + Clone {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    /// Totals gathered by the gates.
    pub fn stats(&self) -> ArchiveStats {
        self.stats
    }

    /// Whether an entry exists.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Declared size of an entry.
    pub fn entry_size(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).map(|&pos| self.entries[pos].size)
    }

    /// Warnings collected by [`read_small_text`](Self::read_small_text).
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Take the collected warnings.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Read an entry in full.
    pub fn read_bytes(&mut self, name: &str) -> Result<Vec<u8>, MigrationError> {
        let pos = *self
            .by_name
            .get(name)
            .ok_or_else(|| MigrationError::not_found(format!("archive entry '{}'", name)))?;
        let declared = self.entries[pos].size;

        let file = self.archive.by_index(self.entries[pos].index)?;
        let mut data = Vec::with_capacity(declared.min(64 * 1024 * 1024) as usize);
        file.take(declared.saturating_add(1)).read_to_end(&mut data)?;

        if data.len() as u64 > declared {
            return Err(MigrationError::security(format!(
                "archive entry '{}' is larger than its declared size of {} bytes",
                name, declared
            )));
        }
        Ok(data)
    }

    /// Read an annotation or metadata entry as UTF-8 text.
    ///
    /// Entries above the configured annotation size are skipped with a
    /// warning (returns `Ok(None)`), as are entries that are not valid UTF-8.
    pub fn read_small_text(&mut self, name: &str) -> Result<Option<String>, MigrationError> {
        let size = self
            .entry_size(name)
            .ok_or_else(|| MigrationError::not_found(format!("archive entry '{}'", name)))?;
        if size > self.limits.max_annotation_entry_bytes {
            self.warn(format!(
                "Skipped '{}': {} bytes exceeds the {} byte limit for annotation files",
                name, size, self.limits.max_annotation_entry_bytes
            ));
            return Ok(None);
        }

        let bytes = self.read_bytes(name)?;
        match String::from_utf8(bytes) {
            Ok(text) => Ok(Some(text)),
            Err(_) => {
                self.warn(format!("Skipped '{}': not valid UTF-8", name));
                Ok(None)
            }
        }
    }

    fn warn(&mut self, message: String) {
        log::warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Reject names a lenient extractor could resolve outside the target.
fn is_safe_entry_name(name: &str) -> bool {
    let normalized = name.replace('\\', "/");
    !normalized.starts_with('/')
        && !normalized.contains('\0')
        && !normalized.split('/').any(|part| part == "..")
        && !normalized.chars().nth(1).is_some_and(|c| c == ':')
}

/// OS metadata that never carries content.
fn is_ignored_entry(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("__macosx") || base_name(&lower).starts_with('.')
}

/// Directory prefix (with trailing `/`) holding the shallowest manifest, or
/// empty when the manifest is at the top or absent.
fn archive_root(entries: &[EntryInfo]) -> String {
    entries
        .iter()
        .filter(|entry| base_name(&entry.name) == MANIFEST)
        .map(|entry| &entry.name[..entry.name.len() - MANIFEST.len()])
        .min_by_key(|prefix| prefix.matches('/').count())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    use super::*;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    #[test]
    fn test_open_and_read() {
        let data = noise(2000);
        let bytes = build_zip(&[("a.txt", b"alpha"), ("dir/b.bin", &data)]);
        let mut archive = SafeArchive::open(Cursor::new(bytes), &ArchiveLimits::default()).unwrap();

        assert_eq!(archive.entries().len(), 2);
        assert!(archive.contains("dir/b.bin"));
        assert_eq!(archive.read_bytes("dir/b.bin").unwrap(), data);
        assert_eq!(archive.read_small_text("a.txt").unwrap().as_deref(), Some("alpha"));
        assert!(archive.read_bytes("missing").is_err());
    }

    #[test]
    fn test_compression_bomb_rejected() {
        let zeros = vec![0u8; 1024 * 1024];
        let bytes = build_zip(&[("zeros.bin", &zeros)]);
        let result = SafeArchive::open(Cursor::new(bytes), &ArchiveLimits::default());
        assert!(matches!(result, Err(MigrationError::SecurityViolation(_))));
    }

    #[test]
    fn test_total_size_limit() {
        let data = noise(4096);
        let bytes = build_zip(&[("a.bin", &data), ("b.bin", &data)]);
        let limits = ArchiveLimits {
            max_uncompressed_bytes: 6000,
            ..ArchiveLimits::default()
        };
        let result = SafeArchive::open(Cursor::new(bytes), &limits);
        assert!(matches!(result, Err(MigrationError::SecurityViolation(_))));
    }

    #[test]
    fn test_traversal_names_rejected() {
        let bytes = build_zip(&[("../../etc/passwd", b"root")]);
        let result = SafeArchive::open(Cursor::new(bytes), &ArchiveLimits::default());
        assert!(matches!(result, Err(MigrationError::SecurityViolation(_))));
    }

    #[test]
    fn test_oversized_annotation_skipped_with_warning() {
        let data = noise(3000);
        let bytes = build_zip(&[("annotations/coco.json", &data)]);
        let limits = ArchiveLimits {
            max_annotation_entry_bytes: 1000,
            ..ArchiveLimits::default()
        };
        let mut archive = SafeArchive::open(Cursor::new(bytes), &limits).unwrap();
        assert_eq!(archive.read_small_text("annotations/coco.json").unwrap(), None);
        assert_eq!(archive.warnings().len(), 1);
    }

    #[test]
    fn test_root_prefix_stripped_and_metadata_ignored() {
        let bytes = build_zip(&[
            ("export/manifest.json", b"{}"),
            ("export/experiments/1/experiment.json", b"{}"),
            ("__MACOSX/export/._manifest.json", b"x"),
            ("export/.DS_Store", b"x"),
        ]);
        let archive = SafeArchive::open(Cursor::new(bytes), &ArchiveLimits::default()).unwrap();
        let names: Vec<&str> = archive.names().collect();
        assert_eq!(names, vec!["manifest.json", "experiments/1/experiment.json"]);
    }

    #[test]
    fn test_not_a_zip() {
        let result = SafeArchive::open(Cursor::new(b"plain text".to_vec()), &ArchiveLimits::default());
        assert!(matches!(result, Err(MigrationError::Zip(_))));
    }

    #[test]
    fn test_entry_name_checks() {
        assert!(is_safe_entry_name("a/b/c.txt"));
        assert!(!is_safe_entry_name("/etc/passwd"));
        assert!(!is_safe_entry_name("a/../../b"));
        assert!(!is_safe_entry_name("..\\windows\\system32"));
        assert!(!is_safe_entry_name("C:/x"));
    }
}
