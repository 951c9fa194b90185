//! In-memory ZIP archive builder.
//!
//! The ZIP central directory can only be written once every entry is in
//! place, so the archive is assembled in a buffer and handed out whole by
//! [`ArchiveWriter::finish`].

use std::io::{Cursor, Write};

use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::MigrationError;

/// Builds a ZIP archive in memory.
pub struct ArchiveWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    entries: usize,
    uncompressed_bytes: u64,
}

impl ArchiveWriter {
    /// Start an empty archive.
    pub fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            entries: 0,
            uncompressed_bytes: 0,
        }
    }

    /// Add a file entry.
    pub fn add(&mut self, path: &str, data: &[u8]) -> Result<(), MigrationError> {
        let method = if is_precompressed(path) {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        let options = SimpleFileOptions::default()
            .compression_method(method)
            .large_file(data.len() as u64 >= u32::MAX as u64);

        self.zip.start_file(path, options)?;
        self.zip.write_all(data)?;

        self.entries += 1;
        self.uncompressed_bytes += data.len() as u64;
        log::trace!("Archived '{}' ({} bytes)", path, data.len());
        Ok(())
    }

    /// Add a pretty-printed JSON document.
    pub fn add_json<T: Serialize>(&mut self, path: &str, value: &T) -> Result<(), MigrationError> {
        let json = serde_json::to_vec_pretty(value)?;
        self.add(path, &json)
    }

    /// Number of entries written so far.
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Total size of the entries before compression.
    pub fn uncompressed_bytes(&self) -> u64 {
        self.uncompressed_bytes
    }

    /// Write the central directory and return the archive bytes.
    pub fn finish(self) -> Result<Vec<u8>, MigrationError> {
        let Self {
            zip,
            entries,
            uncompressed_bytes,
        } = self;
        let bytes = zip.finish()?.into_inner();
        log::info!(
            "Finished archive: {} entries, {} bytes ({} uncompressed)",
            entries,
            bytes.len(),
            uncompressed_bytes
        );
        Ok(bytes)
    }
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats that deflate cannot shrink further.
fn is_precompressed(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    [".png", ".jpg", ".jpeg", ".zip", ".gz"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}
