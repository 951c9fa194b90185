//! Trait definitions for bounding-box codec implementations.

use std::collections::BTreeMap;

use crate::format::BboxFormat;
use crate::format::common::{AnnotatedImage, CropImportData};
use crate::format::error::FormatError;

/// Strategy converting between annotated images and one annotation format.
///
/// Codecs work on in-memory files keyed by their archive path, so the same
/// implementation serves the export writer and the import validator.
pub trait AnnotationCodec: Send + Sync {
    /// Format tag this codec implements.
    fn format(&self) -> BboxFormat;

    /// Human-readable name for logs and the CLI.
    fn display_name(&self) -> &'static str;

    /// Whether an archive entry (a `/` separated path) is an annotation file
    /// of this format.
    fn accepts_entry(&self, name: &str) -> bool;

    /// Encode images and their boxes into annotation files.
    fn encode(&self, images: &[AnnotatedImage]) -> Result<EncodedAnnotations, FormatError>;

    /// Decode annotation files into normalized crops.
    ///
    /// Entries this codec cannot make sense of are skipped with a warning; an
    /// error means the annotation set as a whole is unusable.
    fn decode(&self, input: &DecodeInput) -> Result<DecodeResult, FormatError>;
}

/// Files produced by an encoder.
#[derive(Debug, Default)]
pub struct EncodedAnnotations {
    /// Archive path to file content
    pub files: BTreeMap<String, Vec<u8>>,

    /// Number of boxes written
    pub annotations_written: usize,

    /// Boxes or images that could not be represented
    pub warnings: Vec<String>,
}

impl EncodedAnnotations {
    /// Create an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file.
    pub fn add_file(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), content.into());
    }
}

/// Annotation files and image sizes handed to a decoder.
#[derive(Debug, Default)]
pub struct DecodeInput {
    /// Archive path to text content, already filtered by `accepts_entry`
    pub files: BTreeMap<String, String>,

    /// Image file name (base name) to `(width, height)`, for formats that
    /// store normalized coordinates
    pub image_sizes: BTreeMap<String, (u32, u32)>,
}

impl DecodeInput {
    /// Create an empty input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an annotation file.
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    /// Record the size of an image.
    pub fn with_image_size(mut self, file_name: impl Into<String>, width: u32, height: u32) -> Self {
        self.image_sizes.insert(file_name.into(), (width, height));
        self
    }

    /// Find the size of the image whose stem matches `stem`.
    pub fn size_for_stem(&self, stem: &str) -> Option<(String, u32, u32)> {
        self.image_sizes
            .iter()
            .find(|(name, _)| crate::format::file_stem(name) == stem)
            .map(|(name, &(w, h))| (name.clone(), w, h))
    }
}

/// Crops recovered by a decoder.
#[derive(Debug, Default)]
pub struct DecodeResult {
    /// Normalized crops
    pub crops: Vec<CropImportData>,

    /// Distinct image names referenced by the annotations
    pub images_referenced: usize,

    /// Entries or rows that were skipped
    pub warnings: Vec<String>,
}

impl DecodeResult {
    /// Create an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a warning and log it.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        self.warnings.push(message);
    }
}
