//! Format registry for looking up codecs and detecting archive layouts.

use std::collections::HashMap;

use crate::format::common::base_name;
use crate::format::error::FormatError;
use crate::format::formats::{CocoCodec, CsvCodec, PascalVocCodec, YoloCodec};
use crate::format::traits::AnnotationCodec;
use crate::format::{ArchiveFormat, BboxFormat};

/// Name of the native archive manifest.
const MANIFEST_NAME: &str = "manifest.json";

/// Registry of the bounding-box codecs.
///
/// All built-in codecs are registered on creation.
pub struct FormatRegistry {
    codecs: HashMap<BboxFormat, Box<dyn AnnotationCodec>>,
}

impl FormatRegistry {
    /// Create a new registry with all built-in codecs registered.
    pub fn new() -> Self {
        let mut registry = Self {
            codecs: HashMap::new(),
        };

        registry.register(Box::new(CocoCodec));
        registry.register(Box::new(YoloCodec));
        registry.register(Box::new(PascalVocCodec));
        registry.register(Box::new(CsvCodec));

        registry
    }

    /// Register a codec, replacing any codec for the same format.
    pub fn register(&mut self, codec: Box<dyn AnnotationCodec>) {
        self.codecs.insert(codec.format(), codec);
    }

    /// Get the codec for a format.
    pub fn get(&self, format: BboxFormat) -> Result<&dyn AnnotationCodec, FormatError> {
        self.codecs
            .get(&format)
            .map(|c| c.as_ref())
            .ok_or_else(|| FormatError::invalid_format(format!("no codec registered for {}", format)))
    }

    /// Detect the layout of an archive from its entry names.
    ///
    /// A `manifest.json` anywhere means a native archive. Otherwise the first
    /// format (COCO, VOC, YOLO, CSV) with a matching annotation entry wins.
    pub fn detect_format<'a>(
        &self,
        entry_names: impl IntoIterator<Item = &'a str> + Clone,
    ) -> Option<ArchiveFormat> {
        if entry_names
            .clone()
            .into_iter()
            .any(|name| base_name(name) == MANIFEST_NAME)
        {
            return Some(ArchiveFormat::Native);
        }

        BboxFormat::ALL
            .iter()
            .filter_map(|format| self.codecs.get(format))
            .find(|codec| {
                entry_names
                    .clone()
                    .into_iter()
                    .any(|name| codec.accepts_entry(name))
            })
            .map(|codec| ArchiveFormat::from(codec.format()))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_codecs() {
        let registry = FormatRegistry::new();
        for format in BboxFormat::ALL {
            assert_eq!(registry.get(format).unwrap().format(), format);
        }
    }

    #[test]
    fn test_detect_native_anywhere() {
        let registry = FormatRegistry::new();
        let names = ["export/manifest.json", "export/annotations/coco.json"];
        assert_eq!(
            registry.detect_format(names.iter().copied()),
            Some(ArchiveFormat::Native)
        );
    }

    #[test]
    fn test_detect_by_priority() {
        let registry = FormatRegistry::new();

        let coco = ["images/a.png", "annotations/instances.json", "notes.txt"];
        assert_eq!(registry.detect_format(coco.iter().copied()), Some(ArchiveFormat::Coco));

        let voc = ["images/a.png", "Annotations/a.xml", "labels.csv"];
        assert_eq!(registry.detect_format(voc.iter().copied()), Some(ArchiveFormat::Voc));

        let yolo = ["images/a.png", "labels/a.txt", "classes.txt"];
        assert_eq!(registry.detect_format(yolo.iter().copied()), Some(ArchiveFormat::Yolo));

        let csv = ["images/a.png", "boxes.csv"];
        assert_eq!(registry.detect_format(csv.iter().copied()), Some(ArchiveFormat::Csv));

        let none = ["images/a.png"];
        assert_eq!(registry.detect_format(none.iter().copied()), None);
    }
}
