//! Import of COCO, YOLO, VOC and CSV archives.
//!
//! These archives carry plain image files plus one annotation set. Import
//! creates a single experiment, stores each image under the user's storage
//! directory and, when asked, turns every annotation whose filename matches
//! the image into a crop.

use std::collections::HashSet;
use std::io::{Cursor, Read, Seek};

use crate::archive::SafeArchive;
use crate::catalog::CatalogTxn;
use crate::error::MigrationError;
use crate::format::{AnnotationCodec, DecodeInput, DecodeResult, FormatError, base_name};
use crate::import::executor::ImportSession;
use crate::model::{CropRecord, Experiment, ImageRecord};

/// Image file extensions picked up from generic archives.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// An image entry of a generic archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    /// Archive path
    pub entry: String,
    /// Base name, as referenced by annotations
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

/// Whether an entry name has an image extension.
pub fn is_image_filename(name: &str) -> bool {
    let lower = name.to_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{}", ext)))
}

/// Width and height from an image header.
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), FormatError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| FormatError::invalid_format(e.to_string()))?;
    Ok(reader.into_dimensions()?)
}

/// Find image entries and read their dimensions.
///
/// Images that cannot be decoded are left out with a warning. Annotations
/// refer to images by base name, so only the first readable entry (in
/// archive order) with a given base name is kept.
pub fn scan_images<R: Read + Seek>(
    archive: &mut SafeArchive<R>,
    warnings: &mut Vec<String>,
) -> Result<Vec<ImageEntry>, MigrationError> {
    let names: Vec<String> = archive
        .names()
        .filter(|name| is_image_filename(name) && !name.starts_with("annotations/"))
        .map(str::to_string)
        .collect();

    let mut images = Vec::with_capacity(names.len());
    let mut seen = HashSet::new();
    for entry in names {
        let file_name = base_name(&entry).to_string();
        if seen.contains(&file_name) {
            let message = format!("Skipped image '{}': another image has the same file name", entry);
            log::warn!("{}", message);
            warnings.push(message);
            continue;
        }
        let bytes = archive.read_bytes(&entry)?;
        match image_dimensions(&bytes) {
            Ok((width, height)) => {
                seen.insert(file_name.clone());
                images.push(ImageEntry {
                    file_name,
                    entry,
                    width,
                    height,
                });
            }
            Err(e) => {
                let message = format!("Skipped image '{}': {}", entry, e);
                log::warn!("{}", message);
                warnings.push(message);
            }
        }
    }
    log::debug!("Found {} readable images", images.len());
    Ok(images)
}

/// Run a codec over the annotation entries it accepts.
pub fn decode_annotations<R: Read + Seek>(
    archive: &mut SafeArchive<R>,
    codec: &dyn AnnotationCodec,
    images: &[ImageEntry],
) -> Result<DecodeResult, MigrationError> {
    let names: Vec<String> = archive
        .names()
        .filter(|name| codec.accepts_entry(name))
        .map(str::to_string)
        .collect();

    let mut input = DecodeInput::new();
    for name in names {
        if let Some(text) = archive.read_small_text(&name)? {
            input.files.insert(name, text);
        }
    }
    for image in images {
        input
            .image_sizes
            .insert(image.file_name.clone(), (image.width, image.height));
    }

    let mut result = codec.decode(&input)?;
    result.warnings.extend(archive.take_warnings());
    Ok(result)
}

/// Materialize a generic archive into one new experiment.
pub(crate) fn import_generic<R: Read + Seek>(
    archive: &mut SafeArchive<R>,
    txn: &mut dyn CatalogTxn,
    session: &mut ImportSession<'_>,
    codec: &dyn AnnotationCodec,
    experiment_name: &str,
    create_crops: bool,
) -> Result<(), MigrationError> {
    let name = experiment_name.trim();
    if name.is_empty() {
        return Err(MigrationError::validation("an experiment name is required"));
    }

    let mut warnings = Vec::new();
    let images = scan_images(archive, &mut warnings)?;
    let decoded = if create_crops {
        decode_annotations(archive, codec, &images)?
    } else {
        DecodeResult::new()
    };

    let experiment_id = txn.create_experiment(Experiment::new(session.user_id(), name).with_status("imported"))?;
    session.summary.experiment_ids.push(experiment_id);
    log::info!(
        "Importing {} images into new experiment {} '{}' ({})",
        images.len(),
        experiment_id,
        name,
        codec.display_name()
    );

    let mut matched = vec![false; decoded.crops.len()];
    let total = images.len().max(1);

    for (index, image) in images.iter().enumerate() {
        let bytes = archive.read_bytes(&image.entry)?;
        let path = session.store_file(experiment_id, &format!("images/{}", image.entry), &bytes)?;

        let record = ImageRecord::new(experiment_id, image.file_name.clone(), image.width, image.height)
            .with_projections(Some(path), None)
            .with_status("imported");
        let image_id = txn.create_image(record)?;
        session.summary.images_imported += 1;

        for (crop, used) in decoded.crops.iter().zip(matched.iter_mut()) {
            if !crop.matches_image(&image.file_name) {
                continue;
            }
            *used = true;
            let bbox = crop.bbox().clamped_to(image.width, image.height);
            if !bbox.is_valid() {
                log::warn!(
                    "Dropped box outside image '{}' at ({}, {})",
                    image.file_name,
                    crop.bbox_x,
                    crop.bbox_y
                );
                continue;
            }
            let mut record = CropRecord::new(image_id, bbox).with_class(crop.class_name.clone());
            record.detection_confidence = crop.confidence;
            txn.create_crop(record)?;
            session.summary.crops_created += 1;
        }

        let percent = 10 + 85 * (index + 1) / total;
        session.checkpoint(
            percent as u8,
            &format!("Imported image {}/{}", index + 1, images.len()),
        )?;
    }

    let unmatched = matched.iter().filter(|used| !**used).count();
    if unmatched > 0 {
        log::warn!("{} annotations reference images missing from the archive", unmatched);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_filename_filter() {
        assert!(is_image_filename("images/fov_01.TIF"));
        assert!(is_image_filename("a.png"));
        assert!(!is_image_filename("annotations/coco.json"));
        assert!(!is_image_filename("tiff"));
    }

    #[test]
    fn test_image_dimensions_from_png() {
        let image = image::GrayImage::new(7, 3);
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        assert_eq!(image_dimensions(bytes.get_ref()).unwrap(), (7, 3));
        assert!(image_dimensions(b"not an image").is_err());
    }
}
