//! Import of native archives with identifier remapping.
//!
//! Rows are created stage by stage over the whole archive: experiments and
//! images, then crops (resolved through the image map), then image masks,
//! then crop masks (crop map), then embeddings (both maps). A stage only
//! starts once the maps it resolves through are complete.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Read, Seek};
use std::path::PathBuf;

use serde::de::DeserializeOwned;

use crate::archive::layout::{
    self, CROP_EMBEDDINGS, CROP_IDS, FOV_EMBEDDINGS, FOV_IDS, METADATA_FILE, MIP_FILE,
    NativeEntry, SUM_FILE, THUMBNAIL_FILE, parse_native_entry,
};
use crate::archive::{CropDocument, ExperimentDocument, ImageDocument, Manifest, SafeArchive};
use crate::catalog::CatalogTxn;
use crate::error::MigrationError;
use crate::format::{EmbeddingTable, FormatError, decode_mask};
use crate::import::executor::ImportSession;
use crate::model::{Embedding, MaskScope};

/// Model name recorded when a metadata document does not name one.
const UNKNOWN_MODEL: &str = "unknown";

/// Old-to-new identifier map that refuses to map an old ID twice.
#[derive(Debug, Default)]
pub struct IdMap {
    kind: &'static str,
    map: HashMap<u64, u64>,
}

impl IdMap {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            map: HashMap::new(),
        }
    }

    /// Record `old -> new`.
    pub fn insert(&mut self, old: u64, new: u64) -> Result<(), FormatError> {
        if self.map.insert(old, new).is_some() {
            return Err(FormatError::invalid_format(format!(
                "{} id {} appears more than once in the archive",
                self.kind, old
            )));
        }
        Ok(())
    }

    /// New ID for `old`.
    pub fn resolve(&self, old: u64) -> Option<u64> {
        self.map.get(&old).copied()
    }

    /// New ID for `old`, or an error naming the referencing entity.
    pub fn require(&self, old: u64, referenced_by: &str) -> Result<u64, FormatError> {
        self.resolve(old).ok_or_else(|| {
            FormatError::invalid_format(format!(
                "{} references unknown {} {}",
                referenced_by, self.kind, old
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of distinct new IDs.
    pub fn distinct_targets(&self) -> usize {
        self.map.values().collect::<BTreeSet<_>>().len()
    }
}

/// Entries of one experiment subtree.
#[derive(Debug, Default)]
struct Subtree {
    has_document: bool,
    /// image id -> file name -> entry path
    image_files: BTreeMap<u64, BTreeMap<String, String>>,
    crop_files: BTreeMap<u64, BTreeMap<String, String>>,
    fov_masks: BTreeMap<u64, String>,
    crop_masks: BTreeMap<u64, String>,
}

fn group_entries<'a>(names: impl Iterator<Item = &'a str>) -> BTreeMap<u64, Subtree> {
    let mut subtrees: BTreeMap<u64, Subtree> = BTreeMap::new();
    for name in names {
        let Some((experiment_id, entry)) = parse_native_entry(name) else {
            continue;
        };
        let subtree = subtrees.entry(experiment_id).or_default();
        match entry {
            NativeEntry::Experiment => subtree.has_document = true,
            NativeEntry::ImageFile { image_id, file } => {
                subtree
                    .image_files
                    .entry(image_id)
                    .or_default()
                    .insert(file, name.to_string());
            }
            NativeEntry::CropFile { crop_id, file } => {
                subtree
                    .crop_files
                    .entry(crop_id)
                    .or_default()
                    .insert(file, name.to_string());
            }
            NativeEntry::FovMask { image_id } => {
                subtree.fov_masks.insert(image_id, name.to_string());
            }
            NativeEntry::CropMask { crop_id } => {
                subtree.crop_masks.insert(crop_id, name.to_string());
            }
        }
    }
    subtrees
}

fn read_document<T: DeserializeOwned, R: Read + Seek>(
    archive: &mut SafeArchive<R>,
    name: &str,
) -> Result<T, MigrationError> {
    let text = archive
        .read_small_text(name)?
        .ok_or_else(|| FormatError::invalid_format(format!("could not read '{}'", name)))?;
    serde_json::from_str(&text)
        .map_err(|e| FormatError::invalid_format(format!("{}: {}", name, e)).into())
}

/// Read and version-check the manifest.
pub fn read_manifest<R: Read + Seek>(
    archive: &mut SafeArchive<R>,
) -> Result<(Manifest, Option<String>), MigrationError> {
    if !archive.contains(layout::MANIFEST) {
        return Err(FormatError::missing_field(layout::MANIFEST).into());
    }
    let manifest: Manifest = read_document(archive, layout::MANIFEST)?;
    let warning = manifest.check_version()?;
    Ok((manifest, warning))
}

/// Name for a recreated experiment.
fn target_name(requested: Option<&str>, original: &str, experiment_count: usize) -> String {
    match requested.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) if experiment_count == 1 => name.to_string(),
        Some(name) => format!("{} - {}", name, original),
        None => original.to_string(),
    }
}

/// Recreate every experiment of a native archive.
pub(crate) fn import_native<R: Read + Seek>(
    archive: &mut SafeArchive<R>,
    txn: &mut dyn CatalogTxn,
    session: &mut ImportSession<'_>,
    experiment_name: Option<&str>,
) -> Result<(), MigrationError> {
    let (manifest, warning) = read_manifest(archive)?;
    if let Some(warning) = warning {
        log::warn!("{}", warning);
    }

    let mut subtrees = group_entries(archive.names());
    for id in subtrees.keys() {
        if !manifest.experiment_ids.contains(id) {
            log::warn!("Ignoring experiment {} not listed in the manifest", id);
        }
    }

    let mut images = IdMap::new("image");
    let mut crops = IdMap::new("crop");
    let mut image_models: HashMap<u64, String> = HashMap::new();
    let mut crop_models: HashMap<u64, String> = HashMap::new();
    // new image id -> (width, height), new crop id -> bbox extent and image
    let mut image_sizes: HashMap<u64, (u32, u32)> = HashMap::new();
    let mut crop_extents: HashMap<u64, ((u32, u32), u64)> = HashMap::new();
    // (new experiment id, subtree) in manifest order
    let mut created: Vec<(u64, Subtree)> = Vec::new();
    let total = manifest.experiment_ids.len().max(1);

    // Experiments and images
    for (index, &old_experiment) in manifest.experiment_ids.iter().enumerate() {
        let subtree = subtrees.remove(&old_experiment).unwrap_or_default();
        if !subtree.has_document {
            return Err(FormatError::invalid_format(format!(
                "experiment {} is listed in the manifest but has no {}",
                old_experiment,
                layout::EXPERIMENT_FILE
            ))
            .into());
        }

        let document: ExperimentDocument =
            read_document(archive, &layout::experiment_file(old_experiment))?;
        let name = target_name(experiment_name, &document.name, manifest.experiment_ids.len());
        let experiment_id = txn.create_experiment(document.to_experiment(session.user_id(), Some(&name)))?;
        session.summary.experiment_ids.push(experiment_id);
        log::debug!(
            "Experiment {} -> {} '{}' ({} images)",
            old_experiment,
            experiment_id,
            name,
            subtree.image_files.len()
        );

        for (&old_image, files) in &subtree.image_files {
            let metadata = files.get(METADATA_FILE).ok_or_else(|| {
                FormatError::missing_field(layout::image_file(old_experiment, old_image, METADATA_FILE))
            })?;
            let document: ImageDocument = read_document(archive, metadata)?;
            let mut image = document.to_image(experiment_id);
            let image_id = txn.create_image(image.clone())?;
            images.insert(old_image, image_id)?;
            image_sizes.insert(image_id, (image.width, image.height));
            if let Some(model) = document.embedding_model {
                image_models.insert(old_image, model);
            }

            image.id = image_id;
            image.mip_path = copy_file(archive, session, experiment_id, files, "images", image_id, MIP_FILE)?;
            image.sum_path = copy_file(archive, session, experiment_id, files, "images", image_id, SUM_FILE)?;
            image.thumbnail_path =
                copy_file(archive, session, experiment_id, files, "images", image_id, THUMBNAIL_FILE)?;
            txn.update_image(image)?;
            session.summary.images_imported += 1;
        }

        let percent = 10 + 40 * (index + 1) / total;
        session.checkpoint(
            percent as u8,
            &format!("Imported images of experiment {} ({}/{})", old_experiment, index + 1, total),
        )?;
        created.push((experiment_id, subtree));
    }

    // Crops
    for (experiment_id, subtree) in &created {
        for (&old_crop, files) in &subtree.crop_files {
            let metadata = files
                .get(METADATA_FILE)
                .ok_or_else(|| FormatError::missing_field(format!("crop {} {}", old_crop, METADATA_FILE)))?;
            let document: CropDocument = read_document(archive, metadata)?;
            let image_id = images.require(document.image_id, &format!("crop {}", old_crop))?;

            let mut crop = document.to_crop(image_id);
            let crop_id = txn.create_crop(crop.clone())?;
            crops.insert(old_crop, crop_id)?;
            let extent = (crop.bbox.width.ceil() as u32, crop.bbox.height.ceil() as u32);
            crop_extents.insert(crop_id, (extent, image_id));
            if let Some(model) = document.embedding_model {
                crop_models.insert(old_crop, model);
            }

            crop.id = crop_id;
            crop.mip_path = copy_file(archive, session, *experiment_id, files, "crops", crop_id, MIP_FILE)?;
            crop.sum_path = copy_file(archive, session, *experiment_id, files, "crops", crop_id, SUM_FILE)?;
            txn.update_crop(crop)?;
            session.summary.crops_created += 1;
        }
    }
    session.checkpoint(70, "Imported crops")?;

    // Image masks, then crop masks
    for (_, subtree) in &created {
        for (&old_image, entry) in &subtree.fov_masks {
            let image_id = images.require(old_image, &format!("mask '{}'", entry))?;
            let bytes = archive.read_bytes(entry)?;
            let mask = decode_mask(MaskScope::Image(image_id), entry, &bytes)?;
            if let Some(&(width, height)) = image_sizes.get(&image_id) {
                if width > 0 && height > 0 && (mask.width, mask.height) != (width, height) {
                    return Err(FormatError::invalid_format(format!(
                        "mask '{}' is {}x{} but its image is {}x{}",
                        entry, mask.width, mask.height, width, height
                    ))
                    .into());
                }
            }
            txn.create_fov_mask(image_id, mask)?;
            session.summary.masks_created += 1;
        }
    }
    for (_, subtree) in &created {
        for (&old_crop, entry) in &subtree.crop_masks {
            let crop_id = crops.require(old_crop, &format!("mask '{}'", entry))?;
            let bytes = archive.read_bytes(entry)?;
            let mask = decode_mask(MaskScope::Crop(crop_id), entry, &bytes)?;
            if let Some(&((width, height), image_id)) = crop_extents.get(&crop_id) {
                let fits_crop = mask.width <= width.max(1) && mask.height <= height.max(1);
                let fits_image = image_sizes.get(&image_id) == Some(&(mask.width, mask.height));
                if !fits_crop && !fits_image {
                    return Err(FormatError::invalid_format(format!(
                        "mask '{}' is {}x{} but its crop is {}x{}",
                        entry, mask.width, mask.height, width, height
                    ))
                    .into());
                }
            }
            txn.create_crop_mask(crop_id, mask)?;
            session.summary.masks_created += 1;
        }
    }
    session.checkpoint(85, "Imported masks")?;

    // Embeddings
    if let Some(table) = read_embeddings(archive, FOV_EMBEDDINGS, FOV_IDS)? {
        for (old_image, vector) in table.ids.into_iter().zip(table.vectors) {
            let Some(image_id) = images.resolve(old_image) else {
                log::warn!("Embedding row for unknown image {} skipped", old_image);
                continue;
            };
            let model = image_models
                .get(&old_image)
                .map(String::as_str)
                .unwrap_or(UNKNOWN_MODEL);
            txn.set_image_embedding(image_id, Embedding::new(model, vector))?;
            session.summary.embeddings_attached += 1;
        }
    }
    if let Some(table) = read_embeddings(archive, CROP_EMBEDDINGS, CROP_IDS)? {
        for (old_crop, vector) in table.ids.into_iter().zip(table.vectors) {
            let Some(crop_id) = crops.resolve(old_crop) else {
                log::warn!("Embedding row for unknown crop {} skipped", old_crop);
                continue;
            };
            let model = crop_models
                .get(&old_crop)
                .map(String::as_str)
                .unwrap_or(UNKNOWN_MODEL);
            txn.set_crop_embedding(crop_id, Embedding::new(model, vector))?;
            session.summary.embeddings_attached += 1;
        }
    }
    session.checkpoint(95, "Imported embeddings")?;

    debug_assert_eq!(images.distinct_targets(), images.len());
    debug_assert_eq!(crops.distinct_targets(), crops.len());
    log::info!(
        "Native import created {} experiments, {} images, {} crops",
        created.len(),
        images.len(),
        crops.len()
    );
    Ok(())
}

/// Copy one projection file of an image or crop directory into storage.
fn copy_file<R: Read + Seek>(
    archive: &mut SafeArchive<R>,
    session: &mut ImportSession<'_>,
    experiment_id: u64,
    files: &BTreeMap<String, String>,
    kind: &str,
    new_id: u64,
    file: &str,
) -> Result<Option<PathBuf>, MigrationError> {
    let Some(entry) = files.get(file) else {
        return Ok(None);
    };
    let bytes = archive.read_bytes(entry)?;
    let path = session.store_file(experiment_id, &format!("{}/{}/{}", kind, new_id, file), &bytes)?;
    Ok(Some(path))
}

fn read_embeddings<R: Read + Seek>(
    archive: &mut SafeArchive<R>,
    array: &str,
    ids: &str,
) -> Result<Option<EmbeddingTable>, MigrationError> {
    match (archive.contains(array), archive.contains(ids)) {
        (true, true) => {
            let npy = archive.read_bytes(array)?;
            let ids = archive.read_bytes(ids)?;
            Ok(Some(EmbeddingTable::decode(&npy, &ids)?))
        }
        (false, false) => Ok(None),
        _ => Err(FormatError::invalid_format(format!(
            "'{}' and '{}' must be present together",
            array, ids
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_map_rejects_duplicate_old_ids() {
        let mut map = IdMap::new("crop");
        map.insert(5, 100).unwrap();
        map.insert(6, 101).unwrap();
        assert!(map.insert(5, 102).is_err());
        assert_eq!(map.resolve(6), Some(101));
        assert_eq!(map.distinct_targets(), 2);
        assert!(map.require(7, "mask").is_err());
    }

    #[test]
    fn test_group_entries() {
        let names = [
            "manifest.json",
            "experiments/3/experiment.json",
            "experiments/3/images/7/metadata.json",
            "experiments/3/images/7/mip.tiff",
            "experiments/3/crops/9/metadata.json",
            "experiments/3/masks/fov_7.png",
            "experiments/3/masks/crop_9.json",
            "annotations/coco.json",
        ];
        let grouped = group_entries(names.into_iter());
        let subtree = &grouped[&3];
        assert!(subtree.has_document);
        assert_eq!(subtree.image_files[&7].len(), 2);
        assert_eq!(subtree.crop_files[&9]["metadata.json"], "experiments/3/crops/9/metadata.json");
        assert_eq!(subtree.fov_masks[&7], "experiments/3/masks/fov_7.png");
        assert_eq!(subtree.crop_masks[&9], "experiments/3/masks/crop_9.json");
    }

    #[test]
    fn test_target_name() {
        assert_eq!(target_name(Some("Copy"), "Orig", 1), "Copy");
        assert_eq!(target_name(Some("Copy"), "Orig", 2), "Copy - Orig");
        assert_eq!(target_name(Some("  "), "Orig", 1), "Orig");
        assert_eq!(target_name(None, "Orig", 3), "Orig");
    }
}
