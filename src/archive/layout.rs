//! Entry paths of the native archive layout.
//!
//! ```text
//! manifest.json
//! experiments/<id>/experiment.json
//! experiments/<id>/images/<id>/{mip.tiff, sum.tiff, thumbnail.png, metadata.json}
//! experiments/<id>/crops/<id>/{mip.tiff, sum.tiff, metadata.json}
//! experiments/<id>/masks/fov_<id>.{png|json}
//! experiments/<id>/masks/crop_<id>.{png|json}
//! annotations/...
//! embeddings/{fov,crop}_embeddings.npy
//! embeddings/{fov,crop}_ids.json
//! ```

/// Version written to new manifests.
pub const FORMAT_VERSION: &str = "1.0";

/// Archive root manifest.
pub const MANIFEST: &str = "manifest.json";
/// Per-experiment document.
pub const EXPERIMENT_FILE: &str = "experiment.json";
/// Per-image and per-crop document.
pub const METADATA_FILE: &str = "metadata.json";
/// Maximum-intensity projection.
pub const MIP_FILE: &str = "mip.tiff";
/// Sum projection.
pub const SUM_FILE: &str = "sum.tiff";
/// Image thumbnail.
pub const THUMBNAIL_FILE: &str = "thumbnail.png";

/// Image embedding array.
pub const FOV_EMBEDDINGS: &str = "embeddings/fov_embeddings.npy";
/// Row IDs of the image embedding array.
pub const FOV_IDS: &str = "embeddings/fov_ids.json";
/// Crop embedding array.
pub const CROP_EMBEDDINGS: &str = "embeddings/crop_embeddings.npy";
/// Row IDs of the crop embedding array.
pub const CROP_IDS: &str = "embeddings/crop_ids.json";

/// `experiments/<id>`
pub fn experiment_dir(experiment_id: u64) -> String {
    format!("experiments/{}", experiment_id)
}

/// `experiments/<id>/experiment.json`
pub fn experiment_file(experiment_id: u64) -> String {
    format!("{}/{}", experiment_dir(experiment_id), EXPERIMENT_FILE)
}

/// `experiments/<id>/images/<image>/<file>`
pub fn image_file(experiment_id: u64, image_id: u64, file: &str) -> String {
    format!("{}/images/{}/{}", experiment_dir(experiment_id), image_id, file)
}

/// `experiments/<id>/crops/<crop>/<file>`
pub fn crop_file(experiment_id: u64, crop_id: u64, file: &str) -> String {
    format!("{}/crops/{}/{}", experiment_dir(experiment_id), crop_id, file)
}

/// `experiments/<id>/masks/fov_<image>.<ext>`
pub fn fov_mask_file(experiment_id: u64, image_id: u64, extension: &str) -> String {
    format!(
        "{}/masks/fov_{}.{}",
        experiment_dir(experiment_id),
        image_id,
        extension
    )
}

/// `experiments/<id>/masks/crop_<crop>.<ext>`
pub fn crop_mask_file(experiment_id: u64, crop_id: u64, extension: &str) -> String {
    format!(
        "{}/masks/crop_{}.{}",
        experiment_dir(experiment_id),
        crop_id,
        extension
    )
}

/// A recognized entry below `experiments/<id>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEntry {
    /// `experiment.json`
    Experiment,
    /// A file in an image directory
    ImageFile {
        /// Image ID as exported
        image_id: u64,
        /// File name within the directory
        file: String,
    },
    /// A file in a crop directory
    CropFile {
        /// Crop ID as exported
        crop_id: u64,
        /// File name within the directory
        file: String,
    },
    /// `masks/fov_<id>.<ext>`
    FovMask {
        /// Image ID as exported
        image_id: u64,
    },
    /// `masks/crop_<id>.<ext>`
    CropMask {
        /// Crop ID as exported
        crop_id: u64,
    },
}

/// Split `experiments/<id>/<rest>` into the experiment ID and the entry kind.
pub fn parse_native_entry(path: &str) -> Option<(u64, NativeEntry)> {
    let rest = path.strip_prefix("experiments/")?;
    let (experiment, rest) = rest.split_once('/')?;
    let experiment_id = experiment.parse().ok()?;

    let parts: Vec<&str> = rest.split('/').collect();
    let entry = match parts.as_slice() {
        [EXPERIMENT_FILE] => NativeEntry::Experiment,
        ["images", id, file] if !file.is_empty() => NativeEntry::ImageFile {
            image_id: id.parse().ok()?,
            file: file.to_string(),
        },
        ["crops", id, file] if !file.is_empty() => NativeEntry::CropFile {
            crop_id: id.parse().ok()?,
            file: file.to_string(),
        },
        ["masks", file] => {
            let (stem, _) = file.rsplit_once('.')?;
            if let Some(id) = stem.strip_prefix("fov_") {
                NativeEntry::FovMask {
                    image_id: id.parse().ok()?,
                }
            } else if let Some(id) = stem.strip_prefix("crop_") {
                NativeEntry::CropMask {
                    crop_id: id.parse().ok()?,
                }
            } else {
                return None;
            }
        }
        _ => return None,
    };

    Some((experiment_id, entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(experiment_file(3), "experiments/3/experiment.json");
        assert_eq!(image_file(3, 7, MIP_FILE), "experiments/3/images/7/mip.tiff");
        assert_eq!(crop_file(3, 9, METADATA_FILE), "experiments/3/crops/9/metadata.json");
        assert_eq!(fov_mask_file(3, 7, "png"), "experiments/3/masks/fov_7.png");
        assert_eq!(crop_mask_file(3, 9, "json"), "experiments/3/masks/crop_9.json");
    }

    #[test]
    fn test_parse_native_entry() {
        assert_eq!(
            parse_native_entry("experiments/3/experiment.json"),
            Some((3, NativeEntry::Experiment))
        );
        assert_eq!(
            parse_native_entry("experiments/3/images/7/sum.tiff"),
            Some((
                3,
                NativeEntry::ImageFile {
                    image_id: 7,
                    file: "sum.tiff".into()
                }
            ))
        );
        assert_eq!(
            parse_native_entry("experiments/3/masks/crop_9.json"),
            Some((3, NativeEntry::CropMask { crop_id: 9 }))
        );
        assert_eq!(
            parse_native_entry("experiments/3/masks/fov_7.png"),
            Some((3, NativeEntry::FovMask { image_id: 7 }))
        );
        assert_eq!(parse_native_entry("experiments/x/experiment.json"), None);
        assert_eq!(parse_native_entry("experiments/3/images/7/deeper/file"), None);
        assert_eq!(parse_native_entry("annotations/coco.json"), None);
    }
}
