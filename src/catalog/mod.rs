//! Relational store of experiments, images, crops and masks.
//!
//! Exports only read from the catalog. Imports write through a
//! [`CatalogTxn`]: every row created by one import becomes visible at
//! [`CatalogTxn::commit`], and dropping the transaction without committing
//! discards all of them.

mod memory;

pub use memory::MemoryCatalog;

use serde::{Deserialize, Serialize};

use crate::error::MigrationError;
use crate::model::{CropRecord, Embedding, Experiment, ImageRecord, MaskRecord, MaskScope};

/// Aggregate counts over a set of experiments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCounts {
    pub experiment_count: usize,
    pub image_count: usize,
    pub crop_count: usize,
    /// Image and crop masks
    pub mask_count: usize,
    /// Images and crops carrying an embedding
    pub embedding_count: usize,
}

/// Read access plus transactions.
pub trait Catalog: Send + Sync {
    /// Experiment by ID.
    fn experiment(&self, id: u64) -> Result<Option<Experiment>, MigrationError>;

    /// Experiments owned by a user, by ascending ID.
    fn experiments_for_user(&self, user_id: u64) -> Result<Vec<Experiment>, MigrationError>;

    /// Images of an experiment, by ascending ID.
    fn images_for_experiment(&self, experiment_id: u64)
    -> Result<Vec<ImageRecord>, MigrationError>;

    /// Crops of an image, by ascending ID.
    fn crops_for_image(&self, image_id: u64) -> Result<Vec<CropRecord>, MigrationError>;

    /// Field-of-view masks of an image.
    fn masks_for_image(&self, image_id: u64) -> Result<Vec<MaskRecord>, MigrationError>;

    /// Mask of a crop, if any.
    fn crop_mask(&self, crop_id: u64) -> Result<Option<MaskRecord>, MigrationError>;

    /// Counts over the given experiments. Unknown IDs count as nothing.
    fn counts(&self, experiment_ids: &[u64]) -> Result<CatalogCounts, MigrationError>;

    /// Start a write transaction.
    fn begin(&self) -> Result<Box<dyn CatalogTxn + '_>, MigrationError>;
}

/// Staged writes, applied all at once on commit.
pub trait CatalogTxn {
    /// Insert an experiment; returns its new ID.
    fn create_experiment(&mut self, experiment: Experiment) -> Result<u64, MigrationError>;

    /// Insert an image into an existing or staged experiment.
    fn create_image(&mut self, image: ImageRecord) -> Result<u64, MigrationError>;

    /// Insert a crop on an existing or staged image.
    fn create_crop(&mut self, crop: CropRecord) -> Result<u64, MigrationError>;

    /// Insert a mask; its scope must name an existing or staged row.
    fn create_mask(&mut self, mask: MaskRecord) -> Result<u64, MigrationError>;

    /// Replace an image row (paths, status).
    fn update_image(&mut self, image: ImageRecord) -> Result<(), MigrationError>;

    /// Replace a crop row (paths).
    fn update_crop(&mut self, crop: CropRecord) -> Result<(), MigrationError>;

    /// Attach an embedding to an image.
    fn set_image_embedding(
        &mut self,
        image_id: u64,
        embedding: Embedding,
    ) -> Result<(), MigrationError>;

    /// Attach an embedding to a crop.
    fn set_crop_embedding(&mut self, crop_id: u64, embedding: Embedding)
    -> Result<(), MigrationError>;

    /// Make every staged write visible.
    fn commit(self: Box<Self>) -> Result<(), MigrationError>;

    /// Insert a field-of-view mask for `image_id`.
    fn create_fov_mask(&mut self, image_id: u64, mut mask: MaskRecord) -> Result<u64, MigrationError> {
        mask.scope = MaskScope::Image(image_id);
        self.create_mask(mask)
    }

    /// Insert the mask of `crop_id`.
    fn create_crop_mask(&mut self, crop_id: u64, mut mask: MaskRecord) -> Result<u64, MigrationError> {
        mask.scope = MaskScope::Crop(crop_id);
        self.create_mask(mask)
    }
}
