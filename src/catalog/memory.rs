//! In-memory catalog, optionally persisted as a JSON snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use super::{Catalog, CatalogCounts, CatalogTxn};
use crate::error::MigrationError;
use crate::model::{CropRecord, Embedding, Experiment, ImageRecord, MaskRecord, MaskScope};

/// Tables and ID sequences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct CatalogState {
    experiments: BTreeMap<u64, Experiment>,
    images: BTreeMap<u64, ImageRecord>,
    crops: BTreeMap<u64, CropRecord>,
    masks: BTreeMap<u64, MaskRecord>,
    last_experiment_id: u64,
    last_image_id: u64,
    last_crop_id: u64,
    last_mask_id: u64,
}

impl CatalogState {
    fn scope_exists(&self, scope: MaskScope) -> bool {
        match scope {
            MaskScope::Image(id) => self.images.contains_key(&id),
            MaskScope::Crop(id) => self.crops.contains_key(&id),
        }
    }
}

/// Thread-safe catalog held in memory.
///
/// IDs come from per-table sequences that only grow, so an ID handed out by
/// a rolled-back transaction is never reused.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
}

fn poisoned() -> MigrationError {
    std::io::Error::other("catalog lock poisoned").into()
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`save`](Self::save); a missing file gives
    /// an empty catalog.
    pub fn open(path: &Path) -> Result<Self, MigrationError> {
        if !path.exists() {
            log::info!("No catalog at {:?}, starting empty", path);
            return Ok(Self::new());
        }
        let json = std::fs::read_to_string(path)?;
        let state: CatalogState = serde_json::from_str(&json)?;
        log::info!(
            "Loaded catalog from {:?}: {} experiments, {} images, {} crops",
            path,
            state.experiments.len(),
            state.images.len(),
            state.crops.len()
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Write the committed state as JSON.
    pub fn save(&self, path: &Path) -> Result<(), MigrationError> {
        let json = serde_json::to_string_pretty(&*self.read()?)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        log::debug!("Saved catalog to {:?}", path);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, CatalogState>, MigrationError> {
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, CatalogState>, MigrationError> {
        self.state.write().map_err(|_| poisoned())
    }
}

impl Catalog for MemoryCatalog {
    fn experiment(&self, id: u64) -> Result<Option<Experiment>, MigrationError> {
        Ok(self.read()?.experiments.get(&id).cloned())
    }

    fn experiments_for_user(&self, user_id: u64) -> Result<Vec<Experiment>, MigrationError> {
        Ok(self
            .read()?
            .experiments
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    fn images_for_experiment(
        &self,
        experiment_id: u64,
    ) -> Result<Vec<ImageRecord>, MigrationError> {
        Ok(self
            .read()?
            .images
            .values()
            .filter(|i| i.experiment_id == experiment_id)
            .cloned()
            .collect())
    }

    fn crops_for_image(&self, image_id: u64) -> Result<Vec<CropRecord>, MigrationError> {
        Ok(self
            .read()?
            .crops
            .values()
            .filter(|c| c.image_id == image_id)
            .cloned()
            .collect())
    }

    fn masks_for_image(&self, image_id: u64) -> Result<Vec<MaskRecord>, MigrationError> {
        Ok(self
            .read()?
            .masks
            .values()
            .filter(|m| m.scope == MaskScope::Image(image_id))
            .cloned()
            .collect())
    }

    fn crop_mask(&self, crop_id: u64) -> Result<Option<MaskRecord>, MigrationError> {
        Ok(self
            .read()?
            .masks
            .values()
            .find(|m| m.scope == MaskScope::Crop(crop_id))
            .cloned())
    }

    fn counts(&self, experiment_ids: &[u64]) -> Result<CatalogCounts, MigrationError> {
        let state = self.read()?;
        let experiments: BTreeSet<u64> = experiment_ids
            .iter()
            .copied()
            .filter(|id| state.experiments.contains_key(id))
            .collect();

        let images: Vec<&ImageRecord> = state
            .images
            .values()
            .filter(|i| experiments.contains(&i.experiment_id))
            .collect();
        let image_ids: BTreeSet<u64> = images.iter().map(|i| i.id).collect();
        let crops: Vec<&CropRecord> = state
            .crops
            .values()
            .filter(|c| image_ids.contains(&c.image_id))
            .collect();
        let crop_ids: BTreeSet<u64> = crops.iter().map(|c| c.id).collect();

        let mask_count = state
            .masks
            .values()
            .filter(|m| match m.scope {
                MaskScope::Image(id) => image_ids.contains(&id),
                MaskScope::Crop(id) => crop_ids.contains(&id),
            })
            .count();
        let embedding_count = images.iter().filter(|i| i.embedding.is_some()).count()
            + crops.iter().filter(|c| c.embedding.is_some()).count();

        Ok(CatalogCounts {
            experiment_count: experiments.len(),
            image_count: images.len(),
            crop_count: crops.len(),
            mask_count,
            embedding_count,
        })
    }

    fn begin(&self) -> Result<Box<dyn CatalogTxn + '_>, MigrationError> {
        Ok(Box::new(MemoryTxn {
            catalog: self,
            staged: CatalogState::default(),
            committed: false,
        }))
    }
}

/// Transaction over a [`MemoryCatalog`]. Staged rows shadow committed ones.
struct MemoryTxn<'a> {
    catalog: &'a MemoryCatalog,
    staged: CatalogState,
    committed: bool,
}

enum Table {
    Experiment,
    Image,
    Crop,
    Mask,
}

impl MemoryTxn<'_> {
    fn next_id(&self, table: Table) -> Result<u64, MigrationError> {
        let mut state = self.catalog.write()?;
        let seq = match table {
            Table::Experiment => &mut state.last_experiment_id,
            Table::Image => &mut state.last_image_id,
            Table::Crop => &mut state.last_crop_id,
            Table::Mask => &mut state.last_mask_id,
        };
        *seq += 1;
        Ok(*seq)
    }

    fn image(&self, id: u64) -> Result<ImageRecord, MigrationError> {
        if let Some(image) = self.staged.images.get(&id) {
            return Ok(image.clone());
        }
        self.catalog
            .read()?
            .images
            .get(&id)
            .cloned()
            .ok_or_else(|| MigrationError::not_found(format!("image {}", id)))
    }

    fn crop(&self, id: u64) -> Result<CropRecord, MigrationError> {
        if let Some(crop) = self.staged.crops.get(&id) {
            return Ok(crop.clone());
        }
        self.catalog
            .read()?
            .crops
            .get(&id)
            .cloned()
            .ok_or_else(|| MigrationError::not_found(format!("crop {}", id)))
    }
}

impl CatalogTxn for MemoryTxn<'_> {
    fn create_experiment(&mut self, mut experiment: Experiment) -> Result<u64, MigrationError> {
        experiment.id = self.next_id(Table::Experiment)?;
        let id = experiment.id;
        self.staged.experiments.insert(id, experiment);
        Ok(id)
    }

    fn create_image(&mut self, mut image: ImageRecord) -> Result<u64, MigrationError> {
        let experiment_id = image.experiment_id;
        if !self.staged.experiments.contains_key(&experiment_id)
            && !self.catalog.read()?.experiments.contains_key(&experiment_id)
        {
            return Err(MigrationError::not_found(format!("experiment {}", experiment_id)));
        }
        image.id = self.next_id(Table::Image)?;
        let id = image.id;
        self.staged.images.insert(id, image);
        Ok(id)
    }

    fn create_crop(&mut self, mut crop: CropRecord) -> Result<u64, MigrationError> {
        self.image(crop.image_id)?;
        crop.id = self.next_id(Table::Crop)?;
        let id = crop.id;
        self.staged.crops.insert(id, crop);
        Ok(id)
    }

    fn create_mask(&mut self, mut mask: MaskRecord) -> Result<u64, MigrationError> {
        if !self.staged.scope_exists(mask.scope) && !self.catalog.read()?.scope_exists(mask.scope)
        {
            return Err(MigrationError::not_found(format!("mask owner {:?}", mask.scope)));
        }
        mask.id = self.next_id(Table::Mask)?;
        let id = mask.id;
        self.staged.masks.insert(id, mask);
        Ok(id)
    }

    fn update_image(&mut self, image: ImageRecord) -> Result<(), MigrationError> {
        self.image(image.id)?;
        self.staged.images.insert(image.id, image);
        Ok(())
    }

    fn update_crop(&mut self, crop: CropRecord) -> Result<(), MigrationError> {
        self.crop(crop.id)?;
        self.staged.crops.insert(crop.id, crop);
        Ok(())
    }

    fn set_image_embedding(
        &mut self,
        image_id: u64,
        embedding: Embedding,
    ) -> Result<(), MigrationError> {
        let mut image = self.image(image_id)?;
        image.embedding = Some(embedding);
        self.staged.images.insert(image_id, image);
        Ok(())
    }

    fn set_crop_embedding(
        &mut self,
        crop_id: u64,
        embedding: Embedding,
    ) -> Result<(), MigrationError> {
        let mut crop = self.crop(crop_id)?;
        crop.embedding = Some(embedding);
        self.staged.crops.insert(crop_id, crop);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), MigrationError> {
        let staged = std::mem::take(&mut self.staged);
        {
            let mut state = self.catalog.write()?;
            state.experiments.extend(staged.experiments);
            state.images.extend(staged.images);
            state.crops.extend(staged.crops);
            state.masks.extend(staged.masks);
        }
        self.committed = true;
        log::debug!("Catalog transaction committed");
        Ok(())
    }
}

impl Drop for MemoryTxn<'_> {
    fn drop(&mut self) {
        if !self.committed {
            log::debug!(
                "Catalog transaction rolled back ({} experiments, {} images, {} crops staged)",
                self.staged.experiments.len(),
                self.staged.images.len(),
                self.staged.crops.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BoundingBox;

    fn seeded() -> (MemoryCatalog, u64, u64) {
        let catalog = MemoryCatalog::new();
        let mut txn = catalog.begin().unwrap();
        let exp = txn.create_experiment(Experiment::new(1, "exp")).unwrap();
        let img = txn.create_image(ImageRecord::new(exp, "a.tif", 10, 10)).unwrap();
        txn.create_crop(CropRecord::new(img, BoundingBox::new(0.0, 0.0, 2.0, 2.0)))
            .unwrap();
        txn.commit().unwrap();
        (catalog, exp, img)
    }

    #[test]
    fn test_commit_makes_rows_visible() {
        let (catalog, exp, img) = seeded();
        assert_eq!(catalog.experiments_for_user(1).unwrap().len(), 1);
        assert_eq!(catalog.images_for_experiment(exp).unwrap()[0].id, img);
        assert_eq!(catalog.crops_for_image(img).unwrap().len(), 1);
    }

    #[test]
    fn test_drop_rolls_back() {
        let (catalog, exp, _) = seeded();
        {
            let mut txn = catalog.begin().unwrap();
            txn.create_image(ImageRecord::new(exp, "b.tif", 5, 5)).unwrap();
            txn.create_experiment(Experiment::new(1, "other")).unwrap();
        }
        assert_eq!(catalog.images_for_experiment(exp).unwrap().len(), 1);
        assert_eq!(catalog.experiments_for_user(1).unwrap().len(), 1);

        // sequences keep moving after a rollback
        let mut txn = catalog.begin().unwrap();
        let id = txn.create_experiment(Experiment::new(1, "third")).unwrap();
        assert_eq!(id, 3);
    }

    #[test]
    fn test_references_must_exist() {
        let catalog = MemoryCatalog::new();
        let mut txn = catalog.begin().unwrap();
        assert!(txn.create_image(ImageRecord::new(99, "x.tif", 1, 1)).is_err());
        assert!(txn
            .create_crop(CropRecord::new(99, BoundingBox::new(0.0, 0.0, 1.0, 1.0)))
            .is_err());
        assert!(txn.set_crop_embedding(99, Embedding::new("m", vec![1.0])).is_err());
    }

    #[test]
    fn test_counts_scoped_to_requested_experiments() {
        let (catalog, exp, img) = seeded();
        let mut txn = catalog.begin().unwrap();
        let other = txn.create_experiment(Experiment::new(2, "other")).unwrap();
        txn.create_image(ImageRecord::new(other, "z.tif", 1, 1)).unwrap();
        txn.set_image_embedding(img, Embedding::new("m", vec![0.0; 4])).unwrap();
        txn.create_fov_mask(
            img,
            MaskRecord::polygon(MaskScope::Image(0), 10, 10, vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0)]),
        )
        .unwrap();
        txn.commit().unwrap();

        let counts = catalog.counts(&[exp, 12345]).unwrap();
        assert_eq!(
            counts,
            CatalogCounts {
                experiment_count: 1,
                image_count: 1,
                crop_count: 1,
                mask_count: 1,
                embedding_count: 1,
            }
        );
        assert_eq!(catalog.masks_for_image(img).unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let (catalog, exp, _) = seeded();
        catalog.save(&path).unwrap();

        let loaded = MemoryCatalog::open(&path).unwrap();
        assert_eq!(loaded.experiment(exp).unwrap(), catalog.experiment(exp).unwrap());
        assert_eq!(loaded.counts(&[exp]).unwrap().crop_count, 1);

        let empty = MemoryCatalog::open(&dir.path().join("missing.json")).unwrap();
        assert!(empty.experiments_for_user(1).unwrap().is_empty());
    }
}
