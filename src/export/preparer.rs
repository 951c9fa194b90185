//! Export preparation: ownership check, counts, size estimate, job record.

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, CatalogCounts};
use crate::config::SizeEstimates;
use crate::error::{MigrationError, truncated_ids};
use crate::export::ExportOptions;
use crate::format::BboxFormat;
use crate::jobs::{JobCounts, JobKind, JobRecord, JobStore};

/// What `prepare_export` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPlan {
    pub job_id: String,
    /// Heuristic archive size, not a bound
    pub estimated_bytes: u64,
    pub experiment_count: usize,
    pub image_count: usize,
    pub crop_count: usize,
    pub mask_count: usize,
}

/// Estimate the archive size from the per-item table.
pub fn estimate_bytes(
    counts: &CatalogCounts,
    options: &ExportOptions,
    estimates: &SizeEstimates,
) -> u64 {
    let n = |count: usize| count as u64;
    let documents = n(counts.experiment_count + counts.image_count + counts.crop_count);
    let annotation_formats = if options.bbox_format == BboxFormat::Coco { 1 } else { 2 };

    let mut total = estimates.fixed_overhead
        + documents * estimates.metadata_file
        + n(counts.crop_count) * annotation_formats * estimates.annotation_entry;
    if options.include_fov_images {
        total += n(counts.image_count) * estimates.fov_projection_pair;
    }
    if options.include_crop_images {
        total += n(counts.crop_count) * estimates.crop_image;
    }
    if options.include_masks {
        total += n(counts.mask_count) * estimates.mask;
    }
    if options.include_embeddings {
        total += n(counts.embedding_count) * estimates.embedding;
    }
    total
}

/// Validate an export request and persist its job in `preparing`.
///
/// Duplicate IDs are collapsed. Fails with [`MigrationError::NotFound`]
/// listing every requested experiment that does not exist or belongs to
/// another user.
pub fn prepare_export(
    catalog: &dyn Catalog,
    jobs: &JobStore,
    estimates: &SizeEstimates,
    experiment_ids: &[u64],
    options: ExportOptions,
    user_id: u64,
) -> Result<ExportPlan, MigrationError> {
    let mut ids: Vec<u64> = Vec::with_capacity(experiment_ids.len());
    for &id in experiment_ids {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Err(MigrationError::validation("no experiments requested"));
    }

    let mut missing = Vec::new();
    for &id in &ids {
        match catalog.experiment(id)? {
            Some(experiment) if experiment.user_id == user_id => {}
            _ => missing.push(id),
        }
    }
    if !missing.is_empty() {
        return Err(MigrationError::not_found(format!(
            "experiments {} not found for user {}",
            truncated_ids(&missing, 20),
            user_id
        )));
    }

    let counts = catalog.counts(&ids)?;
    let estimated_bytes = estimate_bytes(&counts, &options, estimates);

    let mut job = JobRecord::new(JobKind::Export, user_id);
    job.current_step = "Prepared".to_string();
    job.export_options = Some(options);
    job.experiment_ids = ids;
    job.estimated_bytes = estimated_bytes;
    job.counts = JobCounts {
        experiment_count: counts.experiment_count,
        image_count: counts.image_count,
        crop_count: counts.crop_count,
        mask_count: counts.mask_count,
        ..JobCounts::default()
    };
    jobs.save(&job)?;

    log::info!(
        "Prepared export job {} for user {}: {} experiments, {} images, {} crops, ~{} bytes",
        job.job_id,
        user_id,
        counts.experiment_count,
        counts.image_count,
        counts.crop_count,
        estimated_bytes
    );

    Ok(ExportPlan {
        job_id: job.job_id,
        estimated_bytes,
        experiment_count: counts.experiment_count,
        image_count: counts.image_count,
        crop_count: counts.crop_count,
        mask_count: counts.mask_count,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::jobs::JobStatus;
    use crate::model::{BoundingBox, CropRecord, Experiment, ImageRecord};

    fn catalog() -> (MemoryCatalog, u64, u64) {
        let catalog = MemoryCatalog::new();
        let mut txn = catalog.begin().unwrap();
        let mine = txn.create_experiment(Experiment::new(1, "mine")).unwrap();
        let theirs = txn.create_experiment(Experiment::new(2, "theirs")).unwrap();
        for name in ["a.tif", "b.tif"] {
            let img = txn.create_image(ImageRecord::new(mine, name, 64, 64)).unwrap();
            txn.create_crop(CropRecord::new(img, BoundingBox::new(1.0, 1.0, 8.0, 8.0)))
                .unwrap();
        }
        txn.commit().unwrap();
        (catalog, mine, theirs)
    }

    #[test]
    fn test_prepare_counts_and_persists_job() {
        let (catalog, mine, _) = catalog();
        let jobs = JobStore::in_memory(Duration::from_secs(60));
        let plan = prepare_export(
            &catalog,
            &jobs,
            &SizeEstimates::default(),
            &[mine, mine],
            ExportOptions::default(),
            1,
        )
        .unwrap();

        assert_eq!(plan.experiment_count, 1);
        assert_eq!(plan.image_count, 2);
        assert_eq!(plan.crop_count, 2);
        assert!(plan.estimated_bytes > 2 * 2 * 1024 * 1024);

        let job = jobs.require(&plan.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Preparing);
        assert_eq!(job.experiment_ids, vec![mine]);
    }

    #[test]
    fn test_foreign_and_unknown_experiments_rejected() {
        let (catalog, mine, theirs) = catalog();
        let jobs = JobStore::in_memory(Duration::from_secs(60));
        let err = prepare_export(
            &catalog,
            &jobs,
            &SizeEstimates::default(),
            &[mine, theirs, 999],
            ExportOptions::default(),
            1,
        )
        .unwrap_err();

        match err {
            MigrationError::NotFound(message) => {
                assert!(message.contains(&theirs.to_string()));
                assert!(message.contains("999"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_estimate_respects_toggles() {
        let counts = CatalogCounts {
            experiment_count: 1,
            image_count: 2,
            crop_count: 3,
            mask_count: 1,
            embedding_count: 1,
        };
        let estimates = SizeEstimates::default();
        let full = estimate_bytes(&counts, &ExportOptions::default(), &estimates);
        let lean = estimate_bytes(
            &counts,
            &ExportOptions::new().fov_images(false).crop_images(false),
            &estimates,
        );
        assert_eq!(full - lean, 2 * estimates.fov_projection_pair + 3 * estimates.crop_image);

        let with_yolo = estimate_bytes(
            &counts,
            &ExportOptions::new().bbox_format(BboxFormat::Yolo),
            &estimates,
        );
        assert_eq!(with_yolo - full, 3 * estimates.annotation_entry);
    }
}
