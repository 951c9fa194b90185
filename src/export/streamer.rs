//! Archive generation for prepared export jobs.
//!
//! The whole archive is assembled in memory, finalized, and only then handed
//! out as an [`ExportStream`] of fixed-size chunks. Experiments that vanished
//! since preparation are skipped with a warning; any other failure discards
//! the archive and leaves the job in `error`.

use std::path::Path;

use crate::archive::layout::{
    self, CROP_EMBEDDINGS, CROP_IDS, FOV_EMBEDDINGS, FOV_IDS, METADATA_FILE, MIP_FILE, SUM_FILE,
    THUMBNAIL_FILE,
};
use crate::archive::{
    ArchiveWriter, CropDocument, ExperimentDocument, ExportStatistics, ImageDocument, Manifest,
};
use crate::catalog::Catalog;
use crate::error::{MigrationError, truncated_ids};
use crate::export::ExportOptions;
use crate::format::{
    AnnotatedImage, BboxFormat, BoxAnnotation, EmbeddingTable, FormatRegistry, encode_mask,
};
use crate::jobs::{CancelToken, JobKind, JobRecord, JobStatus, JobStore};
use crate::model::{CropRecord, Experiment, ImageRecord, MaskRecord};
use crate::storage::FileStorage;

/// Progress reported once the manifest is written.
const PROGRESS_START: u8 = 5;
/// Progress reported once every experiment is written.
const PROGRESS_EXPERIMENTS_DONE: u8 = 80;
const PROGRESS_EMBEDDINGS: u8 = 90;

/// Finished archive, handed out in chunks.
#[derive(Debug, Clone)]
pub struct ExportStream {
    bytes: Vec<u8>,
    position: usize,
    chunk_size: usize,
}

impl ExportStream {
    pub fn new(bytes: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            bytes,
            position: 0,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Size of the whole archive.
    pub fn total_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Collect the remaining chunks into one buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        let Self {
            mut bytes, position, ..
        } = self;
        bytes.drain(..position);
        bytes
    }
}

impl Iterator for ExportStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.position >= self.bytes.len() {
            return None;
        }
        let end = (self.position + self.chunk_size).min(self.bytes.len());
        let chunk = self.bytes[self.position..end].to_vec();
        self.position = end;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.bytes.len() - self.position).div_ceil(self.chunk_size);
        (remaining, Some(remaining))
    }
}

/// Image with the rows hanging off it.
struct ImageBundle {
    image: ImageRecord,
    fov_mask: Option<MaskRecord>,
    crops: Vec<(CropRecord, Option<MaskRecord>)>,
}

/// Experiment loaded for export.
struct ExperimentBundle {
    experiment: Experiment,
    images: Vec<ImageBundle>,
}

/// Writes the archive of one export job.
pub struct ExportStreamer<'a> {
    catalog: &'a dyn Catalog,
    storage: &'a FileStorage,
    jobs: &'a JobStore,
    registry: &'a FormatRegistry,
}

impl<'a> ExportStreamer<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        storage: &'a FileStorage,
        jobs: &'a JobStore,
        registry: &'a FormatRegistry,
    ) -> Self {
        Self {
            catalog,
            storage,
            jobs,
            registry,
        }
    }

    /// Generate the archive of a prepared export job.
    ///
    /// The job moves to `streaming` and ends in `completed` or `error`.
    pub fn run(&self, job_id: &str, cancel: &CancelToken) -> Result<Vec<u8>, MigrationError> {
        let mut job = self.jobs.require(job_id)?;
        if job.kind != JobKind::Export {
            return Err(MigrationError::validation(format!(
                "job {} is not an export job",
                job_id
            )));
        }
        if job.status != JobStatus::Preparing {
            return Err(MigrationError::validation(format!(
                "export job {} is {}, expected preparing",
                job_id, job.status
            )));
        }

        job.status = JobStatus::Streaming;
        job.progress_percent = 0;
        job.current_step = "Loading experiments".to_string();
        self.jobs.save(&job)?;

        match self.build(&mut job, cancel) {
            Ok(bytes) => {
                job.finish(JobStatus::Completed, "Completed");
                self.jobs.save(&job)?;
                log::info!("Export job {} completed: {} bytes", job.job_id, bytes.len());
                Ok(bytes)
            }
            Err(e) => {
                let message = match &e {
                    MigrationError::Cancelled => "cancelled".to_string(),
                    other => format!(
                        "{}: {} (experiments: {})",
                        other.kind(),
                        other,
                        truncated_ids(&job.experiment_ids, 20)
                    ),
                };
                log::error!("Export job {} failed: {}", job.job_id, message);
                job.fail(message);
                if let Err(save_error) = self.jobs.save(&job) {
                    log::error!("Could not record failure of job {}: {}", job.job_id, save_error);
                }
                Err(e)
            }
        }
    }

    fn progress(&self, job: &mut JobRecord, percent: u8, step: impl Into<String>) -> Result<(), MigrationError> {
        job.progress_percent = percent;
        job.current_step = step.into();
        self.jobs.save(job)
    }

    fn load(&self, job: &JobRecord, include_masks: bool) -> Result<Vec<ExperimentBundle>, MigrationError> {
        let mut bundles = Vec::with_capacity(job.experiment_ids.len());
        for &experiment_id in &job.experiment_ids {
            let experiment = match self.catalog.experiment(experiment_id)? {
                Some(e) if e.user_id == job.user_id => e,
                _ => {
                    log::warn!(
                        "Experiment {} is no longer available, skipping it in export {}",
                        experiment_id,
                        job.job_id
                    );
                    continue;
                }
            };

            let mut images = Vec::new();
            for image in self.catalog.images_for_experiment(experiment_id)? {
                let fov_mask = if include_masks {
                    let mut masks = self.catalog.masks_for_image(image.id)?;
                    if masks.len() > 1 {
                        log::warn!(
                            "Image {} has {} masks; only the first is exported",
                            image.id,
                            masks.len()
                        );
                    }
                    if masks.is_empty() { None } else { Some(masks.swap_remove(0)) }
                } else {
                    None
                };

                let mut crops = Vec::new();
                for crop in self.catalog.crops_for_image(image.id)? {
                    let mask = if include_masks {
                        self.catalog.crop_mask(crop.id)?
                    } else {
                        None
                    };
                    crops.push((crop, mask));
                }
                images.push(ImageBundle {
                    image,
                    fov_mask,
                    crops,
                });
            }
            bundles.push(ExperimentBundle { experiment, images });
        }
        Ok(bundles)
    }

    /// Image and crop embedding tables, in export order. Rows whose dimension
    /// differs from the first row of their table are left out.
    fn embedding_tables(bundles: &[ExperimentBundle]) -> (EmbeddingTable, EmbeddingTable) {
        let mut fov_embeddings = EmbeddingTable::new();
        let mut crop_embeddings = EmbeddingTable::new();
        for ImageBundle { image, crops, .. } in bundles.iter().flat_map(|b| &b.images) {
            if let Some(embedding) = &image.embedding {
                if let Err(message) = fov_embeddings.push(image.id, embedding.vector.clone()) {
                    log::warn!("Skipping image embedding: {}", message);
                }
            }
            for (crop, _) in crops {
                if let Some(embedding) = &crop.embedding {
                    if let Err(message) = crop_embeddings.push(crop.id, embedding.vector.clone()) {
                        log::warn!("Skipping crop embedding: {}", message);
                    }
                }
            }
        }
        (fov_embeddings, crop_embeddings)
    }

    fn statistics(bundles: &[ExperimentBundle], embedding_rows: usize) -> ExportStatistics {
        let mut stats = ExportStatistics {
            experiment_count: bundles.len(),
            ..ExportStatistics::default()
        };
        for image in bundles.iter().flat_map(|b| &b.images) {
            stats.image_count += 1;
            stats.crop_count += image.crops.len();
            stats.mask_count += usize::from(image.fov_mask.is_some())
                + image.crops.iter().filter(|(_, m)| m.is_some()).count();
        }
        stats.embedding_count = embedding_rows;
        stats
    }

    fn build(&self, job: &mut JobRecord, cancel: &CancelToken) -> Result<Vec<u8>, MigrationError> {
        let options = job.export_options.clone().unwrap_or_default();
        let bundles = self.load(job, options.include_masks)?;
        cancel.check()?;

        let mut manifest = Manifest::new(
            options.clone(),
            bundles.iter().map(|b| b.experiment.id).collect(),
        );
        let (fov_embeddings, crop_embeddings) = if options.include_embeddings {
            Self::embedding_tables(&bundles)
        } else {
            (EmbeddingTable::new(), EmbeddingTable::new())
        };
        manifest.statistics = Self::statistics(&bundles, fov_embeddings.len() + crop_embeddings.len());

        let mut writer = ArchiveWriter::new();
        writer.add_json(layout::MANIFEST, &manifest)?;
        self.progress(job, PROGRESS_START, "Writing experiments")?;

        let mut annotated = Vec::new();
        let total = bundles.len().max(1);

        for (index, bundle) in bundles.iter().enumerate() {
            cancel.check()?;
            self.write_experiment(&mut writer, bundle, &options, &mut annotated)?;

            let span = (PROGRESS_EXPERIMENTS_DONE - PROGRESS_START) as usize;
            let percent = PROGRESS_START as usize + span * (index + 1) / total;
            self.progress(
                job,
                percent as u8,
                format!("Exported experiment {} ({}/{})", bundle.experiment.id, index + 1, bundles.len()),
            )?;
        }

        cancel.check()?;
        self.progress(job, PROGRESS_EXPERIMENTS_DONE, "Writing annotations")?;
        self.write_annotations(&mut writer, &annotated, options.bbox_format)?;

        if options.include_embeddings {
            cancel.check()?;
            self.progress(job, PROGRESS_EMBEDDINGS, "Writing embeddings")?;
            write_embedding_table(&mut writer, &fov_embeddings, FOV_EMBEDDINGS, FOV_IDS)?;
            write_embedding_table(&mut writer, &crop_embeddings, CROP_EMBEDDINGS, CROP_IDS)?;
        }

        job.counts.experiment_count = manifest.statistics.experiment_count;
        job.counts.image_count = manifest.statistics.image_count;
        job.counts.crop_count = manifest.statistics.crop_count;
        job.counts.mask_count = manifest.statistics.mask_count;

        writer.finish()
    }

    fn write_experiment(
        &self,
        writer: &mut ArchiveWriter,
        bundle: &ExperimentBundle,
        options: &ExportOptions,
        annotated: &mut Vec<AnnotatedImage>,
    ) -> Result<(), MigrationError> {
        let exp_id = bundle.experiment.id;
        log::debug!(
            "Exporting experiment {} '{}' ({} images)",
            exp_id,
            bundle.experiment.name,
            bundle.images.len()
        );
        writer.add_json(
            &layout::experiment_file(exp_id),
            &ExperimentDocument::from(&bundle.experiment),
        )?;

        for ImageBundle {
            image,
            fov_mask,
            crops,
        } in &bundle.images
        {
            if options.include_fov_images {
                for (path, file) in [
                    (&image.mip_path, MIP_FILE),
                    (&image.sum_path, SUM_FILE),
                    (&image.thumbnail_path, THUMBNAIL_FILE),
                ] {
                    if let Some(path) = path {
                        self.copy_file(writer, path, &layout::image_file(exp_id, image.id, file))?;
                    }
                }
            }
            writer.add_json(
                &layout::image_file(exp_id, image.id, METADATA_FILE),
                &ImageDocument::from(image),
            )?;

            if let Some(mask) = fov_mask {
                let encoded = encode_mask(mask, options.mask_format)?;
                if let Some(warning) = &encoded.warning {
                    log::warn!("{}", warning);
                }
                writer.add(
                    &layout::fov_mask_file(exp_id, image.id, encoded.extension),
                    &encoded.bytes,
                )?;
            }

            let mut entry = AnnotatedImage::new(
                image.id,
                image.original_filename.clone(),
                image.width,
                image.height,
            );

            for (crop, mask) in crops {
                if options.include_crop_images {
                    for (path, file) in [(&crop.mip_path, MIP_FILE), (&crop.sum_path, SUM_FILE)] {
                        if let Some(path) = path {
                            self.copy_file(writer, path, &layout::crop_file(exp_id, crop.id, file))?;
                        }
                    }
                }
                writer.add_json(
                    &layout::crop_file(exp_id, crop.id, METADATA_FILE),
                    &CropDocument::from(crop),
                )?;

                if let Some(mask) = mask {
                    let encoded = encode_mask(mask, options.mask_format)?;
                    if let Some(warning) = &encoded.warning {
                        log::warn!("{}", warning);
                    }
                    writer.add(
                        &layout::crop_mask_file(exp_id, crop.id, encoded.extension),
                        &encoded.bytes,
                    )?;
                }

                let mut annotation = BoxAnnotation::new(crop.id, crop.bbox);
                annotation.class_name = crop.class_name.clone();
                annotation.confidence = crop.detection_confidence;
                entry = entry.with_box(annotation);
            }

            annotated.push(entry);
        }

        Ok(())
    }

    fn copy_file(
        &self,
        writer: &mut ArchiveWriter,
        source: &Path,
        entry: &str,
    ) -> Result<(), MigrationError> {
        let bytes = self.storage.read(source)?;
        writer.add(entry, &bytes)
    }

    /// COCO always, plus the selected extra format.
    fn write_annotations(
        &self,
        writer: &mut ArchiveWriter,
        images: &[AnnotatedImage],
        extra: BboxFormat,
    ) -> Result<(), MigrationError> {
        let mut formats = vec![BboxFormat::Coco];
        if extra != BboxFormat::Coco {
            formats.push(extra);
        }

        for format in formats {
            let codec = self.registry.get(format)?;
            let encoded = codec.encode(images)?;
            for warning in &encoded.warnings {
                log::warn!("{}: {}", codec.display_name(), warning);
            }
            for (path, content) in &encoded.files {
                writer.add(path, content)?;
            }
            log::debug!(
                "Wrote {} {} annotations in {} files",
                encoded.annotations_written,
                codec.display_name(),
                encoded.files.len()
            );
        }
        Ok(())
    }
}

fn write_embedding_table(
    writer: &mut ArchiveWriter,
    table: &EmbeddingTable,
    array_path: &str,
    ids_path: &str,
) -> Result<(), MigrationError> {
    if table.is_empty() {
        return Ok(());
    }
    let (npy, ids) = table.encode()?;
    writer.add(array_path, &npy)?;
    writer.add(ids_path, &ids)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::io::{Cursor, Read};
    use std::time::Duration;

    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::config::SizeEstimates;
    use crate::export::prepare_export;
    use crate::format::MaskFormat;
    use crate::model::{BoundingBox, Embedding, MaskScope};

    struct Fixture {
        _dir: tempfile::TempDir,
        catalog: MemoryCatalog,
        storage: FileStorage,
        jobs: JobStore,
        registry: FormatRegistry,
        experiment_id: u64,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let catalog = MemoryCatalog::new();

        let mut txn = catalog.begin().unwrap();
        let exp = txn.create_experiment(Experiment::new(1, "exp")).unwrap();
        let mip = storage.write(1, exp, "fov/mip.tiff", &[7u8; 64]).unwrap();
        let img = txn
            .create_image(
                ImageRecord::new(exp, "fov_01.tif", 32, 16)
                    .with_projections(Some(mip), None)
                    .with_embedding(Embedding::new("m", vec![0.5; 4])),
            )
            .unwrap();
        let crop = txn
            .create_crop(
                CropRecord::new(img, BoundingBox::new(2.0, 2.0, 8.0, 6.0))
                    .with_class("mitotic")
                    .with_embedding(Embedding::new("m", vec![1.0; 4])),
            )
            .unwrap();
        txn.create_crop_mask(
            crop,
            MaskRecord::polygon(MaskScope::Crop(0), 8, 6, vec![(1.0, 1.0), (6.0, 1.0), (6.0, 5.0)]),
        )
        .unwrap();
        txn.commit().unwrap();

        Fixture {
            _dir: dir,
            catalog,
            storage,
            jobs: JobStore::in_memory(Duration::from_secs(60)),
            registry: FormatRegistry::new(),
            experiment_id: exp,
        }
    }

    fn entry_names(bytes: &[u8]) -> BTreeSet<String> {
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        archive.file_names().map(str::to_string).collect()
    }

    #[test]
    fn test_export_writes_layout_and_completes() {
        let f = fixture();
        let options = ExportOptions::new()
            .bbox_format(BboxFormat::Yolo)
            .mask_format(MaskFormat::CocoRle);
        let plan = prepare_export(
            &f.catalog,
            &f.jobs,
            &SizeEstimates::default(),
            &[f.experiment_id],
            options,
            1,
        )
        .unwrap();

        let streamer = ExportStreamer::new(&f.catalog, &f.storage, &f.jobs, &f.registry);
        let bytes = streamer.run(&plan.job_id, &CancelToken::new()).unwrap();
        let names = entry_names(&bytes);

        let exp = f.experiment_id;
        for expected in [
            "manifest.json".to_string(),
            format!("experiments/{}/experiment.json", exp),
            format!("experiments/{}/images/1/mip.tiff", exp),
            format!("experiments/{}/images/1/metadata.json", exp),
            format!("experiments/{}/crops/1/metadata.json", exp),
            format!("experiments/{}/masks/crop_1.json", exp),
            "annotations/coco.json".to_string(),
            "annotations/yolo/classes.txt".to_string(),
            "annotations/yolo/fov_01.txt".to_string(),
            FOV_EMBEDDINGS.to_string(),
            CROP_IDS.to_string(),
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }

        let mut archive = zip::ZipArchive::new(Cursor::new(&bytes[..])).unwrap();
        assert_eq!(archive.by_index(0).unwrap().name(), "manifest.json");
        let mut manifest = String::new();
        archive
            .by_name("manifest.json")
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
        let manifest: Manifest = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest.statistics.crop_count, 1);
        assert_eq!(manifest.statistics.mask_count, 1);
        assert_eq!(manifest.statistics.embedding_count, 2);

        let job = f.jobs.require(&plan.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_manifest_counts_only_written_embeddings() {
        let f = fixture();
        let image = f.catalog.images_for_experiment(f.experiment_id).unwrap()[0].id;
        let mut txn = f.catalog.begin().unwrap();
        txn.create_crop(
            CropRecord::new(image, BoundingBox::new(12.0, 4.0, 6.0, 6.0))
                .with_embedding(Embedding::new("m", vec![1.0; 3])),
        )
        .unwrap();
        txn.commit().unwrap();

        let plan = prepare_export(
            &f.catalog,
            &f.jobs,
            &SizeEstimates::default(),
            &[f.experiment_id],
            ExportOptions::default(),
            1,
        )
        .unwrap();
        let streamer = ExportStreamer::new(&f.catalog, &f.storage, &f.jobs, &f.registry);
        let bytes = streamer.run(&plan.job_id, &CancelToken::new()).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(&bytes[..])).unwrap();
        let mut manifest = String::new();
        archive
            .by_name("manifest.json")
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
        let manifest: Manifest = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest.statistics.crop_count, 2);
        // the 3-dimensional crop row does not fit the 4-dimensional table
        assert_eq!(manifest.statistics.embedding_count, 2);

        let mut ids = String::new();
        archive.by_name(CROP_IDS).unwrap().read_to_string(&mut ids).unwrap();
        let ids: Vec<u64> = serde_json::from_str(&ids).unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_toggles_drop_optional_content() {
        let f = fixture();
        let options = ExportOptions::new()
            .fov_images(false)
            .embeddings(false)
            .masks(false);
        let plan = prepare_export(
            &f.catalog,
            &f.jobs,
            &SizeEstimates::default(),
            &[f.experiment_id],
            options,
            1,
        )
        .unwrap();
        let streamer = ExportStreamer::new(&f.catalog, &f.storage, &f.jobs, &f.registry);
        let names = entry_names(&streamer.run(&plan.job_id, &CancelToken::new()).unwrap());

        assert!(names.iter().all(|n| !n.ends_with("mip.tiff")));
        assert!(names.iter().all(|n| !n.starts_with("embeddings/")));
        assert!(names.iter().all(|n| !n.contains("/masks/")));
        assert!(names.contains("annotations/coco.json"));
        assert!(names.iter().all(|n| !n.starts_with("annotations/yolo")));
    }

    #[test]
    fn test_missing_experiment_is_skipped() {
        let f = fixture();
        let mut job = JobRecord::new(JobKind::Export, 1);
        job.export_options = Some(ExportOptions::default());
        job.experiment_ids = vec![f.experiment_id, 4242];
        f.jobs.save(&job).unwrap();

        let streamer = ExportStreamer::new(&f.catalog, &f.storage, &f.jobs, &f.registry);
        let bytes = streamer.run(&job.job_id, &CancelToken::new()).unwrap();
        let names = entry_names(&bytes);
        assert!(names.contains(&format!("experiments/{}/experiment.json", f.experiment_id)));
        assert!(names.iter().all(|n| !n.starts_with("experiments/4242")));
    }

    #[test]
    fn test_failure_marks_job_error_with_ids() {
        let f = fixture();
        let image = f.catalog.images_for_experiment(f.experiment_id).unwrap()[0].clone();
        std::fs::remove_file(image.mip_path.as_ref().unwrap()).unwrap();

        let plan = prepare_export(
            &f.catalog,
            &f.jobs,
            &SizeEstimates::default(),
            &[f.experiment_id],
            ExportOptions::default(),
            1,
        )
        .unwrap();
        let streamer = ExportStreamer::new(&f.catalog, &f.storage, &f.jobs, &f.registry);
        assert!(streamer.run(&plan.job_id, &CancelToken::new()).is_err());

        let job = f.jobs.require(&plan.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        let message = job.error_message.unwrap();
        assert!(message.starts_with("IoError"));
        assert!(message.contains(&format!("experiments: [{}]", f.experiment_id)));

        // terminal jobs cannot be streamed again
        assert!(streamer.run(&plan.job_id, &CancelToken::new()).is_err());
    }

    #[test]
    fn test_cancelled_export() {
        let f = fixture();
        let plan = prepare_export(
            &f.catalog,
            &f.jobs,
            &SizeEstimates::default(),
            &[f.experiment_id],
            ExportOptions::default(),
            1,
        )
        .unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let streamer = ExportStreamer::new(&f.catalog, &f.storage, &f.jobs, &f.registry);
        assert!(matches!(
            streamer.run(&plan.job_id, &cancel),
            Err(MigrationError::Cancelled)
        ));
        let job = f.jobs.require(&plan.job_id).unwrap();
        assert_eq!(job.error_message.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_stream_chunks() {
        let stream = ExportStream::new((0..10u8).collect(), 4);
        assert_eq!(stream.size_hint(), (3, Some(3)));
        let chunks: Vec<Vec<u8>> = stream.collect();
        assert_eq!(chunks, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
    }
}
