//! cellport command line front-end.
//!
//! Operates on a JSON-persisted catalog (`<data-dir>/catalog.json`), a file
//! job store (`<data-dir>/jobs`) and the storage root from the configuration.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use cellport::config::{MigrationConfig, default_data_dir};
use cellport::jobs::{FileBackend, JobStore};
use cellport::{
    ArchiveFormat, BboxFormat, ExportOptions, FileStorage, MaskFormat, MemoryCatalog,
    MigrationError, MigrationService,
};

/// Export and import experiment bundles as ZIP archives
#[derive(Parser, Debug)]
#[command(name = "cellport", version, long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the catalog and job records
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG also applies
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prepare and write an export archive
    Export(ExportArgs),
    /// Validate an archive for import
    Validate {
        /// Requesting user
        #[arg(short, long)]
        user: u64,
        /// Archive to validate
        archive: PathBuf,
    },
    /// Import a validated archive
    Import {
        #[arg(short, long)]
        user: u64,
        /// Job ID printed by `validate`
        #[arg(short, long)]
        job: String,
        /// Name of the new experiment (required for COCO/YOLO/VOC/CSV)
        #[arg(short, long)]
        name: Option<String>,
        /// Confirmed archive format; defaults to the detected one
        #[arg(short, long)]
        format: Option<ArchiveFormat>,
        /// Do not create crops from annotations
        #[arg(long)]
        no_crops: bool,
    },
    /// Show the status of a job
    Status {
        #[arg(short, long)]
        user: u64,
        #[arg(short, long)]
        job: String,
    },
    /// Write a configuration file with default values
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[arg(short, long)]
    user: u64,
    /// Experiment IDs (comma separated)
    #[arg(short, long, value_delimiter = ',', required = true)]
    experiments: Vec<u64>,
    /// Output archive
    #[arg(short, long)]
    output: PathBuf,
    /// Additional bounding-box format (coco, yolo, voc, csv)
    #[arg(long, default_value = "coco")]
    bbox_format: BboxFormat,
    /// Mask serialization (png, coco_rle, coco_string_rle, polygon)
    #[arg(long, default_value = "png")]
    mask_format: MaskFormat,
    #[arg(long)]
    no_fov_images: bool,
    #[arg(long)]
    no_crop_images: bool,
    #[arg(long)]
    no_embeddings: bool,
    #[arg(long)]
    no_masks: bool,
}

fn init_logging(cli: &Cli, config: &MigrationConfig) {
    let level = cli
        .log_level
        .as_deref()
        .and_then(|name| name.parse::<log::LevelFilter>().ok())
        .unwrap_or_else(|| config.log_level.to_level_filter());
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), MigrationError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli, config: MigrationConfig, data_dir: PathBuf) -> Result<(), MigrationError> {
    if let Command::InitConfig { path } = &cli.command {
        MigrationConfig::new()
            .save(path)
            .map_err(|e| MigrationError::validation(e.to_string()))?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let catalog_path = data_dir.join("catalog.json");
    let catalog = Arc::new(MemoryCatalog::open(&catalog_path)?);
    let jobs = JobStore::new(
        Arc::new(FileBackend::open(data_dir.join("jobs"))?),
        config.job_ttl(),
    );
    let storage = Arc::new(FileStorage::new(config.storage_root.clone()));
    let service = MigrationService::new(catalog.clone(), storage, jobs, Arc::new(config));

    match cli.command {
        Command::Export(args) => {
            let options = ExportOptions::new()
                .fov_images(!args.no_fov_images)
                .crop_images(!args.no_crop_images)
                .embeddings(!args.no_embeddings)
                .masks(!args.no_masks)
                .bbox_format(args.bbox_format)
                .mask_format(args.mask_format);
            let plan = service.prepare_export(&args.experiments, options, args.user)?;
            log::info!("Estimated archive size: {} bytes", plan.estimated_bytes);

            let mut file = std::fs::File::create(&args.output)?;
            for chunk in service.generate_export_stream(&plan.job_id)? {
                file.write_all(&chunk)?;
            }
            file.flush()?;
            print_json(&service.export_status(&plan.job_id, args.user)?)?;
        }
        Command::Validate { user, archive } => {
            let bytes = std::fs::read(&archive)?;
            print_json(&service.validate_import(&bytes, user)?)?;
        }
        Command::Import {
            user,
            job,
            name,
            format,
            no_crops,
        } => {
            let format = match format {
                Some(format) => format,
                None => service
                    .jobs()
                    .get_for_user(&job, user)?
                    .and_then(|record| record.detected_format())
                    .ok_or_else(|| MigrationError::not_found(format!("validated import job {}", job)))?,
            };
            let outcome = service.execute_import(&job, name.as_deref(), format, !no_crops, user)?;
            catalog.save(&catalog_path)?;
            print_json(&outcome)?;
        }
        Command::Status { user, job } => {
            let view = service
                .export_status(&job, user)
                .or_else(|_| service.import_status(&job, user))?;
            print_json(&view)?;
        }
        Command::InitConfig { .. } => {}
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

    let config = match &cli.config {
        Some(path) => match MigrationConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => MigrationConfig::rooted_at(&data_dir),
    };
    init_logging(&cli, &config);

    match run(cli, config, data_dir) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error ({}): {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}
