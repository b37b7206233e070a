use crate::config::PipelineSettings;
use crate::dataset::Dataset;
use crate::schema::TableSchema;
use crate::training::{TrainingOutcome, TrainingPipeline};
use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

pub use crate::bundle::SUMMARY_FILE;

pub fn run(
    settings: &PipelineSettings,
    schema: TableSchema,
    data_path: &Path,
    bundle_dir: &Path,
    summary_path: Option<PathBuf>,
) -> Result<()> {
    info!("Starting training from {}", data_path.display());
    let dataset = Dataset::load_csv(data_path, schema)
        .with_context(|| format!("Failed to load training data from {}", data_path.display()))?;

    let pb = ProgressBar::new(settings.training.model.n_estimators as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} trees ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    let pipeline = TrainingPipeline::new(settings.training.clone())?.with_progress(pb.clone());
    let outcome = pipeline.run(&dataset);
    pb.finish_and_clear();

    let trained = match outcome? {
        TrainingOutcome::Trained(trained) => trained,
        TrainingOutcome::InsufficientHistory {
            rows,
            sequences,
            window_length,
        } => {
            return Err(anyhow!(
                "Not enough history to train: {rows} rows produced {sequences} sequences of length {window_length}"
            ));
        }
    };

    trained
        .bundle
        .save(bundle_dir)
        .with_context(|| format!("Failed to save bundle to {}", bundle_dir.display()))?;

    let payload = serde_json::to_string_pretty(&trained.report)?;
    let summary_path = summary_path.unwrap_or_else(|| bundle_dir.join(SUMMARY_FILE));
    fs::write(&summary_path, &payload)
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;

    println!("Saved artifact bundle to {}", bundle_dir.display());
    println!("{payload}");
    Ok(())
}
