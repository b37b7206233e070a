use crate::config::PipelineSettings;
use crate::dataset::Dataset;
use crate::encoding::FeatureEncoder;
use crate::importance::FeatureImportanceRanker;
use crate::schema::TableSchema;
use anyhow::{anyhow, Context, Result};
use log::info;
use std::path::Path;

pub fn run(settings: &PipelineSettings, schema: TableSchema, data_path: &Path) -> Result<()> {
    let dataset = Dataset::load_csv(data_path, schema)
        .with_context(|| format!("Failed to load data from {}", data_path.display()))?;
    if dataset.is_empty() {
        return Err(anyhow!("{} has no rows to rank", data_path.display()));
    }
    let encoder = FeatureEncoder::fit(dataset.schema(), dataset.observations())?;

    let mut rows = Vec::with_capacity(dataset.len());
    let mut targets = Vec::with_capacity(dataset.len());
    for observation in dataset.observations() {
        let row = encoder.encode_observation(observation)?;
        targets.push(row.target());
        rows.push(row.features().to_vec());
    }

    info!(
        "Ranking {} features with {} trees",
        encoder.layout().width(),
        settings.training.ranker.n_estimators
    );
    let ranking = FeatureImportanceRanker::new(settings.training.ranker.clone()).rank(
        &rows,
        &targets,
        encoder.layout().columns(),
    )?;
    println!("{}", serde_json::to_string_pretty(&ranking)?);
    Ok(())
}
