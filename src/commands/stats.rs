use crate::dataset::Dataset;
use crate::schema::TableSchema;
use crate::stats::DatasetProfile;
use anyhow::{Context, Result};
use std::path::Path;

pub fn run(schema: TableSchema, data_path: &Path, bins: usize) -> Result<()> {
    let dataset = Dataset::load_csv(data_path, schema)
        .with_context(|| format!("Failed to load data from {}", data_path.display()))?;
    let profile = DatasetProfile::from_dataset(&dataset, bins);
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}
