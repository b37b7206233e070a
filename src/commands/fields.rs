use crate::bundle::TrainedArtifactBundle;
use crate::inference::InferencePipeline;
use anyhow::{Context, Result};
use std::path::Path;

pub fn run(bundle_dir: &Path) -> Result<()> {
    let bundle: TrainedArtifactBundle = TrainedArtifactBundle::load(bundle_dir)
        .with_context(|| format!("Failed to load bundle from {}", bundle_dir.display()))?;
    let pipeline = InferencePipeline::new(&bundle)?;
    println!("{}", serde_json::to_string_pretty(&pipeline.input_fields())?);
    Ok(())
}
