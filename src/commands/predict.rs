use crate::bundle::TrainedArtifactBundle;
use crate::config::PipelineSettings;
use crate::dataset::Dataset;
use crate::drift::DriftDetector;
use crate::inference::{InferencePipeline, InferenceRequest};
use anyhow::{anyhow, Context, Result};
use log::warn;
use std::fs;
use std::path::Path;

pub fn run(
    settings: &PipelineSettings,
    bundle_dir: &Path,
    history_path: Option<&Path>,
    request: &InferenceRequest,
) -> Result<()> {
    let bundle: TrainedArtifactBundle = TrainedArtifactBundle::load(bundle_dir)
        .with_context(|| format!("Failed to load bundle from {}", bundle_dir.display()))?;
    let history = match history_path {
        Some(path) => Some(
            Dataset::load_csv(path, bundle.schema().clone())
                .with_context(|| format!("Failed to load history from {}", path.display()))?,
        ),
        None => None,
    };
    let history_rows = history
        .as_ref()
        .map(|dataset| dataset.observations())
        .unwrap_or_default();

    let pipeline = InferencePipeline::new(&bundle)?
        .with_detector(DriftDetector::new(settings.drift_z_threshold));
    let prediction = pipeline.predict(request, history_rows)?;
    for flag in &prediction.drift.flagged {
        warn!(
            "{} = {} is {:.2} standard deviations from the {} mean {:.2}",
            flag.feature, flag.value, flag.z_score, prediction.group, flag.mean
        );
    }

    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}

/// Builds a request from an optional JSON file plus command-line values.
/// Command-line values override the file.
pub fn build_request(
    request_path: Option<&Path>,
    group: Option<String>,
    timestamp: Option<String>,
    fields: &[String],
) -> Result<InferenceRequest> {
    let mut request = match request_path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read request {}", path.display()))?;
            serde_json::from_str::<InferenceRequest>(&raw)
                .with_context(|| format!("Invalid request {}", path.display()))?
        }
        None => InferenceRequest::default(),
    };
    if let Some(group) = group {
        request.group = group;
    }
    if timestamp.is_some() {
        request.timestamp = timestamp;
    }
    for field in fields {
        let (name, value) = field
            .split_once('=')
            .ok_or_else(|| anyhow!("Field {field:?} must be written as NAME=VALUE"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("Field {field:?} has an empty name"));
        }
        request.fields.insert(name.to_string(), value.trim().to_string());
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_override_the_request_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        fs::write(
            &path,
            r#"{"group": "Norway", "fields": {"Temperature": "20", "Holiday": "No"}}"#,
        )
        .unwrap();
        let request = build_request(
            Some(path.as_path()),
            None,
            Some("2024-01-05".to_string()),
            &["Temperature=31.5".to_string(), "HVACUsage = On".to_string()],
        )
        .unwrap();
        assert_eq!(request.group, "Norway");
        assert_eq!(request.timestamp.as_deref(), Some("2024-01-05"));
        assert_eq!(request.fields["Temperature"], "31.5");
        assert_eq!(request.fields["Holiday"], "No");
        assert_eq!(request.fields["HVACUsage"], "On");
    }

    #[test]
    fn malformed_field_is_rejected() {
        assert!(build_request(None, None, None, &["Temperature".to_string()]).is_err());
        assert!(build_request(None, None, None, &["=5".to_string()]).is_err());
    }
}
