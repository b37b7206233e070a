use crate::drift::DEFAULT_Z_THRESHOLD;
use crate::forest::{ForestParams, MaxFeatures};
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::schema::TableSchema;
use crate::stats::DEFAULT_HISTOGRAM_BINS;
use crate::training::TrainingConfig;
use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Settings shared by every command. Missing keys fall back to defaults.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub training: TrainingConfig,
    pub drift_z_threshold: f64,
    pub history_limit: usize,
    pub histogram_bins: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            training: TrainingConfig::default(),
            drift_z_threshold: DEFAULT_Z_THRESHOLD,
            history_limit: DEFAULT_HISTORY_LIMIT,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
        }
    }
}

impl PipelineSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let default_forest = &defaults.training.model;

        let window_length = setting_usize(
            settings,
            "WINDOW_LENGTH",
            defaults.training.window_length,
            1,
        )?;
        let train_fraction = setting_f64(
            settings,
            "TRAIN_FRACTION",
            defaults.training.train_fraction,
            Some(0.0),
            Some(1.0),
        )?;
        let max_gap = match setting(settings, "MAX_GAP_HOURS") {
            Some(_) => {
                let hours = setting_f64(settings, "MAX_GAP_HOURS", 0.0, Some(0.0), None)?;
                if hours <= 0.0 {
                    return Err(anyhow!(
                        "Setting MAX_GAP_HOURS must be > 0 (value: {})",
                        hours
                    ));
                }
                Some(Duration::seconds((hours * 3600.0).round() as i64))
            }
            None => None,
        };

        let max_depth = match setting(settings, "FOREST_MAX_DEPTH") {
            Some(_) => Some(setting_usize(settings, "FOREST_MAX_DEPTH", 0, 1)?),
            None => default_forest.max_depth,
        };
        let max_features = match setting(settings, "FOREST_MAX_FEATURES") {
            Some(raw) => MaxFeatures::parse(raw)
                .with_context(|| format!("Invalid setting FOREST_MAX_FEATURES (value: {raw})"))?,
            None => default_forest.max_features,
        };
        let model = ForestParams {
            n_estimators: setting_usize(
                settings,
                "FOREST_TREES",
                default_forest.n_estimators,
                1,
            )?,
            max_depth,
            min_samples_split: setting_usize(
                settings,
                "FOREST_MIN_SAMPLES_SPLIT",
                default_forest.min_samples_split,
                2,
            )?,
            min_samples_leaf: setting_usize(
                settings,
                "FOREST_MIN_SAMPLES_LEAF",
                default_forest.min_samples_leaf,
                1,
            )?,
            max_features,
            bootstrap: setting_bool(settings, "FOREST_BOOTSTRAP", default_forest.bootstrap)?,
            seed: setting_usize(settings, "FOREST_SEED", default_forest.seed as usize, 0)? as u64,
        };
        let ranker = ForestParams {
            n_estimators: setting_usize(
                settings,
                "RANKER_TREES",
                defaults.training.ranker.n_estimators,
                1,
            )?,
            ..model.clone()
        };

        let training = TrainingConfig {
            window_length,
            train_fraction,
            max_gap,
            rank_features: setting_bool(settings, "RANK_FEATURES", false)?,
            dropped_features: setting_list(settings, "DROPPED_FEATURES"),
            model,
            ranker,
        };

        Ok(Self {
            training,
            drift_z_threshold: setting_f64(
                settings,
                "DRIFT_Z_THRESHOLD",
                defaults.drift_z_threshold,
                Some(0.0),
                None,
            )?,
            history_limit: setting_usize(settings, "HISTORY_LIMIT", defaults.history_limit, 1)?,
            histogram_bins: setting_usize(
                settings,
                "HISTOGRAM_BINS",
                defaults.histogram_bins,
                1,
            )?,
        })
    }

    /// Reads a flat JSON object of settings; `None` yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings = parse_settings_json(&raw)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        Self::from_settings_map(&settings)
    }
}

/// Loads a JSON table schema, or the built-in energy schema when no path is given.
pub fn load_schema(path: Option<&Path>) -> Result<TableSchema> {
    let schema = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read schema file {}", path.display()))?;
            serde_json::from_str::<TableSchema>(&raw)
                .with_context(|| format!("Invalid schema file {}", path.display()))?
        }
        None => TableSchema::energy_default(),
    };
    schema.validate()?;
    Ok(schema)
}

fn parse_settings_json(raw: &str) -> Result<HashMap<String, String>> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(entries) = value else {
        return Err(anyhow!("settings must be a JSON object"));
    };
    let mut settings = HashMap::with_capacity(entries.len());
    for (key, value) in entries {
        let text = match value {
            Value::Null => continue,
            Value::String(text) => text,
            Value::Bool(flag) => flag.to_string(),
            Value::Number(number) => number.to_string(),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(text) => Ok(text.clone()),
                    Value::Number(number) => Ok(number.to_string()),
                    _ => Err(anyhow!("Setting {} must be a list of strings", key)),
                })
                .collect::<Result<Vec<_>>>()?
                .join(","),
            Value::Object(_) => {
                return Err(anyhow!("Setting {} must not be an object", key));
            }
        };
        settings.insert(key.to_ascii_uppercase(), text);
    }
    Ok(settings)
}

fn setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 || value < 0.0 {
        return Err(anyhow!(
            "Setting {} must be a non-negative integer (value: {})",
            key,
            raw
        ));
    }
    let value = value as usize;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}

fn setting_bool(settings: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    let Some(raw) = setting(settings, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(anyhow!("Setting {} must be a boolean (value: {})", key, raw)),
    }
}

fn setting_list(settings: &HashMap<String, String>, key: &str) -> Vec<String> {
    setting(settings, key)
        .map(|raw| {
            raw.trim_matches(|c| c == '[' || c == ']')
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
