use crate::schema::{FeatureInputs, Observation, TableSchema};
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

pub const DEFAULT_Z_THRESHOLD: f64 = 2.0;
pub const DEFAULT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftDirection {
    High,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedFeature {
    pub feature: String,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub z_score: f64,
    pub direction: DriftDirection,
}

/// Z-scores of one inference row against the history of its group.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub group: String,
    pub history_rows: usize,
    pub scores: BTreeMap<String, f64>,
    pub flagged: Vec<FlaggedFeature>,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn has_drift(&self) -> bool {
        !self.flagged.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DriftDetector {
    threshold: f64,
    epsilon: f64,
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_Z_THRESHOLD,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl DriftDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Scores every numeric field of `inputs` against the rows of `history`
    /// that belong to `group`. Advisory only: never an error, and an unknown
    /// group yields an empty report.
    pub fn assess(
        &self,
        schema: &TableSchema,
        inputs: &FeatureInputs,
        group: &str,
        history: &[Observation],
    ) -> DriftReport {
        let rows: Vec<&Observation> = history.iter().filter(|obs| obs.group == group).collect();
        let mut report = DriftReport {
            group: group.to_string(),
            history_rows: rows.len(),
            scores: BTreeMap::new(),
            flagged: Vec::new(),
        };
        if rows.is_empty() {
            return report;
        }

        for (idx, column) in schema.numeric_columns.iter().enumerate() {
            let Some(&value) = inputs.numeric.get(idx) else {
                continue;
            };
            let samples: Vec<f64> = rows
                .iter()
                .filter_map(|obs| obs.inputs.numeric.get(idx).copied())
                .collect();
            let mean = samples.iter().mean();
            let std_dev = match samples.iter().std_dev() {
                std if std.is_nan() => 0.0,
                std => std,
            };
            let z_score = (value - mean) / std_dev.max(self.epsilon);
            report.scores.insert(column.clone(), z_score);
            if z_score.abs() > self.threshold {
                report.flagged.push(FlaggedFeature {
                    feature: column.clone(),
                    value,
                    mean,
                    std_dev,
                    z_score,
                    direction: if z_score > 0.0 {
                        DriftDirection::High
                    } else {
                        DriftDirection::Low
                    },
                });
            }
        }
        report
    }
}
