use crate::error::{PipelineError, PipelineResult};
use crate::forest::{ForestParams, RandomForestRegressor};
use log::info;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureImportance {
    pub feature: String,
    pub score: f64,
}

/// Ranks encoded feature columns with an auxiliary forest. The ranking is
/// advisory: it never removes columns on its own.
#[derive(Debug, Clone)]
pub struct FeatureImportanceRanker {
    params: ForestParams,
}

impl FeatureImportanceRanker {
    pub fn new(params: ForestParams) -> Self {
        Self { params }
    }

    /// Scores sorted descending; equal scores are ordered by feature name.
    pub fn rank(
        &self,
        rows: &[Vec<f64>],
        target: &[f64],
        names: &[String],
    ) -> PipelineResult<Vec<FeatureImportance>> {
        if let Some(row) = rows.first() {
            if row.len() != names.len() {
                return Err(PipelineError::schema(format!(
                    "{} feature names for {} columns",
                    names.len(),
                    row.len()
                )));
            }
        }
        let forest = RandomForestRegressor::fit(rows, target, &self.params, None)?;
        let mut ranking: Vec<FeatureImportance> = names
            .iter()
            .zip(forest.feature_importances())
            .map(|(name, &score)| FeatureImportance {
                feature: name.clone(),
                score,
            })
            .collect();
        ranking.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.feature.cmp(&b.feature))
        });

        if let Some(top) = ranking.first() {
            info!(
                "Feature ranking over {} rows: top feature {} ({:.4})",
                rows.len(),
                top.feature,
                top.score
            );
        }
        Ok(ranking)
    }
}
