use crate::error::{PipelineError, PipelineResult};
use crate::forest::{ForestParams, RandomForestRegressor};
use crate::sequence::SequenceSet;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};

/// A regressor over windows of `window_length` normalized feature rows.
/// Outputs are in normalized target units.
pub trait SequenceModel: Send + Sync {
    fn window_length(&self) -> usize;

    fn feature_width(&self) -> usize;

    fn predict(&self, window: &[Vec<f64>]) -> PipelineResult<f64>;

    fn predict_many(&self, windows: &[Vec<Vec<f64>>]) -> PipelineResult<Vec<f64>> {
        windows.iter().map(|window| self.predict(window)).collect()
    }
}

/// Random forest over the row-major flattening of each window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestSequenceModel {
    window_length: usize,
    feature_width: usize,
    forest: RandomForestRegressor,
}

impl ForestSequenceModel {
    pub fn fit(
        set: &SequenceSet,
        window_length: usize,
        feature_width: usize,
        params: &ForestParams,
        progress: Option<&ProgressBar>,
    ) -> PipelineResult<Self> {
        if set.is_empty() {
            return Err(PipelineError::Model(
                "cannot fit a sequence model without sequences".to_string(),
            ));
        }
        let rows = set
            .sequences
            .iter()
            .map(|window| flatten(window, window_length, feature_width))
            .collect::<PipelineResult<Vec<_>>>()?;
        let forest = RandomForestRegressor::fit(&rows, &set.targets, params, progress)?;
        Ok(Self {
            window_length,
            feature_width,
            forest,
        })
    }

    pub fn forest(&self) -> &RandomForestRegressor {
        &self.forest
    }
}

impl SequenceModel for ForestSequenceModel {
    fn window_length(&self) -> usize {
        self.window_length
    }

    fn feature_width(&self) -> usize {
        self.feature_width
    }

    fn predict(&self, window: &[Vec<f64>]) -> PipelineResult<f64> {
        let flat = flatten(window, self.window_length, self.feature_width)?;
        self.forest.predict(&flat)
    }
}

fn flatten(window: &[Vec<f64>], window_length: usize, width: usize) -> PipelineResult<Vec<f64>> {
    if window.len() != window_length {
        return Err(PipelineError::Model(format!(
            "window has {} rows, model expects {window_length}",
            window.len()
        )));
    }
    let mut flat = Vec::with_capacity(window_length * width);
    for row in window {
        if row.len() != width {
            return Err(PipelineError::Model(format!(
                "window row has {} features, model expects {width}",
                row.len()
            )));
        }
        flat.extend_from_slice(row);
    }
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend_set() -> SequenceSet {
        let mut set = SequenceSet::default();
        for start in 0..30 {
            let window: Vec<Vec<f64>> = (start..start + 3)
                .map(|idx| vec![idx as f64 / 40.0, 0.5])
                .collect();
            set.push(window, (start + 3) as f64 / 40.0);
        }
        set
    }

    #[test]
    fn fit_and_predict_windows() {
        let params = ForestParams {
            n_estimators: 8,
            ..ForestParams::default()
        };
        let model = ForestSequenceModel::fit(&trend_set(), 3, 2, &params, None).unwrap();
        assert_eq!(model.window_length(), 3);
        assert_eq!(model.feature_width(), 2);
        let low = model.predict(&trend_set().sequences[0]).unwrap();
        let high = model.predict(&trend_set().sequences[29]).unwrap();
        assert!(low < high);
        assert_eq!(model.predict_many(&trend_set().sequences[..2]).unwrap().len(), 2);
    }

    #[test]
    fn window_shape_is_checked() {
        let params = ForestParams {
            n_estimators: 2,
            ..ForestParams::default()
        };
        let model = ForestSequenceModel::fit(&trend_set(), 3, 2, &params, None).unwrap();
        assert!(matches!(
            model.predict(&[vec![0.1, 0.5], vec![0.2, 0.5]]),
            Err(PipelineError::Model(_))
        ));
        assert!(matches!(
            model.predict(&[vec![0.1], vec![0.2], vec![0.3]]),
            Err(PipelineError::Model(_))
        ));
        assert!(matches!(
            ForestSequenceModel::fit(&SequenceSet::default(), 3, 2, &params, None),
            Err(PipelineError::Model(_))
        ));
    }
}
