use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Marks which matrix a [`MinMaxScaler`] was fit on.
pub trait ScalerRole {
    const COMPONENT: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Features {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {}

impl ScalerRole for Features {
    const COMPONENT: &'static str = "feature scaler";
}

impl ScalerRole for Target {
    const COMPONENT: &'static str = "target scaler";
}

pub type FeatureScaler = MinMaxScaler<Features>;
pub type TargetScaler = MinMaxScaler<Target>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnBounds {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl ColumnBounds {
    /// Width used for scaling; constant columns keep unit scale.
    pub fn range(&self) -> f64 {
        let range = self.max - self.min;
        if range > 0.0 {
            range
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingParameters {
    pub columns: Vec<ColumnBounds>,
}

/// Per-column min/max normalization with an exact inverse.
///
/// Values outside the fitted range are not clipped: a feature scaler fit on
/// `[0, 10, 20]` maps `30` to `1.5`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct MinMaxScaler<R: ScalerRole> {
    params: Option<ScalingParameters>,
    #[serde(skip)]
    role: PhantomData<R>,
}

impl<R: ScalerRole> Default for MinMaxScaler<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ScalerRole> MinMaxScaler<R> {
    pub fn new() -> Self {
        Self {
            params: None,
            role: PhantomData,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.params.is_some()
    }

    /// Computes bounds per column. Refitting replaces the previous parameters.
    pub fn fit(&mut self, matrix: &[Vec<f64>], columns: &[String]) -> PipelineResult<()> {
        if matrix.is_empty() {
            return Err(PipelineError::schema(format!(
                "cannot fit {} on an empty matrix",
                R::COMPONENT
            )));
        }
        if columns.is_empty() {
            return Err(PipelineError::schema(format!(
                "{} needs at least one column",
                R::COMPONENT
            )));
        }

        let mut bounds: Vec<ColumnBounds> = columns
            .iter()
            .map(|name| ColumnBounds {
                name: name.clone(),
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            })
            .collect();
        for (row_idx, row) in matrix.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(PipelineError::schema(format!(
                    "row {row_idx} has {} values, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            for (column, &value) in bounds.iter_mut().zip(row) {
                if !value.is_finite() {
                    return Err(PipelineError::schema(format!(
                        "row {row_idx}: column {} is not finite",
                        column.name
                    )));
                }
                column.min = column.min.min(value);
                column.max = column.max.max(value);
            }
        }

        self.params = Some(ScalingParameters { columns: bounds });
        Ok(())
    }

    pub fn parameters(&self) -> PipelineResult<&ScalingParameters> {
        self.params
            .as_ref()
            .ok_or_else(|| PipelineError::not_fitted(R::COMPONENT))
    }

    pub fn column_names(&self) -> PipelineResult<Vec<String>> {
        Ok(self
            .parameters()?
            .columns
            .iter()
            .map(|column| column.name.clone())
            .collect())
    }

    pub fn width(&self) -> PipelineResult<usize> {
        Ok(self.parameters()?.columns.len())
    }

    pub fn transform(&self, matrix: &[Vec<f64>]) -> PipelineResult<Vec<Vec<f64>>> {
        matrix.iter().map(|row| self.transform_row(row)).collect()
    }

    pub fn transform_row(&self, row: &[f64]) -> PipelineResult<Vec<f64>> {
        let params = self.checked_parameters(row.len())?;
        Ok(params
            .columns
            .iter()
            .zip(row)
            .map(|(column, &value)| (value - column.min) / column.range())
            .collect())
    }

    pub fn inverse_transform(&self, matrix: &[Vec<f64>]) -> PipelineResult<Vec<Vec<f64>>> {
        matrix.iter().map(|row| self.inverse_row(row)).collect()
    }

    pub fn inverse_row(&self, row: &[f64]) -> PipelineResult<Vec<f64>> {
        let params = self.checked_parameters(row.len())?;
        Ok(params
            .columns
            .iter()
            .zip(row)
            .map(|(column, &value)| value * column.range() + column.min)
            .collect())
    }

    pub fn transform_value(&self, column: usize, value: f64) -> PipelineResult<f64> {
        let bounds = self.column(column)?;
        Ok((value - bounds.min) / bounds.range())
    }

    pub fn inverse_value(&self, column: usize, value: f64) -> PipelineResult<f64> {
        let bounds = self.column(column)?;
        Ok(value * bounds.range() + bounds.min)
    }

    fn column(&self, column: usize) -> PipelineResult<&ColumnBounds> {
        let params = self.parameters()?;
        params.columns.get(column).ok_or_else(|| {
            PipelineError::schema(format!(
                "{} has {} columns, no column {column}",
                R::COMPONENT,
                params.columns.len()
            ))
        })
    }

    fn checked_parameters(&self, width: usize) -> PipelineResult<&ScalingParameters> {
        let params = self.parameters()?;
        if params.columns.len() != width {
            return Err(PipelineError::schema(format!(
                "{} expects {} values, got {width}",
                R::COMPONENT,
                params.columns.len()
            )));
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn extrapolates_without_clipping() {
        let mut scaler = FeatureScaler::new();
        scaler
            .fit(&[vec![0.0], vec![10.0], vec![20.0]], &names(&["Temperature"]))
            .unwrap();
        assert_eq!(scaler.transform_row(&[30.0]).unwrap(), vec![1.5]);
        assert_eq!(scaler.transform_row(&[-10.0]).unwrap(), vec![-0.5]);
    }

    #[test]
    fn inverse_recovers_original_values() {
        let matrix = vec![
            vec![12.5, 40.0, 3.0],
            vec![18.0, 55.0, 3.0],
            vec![30.25, 62.5, 3.0],
            vec![-4.0, 38.0, 3.0],
        ];
        let mut scaler = FeatureScaler::new();
        scaler.fit(&matrix, &names(&["a", "b", "constant"])).unwrap();
        let scaled = scaler.transform(&matrix).unwrap();
        assert!(scaled.iter().all(|row| row[2] == 0.0));
        let restored = scaler.inverse_transform(&scaled).unwrap();
        for (row, original) in restored.iter().zip(&matrix) {
            for (value, expected) in row.iter().zip(original) {
                assert!((value - expected).abs() <= 1e-9 * expected.abs().max(1.0));
            }
        }
    }

    #[test]
    fn unfitted_scaler_reports_its_role() {
        let scaler = TargetScaler::new();
        match scaler.inverse_value(0, 0.5) {
            Err(PipelineError::NotFitted { component }) => assert_eq!(component, "target scaler"),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(matches!(
            FeatureScaler::new().transform_row(&[1.0]),
            Err(PipelineError::NotFitted { .. })
        ));
    }

    #[test]
    fn fit_rejects_empty_and_ragged_input() {
        let mut scaler = FeatureScaler::new();
        assert!(matches!(
            scaler.fit(&[], &names(&["a"])),
            Err(PipelineError::Schema(_))
        ));
        assert!(matches!(
            scaler.fit(&[vec![1.0, 2.0], vec![3.0]], &names(&["a", "b"])),
            Err(PipelineError::Schema(_))
        ));
        assert!(!scaler.is_fitted());
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let mut scaler = FeatureScaler::new();
        scaler
            .fit(&[vec![1.0, 2.0], vec![3.0, 4.0]], &names(&["a", "b"]))
            .unwrap();
        assert!(matches!(
            scaler.transform_row(&[1.0]),
            Err(PipelineError::Schema(_))
        ));
    }
}
