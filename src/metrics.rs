use serde::Serialize;

/// Regression quality on held-out data, in physical target units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMetrics {
    pub samples: usize,
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl EvaluationMetrics {
    /// `None` for empty or mismatched input. R² is 0 when the actual values
    /// have no variance.
    pub fn evaluate(actual: &[f64], predicted: &[f64]) -> Option<Self> {
        if actual.is_empty() || actual.len() != predicted.len() {
            return None;
        }
        let n = actual.len() as f64;
        let mean = actual.iter().sum::<f64>() / n;
        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        let mut abs_sum = 0.0;
        for (&y, &y_hat) in actual.iter().zip(predicted) {
            let residual = y - y_hat;
            ss_res += residual * residual;
            abs_sum += residual.abs();
            ss_tot += (y - mean) * (y - mean);
        }
        let mse = ss_res / n;
        let r2 = if ss_tot > f64::EPSILON {
            1.0 - ss_res / ss_tot
        } else {
            0.0
        };
        Some(Self {
            samples: actual.len(),
            mse,
            rmse: mse.sqrt(),
            mae: abs_sum / n,
            r2,
        })
    }
}
