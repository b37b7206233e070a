use crate::error::{PipelineError, PipelineResult};
use indicatif::ProgressBar;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of features considered at each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MaxFeatures {
    All,
    Sqrt,
    Fraction(f64),
}

impl MaxFeatures {
    pub fn parse(raw: &str) -> PipelineResult<Self> {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "all" | "" => Ok(Self::All),
            "sqrt" => Ok(Self::Sqrt),
            _ => trimmed
                .parse::<f64>()
                .ok()
                .filter(|value| *value > 0.0 && *value <= 1.0)
                .map(Self::Fraction)
                .ok_or_else(|| {
                    PipelineError::InvalidConfig(format!(
                        "max features must be all, sqrt or a fraction in (0, 1] (value: {raw})"
                    ))
                }),
        }
    }

    pub fn resolve(self, feature_count: usize) -> usize {
        let count = match self {
            Self::All => feature_count,
            Self::Sqrt => (feature_count as f64).sqrt().floor() as usize,
            Self::Fraction(fraction) => (feature_count as f64 * fraction).floor() as usize,
        };
        count.clamp(1, feature_count.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.n_estimators == 0 {
            return Err(PipelineError::InvalidConfig(
                "forest needs at least one tree".to_string(),
            ));
        }
        if self.min_samples_split < 2 {
            return Err(PipelineError::InvalidConfig(
                "min samples per split must be at least 2".to_string(),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(PipelineError::InvalidConfig(
                "min samples per leaf must be at least 1".to_string(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "max depth must be at least 1".to_string(),
            ));
        }
        if let MaxFeatures::Fraction(fraction) = self.max_features {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(PipelineError::InvalidConfig(format!(
                    "max features fraction must be in (0, 1] (value: {fraction})"
                )));
            }
        }
        Ok(())
    }
}

/// Array-encoded binary tree. A negative child `c` points at leaf `-c - 1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
}

impl RegressionTree {
    pub fn leaf_count(&self) -> usize {
        self.leaf_values.len()
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        if self.split_features.is_empty() {
            return self.leaf_values.first().copied().unwrap_or_default();
        }
        let mut node_idx = 0usize;
        loop {
            let feature_value = features[self.split_features[node_idx]];
            // NaN compares false and goes right
            let child = if feature_value <= self.thresholds[node_idx] {
                self.left_child[node_idx]
            } else {
                self.right_child[node_idx]
            };
            if child < 0 {
                return self.leaf_values[(-child - 1) as usize];
            }
            node_idx = child as usize;
        }
    }

    fn push_leaf(&mut self, value: f64) -> i32 {
        self.leaf_values.push(value);
        -(self.leaf_values.len() as i32)
    }

    fn push_split(&mut self, feature: usize, threshold: f64) -> usize {
        self.split_features.push(feature);
        self.thresholds.push(threshold);
        self.left_child.push(0);
        self.right_child.push(0);
        self.split_features.len() - 1
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Grows one CART regression tree by variance reduction.
struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    targets: &'a [f64],
    params: &'a ForestParams,
    candidate_count: usize,
    rng: StdRng,
    tree: RegressionTree,
    gains: Vec<f64>,
}

impl<'a> TreeBuilder<'a> {
    fn new(
        rows: &'a [Vec<f64>],
        targets: &'a [f64],
        params: &'a ForestParams,
        feature_count: usize,
        seed: u64,
    ) -> Self {
        Self {
            rows,
            targets,
            params,
            candidate_count: params.max_features.resolve(feature_count),
            rng: StdRng::seed_from_u64(seed),
            tree: RegressionTree::default(),
            gains: vec![0.0; feature_count],
        }
    }

    fn build(mut self) -> (RegressionTree, Vec<f64>) {
        let n = self.rows.len();
        let mut samples: Vec<usize> = if self.params.bootstrap {
            (0..n).map(|_| self.rng.gen_range(0..n)).collect()
        } else {
            (0..n).collect()
        };
        self.grow(&mut samples, 0);
        (self.tree, self.gains)
    }

    fn grow(&mut self, samples: &mut [usize], depth: usize) -> i32 {
        let n = samples.len();
        let (sum, sum_sq) = samples.iter().fold((0.0, 0.0), |(sum, sq), &idx| {
            let y = self.targets[idx];
            (sum + y, sq + y * y)
        });
        let mean = sum / n as f64;

        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        if depth_reached
            || n < self.params.min_samples_split
            || n < 2 * self.params.min_samples_leaf
        {
            return self.tree.push_leaf(mean);
        }
        let parent_sse = sum_sq - sum * sum / n as f64;
        let Some(split) = self.best_split(samples, sum, sum_sq, parent_sse) else {
            return self.tree.push_leaf(mean);
        };

        let mut boundary = 0;
        for position in 0..n {
            if self.rows[samples[position]][split.feature] <= split.threshold {
                samples.swap(boundary, position);
                boundary += 1;
            }
        }

        self.gains[split.feature] += split.gain;
        let node = self.tree.push_split(split.feature, split.threshold);
        let (left, right) = samples.split_at_mut(boundary);
        let left_child = self.grow(left, depth + 1);
        let right_child = self.grow(right, depth + 1);
        self.tree.left_child[node] = left_child;
        self.tree.right_child[node] = right_child;
        node as i32
    }

    fn best_split(
        &mut self,
        samples: &[usize],
        sum: f64,
        sum_sq: f64,
        parent_sse: f64,
    ) -> Option<SplitCandidate> {
        if parent_sse <= f64::EPSILON * sum_sq.max(1.0) {
            return None;
        }
        let n = samples.len();
        let min_leaf = self.params.min_samples_leaf;
        let feature_count = self.gains.len();
        let features: Vec<usize> = if self.candidate_count >= feature_count {
            (0..feature_count).collect()
        } else {
            rand::seq::index::sample(&mut self.rng, feature_count, self.candidate_count).into_vec()
        };

        let mut best: Option<SplitCandidate> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);
        for feature in features {
            pairs.clear();
            pairs.extend(
                samples
                    .iter()
                    .map(|&idx| (self.rows[idx][feature], self.targets[idx])),
            );
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for i in 1..n {
                let (x_prev, y_prev) = pairs[i - 1];
                left_sum += y_prev;
                left_sq += y_prev * y_prev;
                let x_next = pairs[i].0;
                if i < min_leaf || n - i < min_leaf || x_prev >= x_next {
                    continue;
                }
                let right_sum = sum - left_sum;
                let right_sq = sum_sq - left_sq;
                let left_sse = left_sq - left_sum * left_sum / i as f64;
                let right_sse = right_sq - right_sum * right_sum / (n - i) as f64;
                let gain = parent_sse - (left_sse + right_sse);
                if gain > 0.0 && best.as_ref().map_or(true, |current| gain > current.gain) {
                    let midpoint = x_prev + (x_next - x_prev) / 2.0;
                    let threshold = if midpoint < x_next { midpoint } else { x_prev };
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Bagged ensemble of regression trees, the seeded stand-in for a
/// scikit-learn style `RandomForestRegressor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    trees: Vec<RegressionTree>,
    feature_count: usize,
    importances: Vec<f64>,
}

impl RandomForestRegressor {
    /// Fits every tree in parallel. Tree `i` draws from its own RNG seeded with
    /// `seed + i`, so the result does not depend on thread scheduling.
    pub fn fit(
        rows: &[Vec<f64>],
        targets: &[f64],
        params: &ForestParams,
        progress: Option<&ProgressBar>,
    ) -> PipelineResult<Self> {
        params.validate()?;
        if rows.is_empty() {
            return Err(PipelineError::Model(
                "cannot fit a forest without samples".to_string(),
            ));
        }
        if rows.len() != targets.len() {
            return Err(PipelineError::Model(format!(
                "{} samples but {} targets",
                rows.len(),
                targets.len()
            )));
        }
        let feature_count = rows[0].len();
        if feature_count == 0 {
            return Err(PipelineError::Model(
                "samples have no features".to_string(),
            ));
        }
        if let Some(idx) = rows.iter().position(|row| row.len() != feature_count) {
            return Err(PipelineError::Model(format!(
                "sample {idx} has {} features, expected {feature_count}",
                rows[idx].len()
            )));
        }
        if rows.iter().flatten().chain(targets).any(|value| !value.is_finite()) {
            return Err(PipelineError::Model(
                "forest input contains non-finite values".to_string(),
            ));
        }

        let fitted: Vec<(RegressionTree, Vec<f64>)> = (0..params.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let seed = params.seed.wrapping_add(tree_idx as u64);
                let result = TreeBuilder::new(rows, targets, params, feature_count, seed).build();
                if let Some(bar) = progress {
                    bar.inc(1);
                }
                result
            })
            .collect();

        let mut importances = vec![0.0; feature_count];
        let mut trees = Vec::with_capacity(fitted.len());
        for (tree, gains) in fitted {
            let total: f64 = gains.iter().sum();
            if total > 0.0 {
                for (importance, gain) in importances.iter_mut().zip(&gains) {
                    *importance += gain / total;
                }
            }
            trees.push(tree);
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|value| *value /= total);
        }

        debug!(
            "Fitted forest: {} trees, {} features, {} samples, {} leaves",
            trees.len(),
            feature_count,
            rows.len(),
            trees.iter().map(RegressionTree::leaf_count).sum::<usize>()
        );

        Ok(Self {
            trees,
            feature_count,
            importances,
        })
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Normalized mean impurity decrease per feature; sums to 1 unless no
    /// tree ever split.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn predict(&self, features: &[f64]) -> PipelineResult<f64> {
        if features.len() != self.feature_count {
            return Err(PipelineError::Model(format!(
                "forest expects {} features, got {}",
                self.feature_count,
                features.len()
            )));
        }
        if self.trees.is_empty() {
            return Err(PipelineError::not_fitted("random forest"));
        }
        let total: f64 = self.trees.iter().map(|tree| tree.predict(features)).sum();
        Ok(total / self.trees.len() as f64)
    }

    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> PipelineResult<Vec<f64>> {
        rows.iter().map(|row| self.predict(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..40)
            .map(|idx| vec![idx as f64, ((idx * 7) % 5) as f64])
            .collect();
        let targets = rows
            .iter()
            .map(|row| if row[0] < 20.0 { 10.0 } else { 50.0 })
            .collect();
        (rows, targets)
    }

    fn small_params() -> ForestParams {
        ForestParams {
            n_estimators: 12,
            ..ForestParams::default()
        }
    }

    #[test]
    fn single_tree_without_bootstrap_fits_a_step() {
        let (rows, targets) = step_data();
        let params = ForestParams {
            n_estimators: 1,
            bootstrap: false,
            ..ForestParams::default()
        };
        let forest = RandomForestRegressor::fit(&rows, &targets, &params, None).unwrap();
        assert_eq!(forest.predict(&[3.0, 1.0]).unwrap(), 10.0);
        assert_eq!(forest.predict(&[33.0, 4.0]).unwrap(), 50.0);
        assert_eq!(forest.feature_importances(), &[1.0, 0.0]);
    }

    #[test]
    fn same_seed_gives_identical_forests() {
        let (rows, targets) = step_data();
        let first = RandomForestRegressor::fit(&rows, &targets, &small_params(), None).unwrap();
        let second = RandomForestRegressor::fit(&rows, &targets, &small_params(), None).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.predict(&[19.5, 2.0]).unwrap(),
            second.predict(&[19.5, 2.0]).unwrap()
        );
    }

    #[test]
    fn importance_favours_the_informative_feature() {
        let (rows, targets) = step_data();
        let params = ForestParams {
            max_features: MaxFeatures::Sqrt,
            ..small_params()
        };
        let forest = RandomForestRegressor::fit(&rows, &targets, &params, None).unwrap();
        let importances = forest.feature_importances();
        assert!(importances[0] > importances[1]);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn constant_target_yields_single_leaves() {
        let rows = vec![vec![1.0], vec![2.0], vec![3.0]];
        let targets = vec![4.0, 4.0, 4.0];
        let forest = RandomForestRegressor::fit(&rows, &targets, &small_params(), None).unwrap();
        assert_eq!(forest.predict(&[100.0]).unwrap(), 4.0);
        assert!(forest.feature_importances().iter().all(|value| *value == 0.0));
    }

    #[test]
    fn predict_checks_width() {
        let (rows, targets) = step_data();
        let forest = RandomForestRegressor::fit(&rows, &targets, &small_params(), None).unwrap();
        assert!(matches!(
            forest.predict(&[1.0]),
            Err(PipelineError::Model(_))
        ));
    }

    #[test]
    fn invalid_params_are_rejected() {
        let (rows, targets) = step_data();
        let params = ForestParams {
            n_estimators: 0,
            ..ForestParams::default()
        };
        assert!(matches!(
            RandomForestRegressor::fit(&rows, &targets, &params, None),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(MaxFeatures::parse("1.5").is_err());
        assert_eq!(MaxFeatures::parse("0.5").unwrap(), MaxFeatures::Fraction(0.5));
        assert_eq!(MaxFeatures::parse("SQRT").unwrap(), MaxFeatures::Sqrt);
    }

    #[test]
    fn max_features_resolution() {
        assert_eq!(MaxFeatures::All.resolve(13), 13);
        assert_eq!(MaxFeatures::Sqrt.resolve(13), 3);
        assert_eq!(MaxFeatures::Fraction(0.01).resolve(13), 1);
    }
}
