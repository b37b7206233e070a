use crate::bundle::TrainedArtifactBundle;
use crate::dataset::Dataset;
use crate::encoding::FeatureEncoder;
use crate::error::{PipelineError, PipelineResult};
use crate::forest::ForestParams;
use crate::importance::{FeatureImportance, FeatureImportanceRanker};
use crate::metrics::EvaluationMetrics;
use crate::model::{ForestSequenceModel, SequenceModel};
use crate::scaler::{FeatureScaler, TargetScaler};
use crate::sequence::{
    contiguous_segments, irregular_gaps, SequenceBuilder, SequenceSet, Window, IRREGULAR_GAP_FACTOR,
};
use crate::split::ChronologicalSplitter;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use indicatif::ProgressBar;
use log::{info, warn};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub window_length: usize,
    pub train_fraction: f64,
    /// Largest timestamp spacing allowed inside one window; `None` never splits.
    pub max_gap: Option<Duration>,
    pub rank_features: bool,
    /// Encoded column names removed before scaling.
    pub dropped_features: Vec<String>,
    pub model: ForestParams,
    pub ranker: ForestParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            window_length: 7,
            train_fraction: 0.8,
            max_gap: None,
            rank_features: false,
            dropped_features: Vec::new(),
            model: ForestParams::default(),
            ranker: ForestParams {
                n_estimators: 50,
                ..ForestParams::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingReport {
    pub bundle_id: String,
    pub trained_at: DateTime<Utc>,
    pub observations: usize,
    pub groups: usize,
    pub segments: usize,
    /// Spacing jumps left inside segments; windows may span them.
    pub irregular_gaps: usize,
    pub sequences: usize,
    pub train_sequences: usize,
    pub test_sequences: usize,
    pub window_length: usize,
    pub train_fraction: f64,
    pub feature_columns: Vec<String>,
    pub dropped_columns: Vec<String>,
    pub target: String,
    pub feature_ranking: Option<Vec<FeatureImportance>>,
    pub evaluation: Option<EvaluationMetrics>,
    pub hyperparameters: ForestParams,
}

#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub bundle: TrainedArtifactBundle,
    pub report: TrainingReport,
}

/// Result of a training run. Too little history is an expected outcome that
/// callers have to handle, not an error.
#[derive(Debug, Clone)]
pub enum TrainingOutcome {
    Trained(Box<TrainedModel>),
    InsufficientHistory {
        rows: usize,
        sequences: usize,
        window_length: usize,
    },
}

impl TrainingOutcome {
    pub fn trained(self) -> Option<TrainedModel> {
        match self {
            Self::Trained(model) => Some(*model),
            Self::InsufficientHistory { .. } => None,
        }
    }
}

pub struct TrainingPipeline {
    config: TrainingConfig,
    builder: SequenceBuilder,
    splitter: ChronologicalSplitter,
    progress: Option<ProgressBar>,
}

impl TrainingPipeline {
    pub fn new(config: TrainingConfig) -> PipelineResult<Self> {
        let builder = SequenceBuilder::new(config.window_length)?;
        let splitter = ChronologicalSplitter::new(config.train_fraction)?;
        config.model.validate()?;
        if config.rank_features {
            config.ranker.validate()?;
        }
        if let Some(gap) = config.max_gap {
            if gap <= Duration::zero() {
                return Err(PipelineError::InvalidConfig(
                    "maximum timestamp gap must be positive".to_string(),
                ));
            }
        }
        Ok(Self {
            config,
            builder,
            splitter,
            progress: None,
        })
    }

    /// Reports one tick per fitted tree of the sequence model.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn run(&self, dataset: &Dataset) -> PipelineResult<TrainingOutcome> {
        let window_length = self.config.window_length;
        let schema = dataset.schema();
        let observations = dataset.observations();
        if observations.is_empty() {
            warn!("Training dataset is empty");
            return Ok(TrainingOutcome::InsufficientHistory {
                rows: 0,
                sequences: 0,
                window_length,
            });
        }

        let full_encoder = FeatureEncoder::fit(schema, observations)?;
        let feature_ranking = if self.config.rank_features {
            Some(self.rank(&full_encoder, dataset)?)
        } else {
            None
        };
        let encoder = if self.config.dropped_features.is_empty() {
            full_encoder
        } else {
            full_encoder.without_columns(&self.config.dropped_features)?
        };
        let layout = encoder.layout().clone();
        let width = layout.width();

        let mut features = Vec::with_capacity(observations.len());
        let mut targets = Vec::with_capacity(observations.len());
        for observation in observations {
            let row = encoder.encode_observation(observation)?;
            targets.push(vec![row.target()]);
            features.push(row.features().to_vec());
        }

        let mut feature_scaler = FeatureScaler::new();
        feature_scaler.fit(&features, layout.columns())?;
        let mut target_scaler = TargetScaler::new();
        target_scaler.fit(&targets, &[layout.target().to_string()])?;

        let mut scaled = feature_scaler.transform(&features)?;
        for (row, target) in scaled.iter_mut().zip(target_scaler.transform(&targets)?) {
            row.extend(target);
        }

        let segments = contiguous_segments(observations, self.config.max_gap);
        let gaps = irregular_gaps(observations, &segments, IRREGULAR_GAP_FACTOR);
        for gap in &gaps {
            warn!(
                "{}: {} between {} and {} is over {}x the median spacing of {}; windows span it (set a maximum gap to split)",
                gap.group,
                gap.gap(),
                gap.before,
                gap.after,
                IRREGULAR_GAP_FACTOR,
                gap.median
            );
        }
        let mut keyed: Vec<(NaiveDateTime, Window, f64)> = Vec::new();
        for segment in &segments {
            let matrix: Vec<Vec<f64>> = segment.iter().map(|&idx| scaled[idx].clone()).collect();
            let set = self.builder.build(&matrix)?;
            for (offset, (window, target)) in set.sequences.into_iter().zip(set.targets).enumerate()
            {
                let target_row = segment[offset + window_length];
                keyed.push((observations[target_row].timestamp, window, target));
            }
        }
        keyed.sort_by_key(|(timestamp, _, _)| *timestamp);

        let mut sequences = SequenceSet::default();
        for (_, window, target) in keyed {
            sequences.push(window, target);
        }
        let total_sequences = sequences.len();
        info!(
            "Built {} sequences of length {} from {} observations in {} segments",
            total_sequences,
            window_length,
            observations.len(),
            segments.len()
        );

        let split = self.splitter.split(sequences);
        if split.train.is_empty() {
            warn!(
                "Not enough history to train: {} observations, {} sequences",
                observations.len(),
                total_sequences
            );
            return Ok(TrainingOutcome::InsufficientHistory {
                rows: observations.len(),
                sequences: total_sequences,
                window_length,
            });
        }

        info!(
            "Fitting sequence model on {} sequences ({} held out)",
            split.train.len(),
            split.test.len()
        );
        let model = ForestSequenceModel::fit(
            &split.train,
            window_length,
            width,
            &self.config.model,
            self.progress.as_ref(),
        )?;

        let evaluation = if split.test.is_empty() {
            None
        } else {
            let predicted = model
                .predict_many(&split.test.sequences)?
                .into_iter()
                .map(|value| target_scaler.inverse_value(0, value))
                .collect::<PipelineResult<Vec<f64>>>()?;
            let actual = split
                .test
                .targets
                .iter()
                .map(|&value| target_scaler.inverse_value(0, value))
                .collect::<PipelineResult<Vec<f64>>>()?;
            EvaluationMetrics::evaluate(&actual, &predicted)
        };
        if let Some(metrics) = &evaluation {
            info!(
                "Held-out evaluation: mse={:.4} rmse={:.4} mae={:.4} r2={:.4}",
                metrics.mse, metrics.rmse, metrics.mae, metrics.r2
            );
        }

        let dropped_columns = encoder.dropped_columns().to_vec();
        let bundle = TrainedArtifactBundle::new(model, encoder, feature_scaler, target_scaler)?;
        let report = TrainingReport {
            bundle_id: bundle.id().to_string(),
            trained_at: bundle.created_at(),
            observations: observations.len(),
            groups: dataset.groups().len(),
            segments: segments.len(),
            irregular_gaps: gaps.len(),
            sequences: total_sequences,
            train_sequences: split.train.len(),
            test_sequences: split.test.len(),
            window_length,
            train_fraction: self.splitter.train_fraction(),
            feature_columns: layout.columns().to_vec(),
            dropped_columns,
            target: layout.target().to_string(),
            feature_ranking,
            evaluation,
            hyperparameters: self.config.model.clone(),
        };
        Ok(TrainingOutcome::Trained(Box::new(TrainedModel { bundle, report })))
    }

    fn rank(
        &self,
        encoder: &FeatureEncoder,
        dataset: &Dataset,
    ) -> PipelineResult<Vec<FeatureImportance>> {
        let mut rows = Vec::with_capacity(dataset.len());
        let mut targets = Vec::with_capacity(dataset.len());
        for observation in dataset.observations() {
            let row = encoder.encode_observation(observation)?;
            targets.push(row.target());
            rows.push(row.features().to_vec());
        }
        FeatureImportanceRanker::new(self.config.ranker.clone()).rank(
            &rows,
            &targets,
            encoder.layout().columns(),
        )
    }
}
