use crate::bundle::TrainedArtifactBundle;
use crate::drift::{DriftDetector, DriftReport};
use crate::error::{PipelineError, PipelineResult};
use crate::model::{ForestSequenceModel, SequenceModel};
use crate::schema::{parse_timestamp, CyclicSource, FeatureInputs, Observation};
use crate::sequence::SequenceBuilder;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One raw row to score. Field values are kept as text and parsed against the
/// bundle schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub group: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl InferenceRequest {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "allowed", rename_all = "lowercase")]
pub enum FieldKind {
    Numeric,
    Categorical(Vec<String>),
}

/// Description of one request field, enough to render and pre-check a form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputField {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub group: String,
    pub value: f64,
    pub bundle_id: String,
    pub drift: DriftReport,
}

/// Replays the frozen training transform on single rows.
pub struct InferencePipeline<'a, M = ForestSequenceModel> {
    bundle: &'a TrainedArtifactBundle<M>,
    builder: SequenceBuilder,
    detector: DriftDetector,
}

impl<'a, M: SequenceModel> InferencePipeline<'a, M> {
    pub fn new(bundle: &'a TrainedArtifactBundle<M>) -> PipelineResult<Self> {
        Ok(Self {
            bundle,
            builder: SequenceBuilder::new(bundle.window_length())?,
            detector: DriftDetector::default(),
        })
    }

    pub fn with_detector(mut self, detector: DriftDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn input_fields(&self) -> Vec<InputField> {
        let schema = self.bundle.schema();
        let encoder = self.bundle.encoder();
        let mut fields: Vec<InputField> = schema
            .numeric_columns
            .iter()
            .map(|name| InputField {
                name: name.clone(),
                kind: FieldKind::Numeric,
            })
            .collect();
        for name in &schema.categorical_columns {
            let allowed = encoder
                .categorical_encoder(name)
                .map(|categorical| categorical.labels().to_vec())
                .unwrap_or_default();
            fields.push(InputField {
                name: name.clone(),
                kind: FieldKind::Categorical(allowed),
            });
        }
        for field in &schema.cyclic_fields {
            if let CyclicSource::Column(column) = &field.source {
                fields.push(InputField {
                    name: column.clone(),
                    kind: FieldKind::Numeric,
                });
            }
        }
        fields
    }

    /// Parses and checks a request without touching the model. Every field
    /// problem is reported before any numeric work starts.
    pub fn validate(&self, request: &InferenceRequest) -> PipelineResult<FeatureInputs> {
        let schema = self.bundle.schema();
        if request.group.trim().is_empty() {
            return Err(PipelineError::schema(format!(
                "request is missing the {} value",
                schema.group_column
            )));
        }

        let expected = schema.input_field_names();
        let unexpected: Vec<&str> = request
            .fields
            .keys()
            .map(String::as_str)
            .filter(|name| !expected.contains(name))
            .collect();
        if !unexpected.is_empty() {
            return Err(PipelineError::schema(format!(
                "unexpected field(s): {}",
                unexpected.join(", ")
            )));
        }
        let missing: Vec<&str> = expected
            .iter()
            .copied()
            .filter(|name| !request.fields.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::schema(format!(
                "missing field(s): {}",
                missing.join(", ")
            )));
        }

        let timestamp = match request.timestamp.as_deref() {
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| {
                PipelineError::schema(format!("{raw:?} is not a recognised timestamp"))
            })?),
            None => None,
        };
        let inputs = FeatureInputs::parse(
            schema,
            |name| request.fields.get(name).map(String::as_str),
            timestamp.as_ref(),
        )?;
        for (encoder, label) in self
            .bundle
            .encoder()
            .categorical_encoders()
            .iter()
            .zip(&inputs.categorical)
        {
            encoder.encode(label)?;
        }
        Ok(inputs)
    }

    /// Encoded and scaled feature vector, in the persisted layout order.
    pub fn feature_vector(&self, inputs: &FeatureInputs) -> PipelineResult<Vec<f64>> {
        let encoded = self.bundle.encoder().encode_inputs(inputs)?;
        self.bundle.feature_scaler().transform_row(&encoded)
    }

    /// Physical-unit prediction annotated with drift against `history`.
    pub fn predict(
        &self,
        request: &InferenceRequest,
        history: &[Observation],
    ) -> PipelineResult<Prediction> {
        let inputs = self.validate(request)?;
        let scaled = self.feature_vector(&inputs)?;
        let window = self.builder.tile(&scaled);
        let normalized = self.bundle.model().predict(&window)?;
        let value = self.bundle.target_scaler().inverse_value(0, normalized)?;
        let drift = self
            .detector
            .assess(self.bundle.schema(), &inputs, &request.group, history);
        debug!(
            "Predicted {value:.4} for {} with {} drift flag(s)",
            request.group,
            drift.flagged.len()
        );
        Ok(Prediction {
            group: request.group.clone(),
            value,
            bundle_id: self.bundle.id().to_string(),
            drift,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::forest::ForestParams;
    use crate::schema::TableSchema;
    use crate::training::{TrainingConfig, TrainingPipeline};
    use chrono::Duration;

    fn history() -> Vec<Observation> {
        let start = parse_timestamp("2023-03-01").unwrap();
        (0..24)
            .map(|day| {
                let temperature = 18.0 + (day % 6) as f64;
                let hvac = if day % 2 == 0 { "On" } else { "Off" };
                Observation {
                    timestamp: start + Duration::days(day),
                    group: "Norway".to_string(),
                    inputs: FeatureInputs {
                        numeric: vec![temperature, 45.0, 1500.0, 10.0, 2.0],
                        categorical: vec![
                            "Monday".to_string(),
                            "No".to_string(),
                            hvac.to_string(),
                            "On".to_string(),
                        ],
                        cyclic: vec![3, day % 24],
                    },
                    target: 30.0 + 2.0 * temperature + if hvac == "On" { 5.0 } else { 0.0 },
                }
            })
            .collect()
    }

    fn bundle() -> TrainedArtifactBundle {
        let dataset = Dataset::new(TableSchema::energy_default(), history()).unwrap();
        let config = TrainingConfig {
            window_length: 2,
            model: ForestParams {
                n_estimators: 6,
                ..ForestParams::default()
            },
            ..TrainingConfig::default()
        };
        TrainingPipeline::new(config)
            .unwrap()
            .run(&dataset)
            .unwrap()
            .trained()
            .expect("trained")
            .bundle
    }

    fn request(temperature: &str, hvac: &str) -> InferenceRequest {
        InferenceRequest::new("Norway")
            .with_field("Temperature", temperature)
            .with_field("Humidity", "45")
            .with_field("SquareFootage", "1500")
            .with_field("Occupancy", "10")
            .with_field("RenewableEnergy", "2")
            .with_field("DayOfWeek", "Monday")
            .with_field("Holiday", "No")
            .with_field("HVACUsage", hvac)
            .with_field("LightingUsage", "On")
            .with_field("Month", "3")
            .with_field("Hour", "5")
    }

    #[test]
    fn describes_input_fields() {
        let bundle = bundle();
        let pipeline = InferencePipeline::new(&bundle).unwrap();
        let fields = pipeline.input_fields();
        assert_eq!(fields.len(), 11);
        assert_eq!(fields[0].kind, FieldKind::Numeric);
        let hvac = fields.iter().find(|field| field.name == "HVACUsage").unwrap();
        assert_eq!(
            hvac.kind,
            FieldKind::Categorical(vec!["Off".to_string(), "On".to_string()])
        );
    }

    #[test]
    fn repeated_requests_give_identical_predictions() {
        let bundle = bundle();
        let pipeline = InferencePipeline::new(&bundle).unwrap();
        let history = history();
        let first = pipeline.predict(&request("20", "On"), &history).unwrap();
        let second = pipeline.predict(&request("20", "On"), &history).unwrap();
        assert_eq!(first, second);
        assert!(first.value.is_finite());
        assert!(!first.drift.has_drift());
    }

    #[test]
    fn unseen_category_blocks_the_prediction() {
        let bundle = bundle();
        let pipeline = InferencePipeline::new(&bundle).unwrap();
        match pipeline.predict(&request("20", "Auto"), &history()) {
            Err(PipelineError::UnknownCategory { field, label }) => {
                assert_eq!(field, "HVACUsage");
                assert_eq!(label, "Auto");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn missing_and_extra_fields_are_schema_errors() {
        let bundle = bundle();
        let pipeline = InferencePipeline::new(&bundle).unwrap();
        let mut missing = request("20", "On");
        missing.fields.remove("Humidity");
        assert!(matches!(
            pipeline.validate(&missing),
            Err(PipelineError::Schema(message)) if message.contains("Humidity")
        ));
        let extra = request("20", "On").with_field("Pressure", "1013");
        assert!(matches!(
            pipeline.validate(&extra),
            Err(PipelineError::Schema(message)) if message.contains("Pressure")
        ));
        let mut anonymous = request("20", "On");
        anonymous.group = " ".to_string();
        assert!(matches!(
            pipeline.validate(&anonymous),
            Err(PipelineError::Schema(_))
        ));
    }

    #[test]
    fn out_of_range_cyclic_field_is_rejected() {
        let bundle = bundle();
        let pipeline = InferencePipeline::new(&bundle).unwrap();
        let typo = request("20", "On").with_field("Month", "13");
        assert!(matches!(
            pipeline.predict(&typo, &history()),
            Err(PipelineError::Schema(message)) if message.contains("Month")
        ));
    }

    #[test]
    fn feature_vector_follows_the_layout() {
        let bundle = bundle();
        let pipeline = InferencePipeline::new(&bundle).unwrap();
        let inputs = pipeline.validate(&request("30", "On")).unwrap();
        let vector = pipeline.feature_vector(&inputs).unwrap();
        assert_eq!(vector.len(), bundle.encoder().layout().width());
        let position = bundle.encoder().layout().position("Temperature").unwrap();
        let expected = bundle.feature_scaler().transform_value(position, 30.0).unwrap();
        assert_eq!(vector[position], expected);
        // 30 is above the fitted maximum of 23 and is not clipped
        assert!(vector[position] > 1.0);
    }

    #[test]
    fn out_of_range_input_is_flagged_not_rejected() {
        let bundle = bundle();
        let pipeline = InferencePipeline::new(&bundle).unwrap();
        let prediction = pipeline.predict(&request("60", "On"), &history()).unwrap();
        assert!(prediction.drift.has_drift());
        assert_eq!(prediction.drift.flagged[0].feature, "Temperature");
        assert!(prediction.value.is_finite());
    }
}
