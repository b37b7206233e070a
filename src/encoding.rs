use crate::error::{PipelineError, PipelineResult};
use crate::schema::{FeatureInputs, Observation, TableSchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::f64::consts::TAU;
use std::num::NonZeroU32;

/// Bijective mapping between the labels of one categorical field and codes `0..k`.
///
/// Codes follow the sorted label order, so two encoders fit on the same label
/// set are identical regardless of row order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    field: String,
    labels: Vec<String>,
}

impl CategoricalEncoder {
    pub fn fit<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let labels: BTreeSet<String> = values
            .into_iter()
            .map(|value| value.as_ref().to_string())
            .collect();
        Self {
            field: field.into(),
            labels: labels.into_iter().collect(),
        }
    }

    pub fn encode(&self, label: &str) -> PipelineResult<u32> {
        self.labels
            .binary_search_by(|candidate| candidate.as_str().cmp(label))
            .map(|code| code as u32)
            .map_err(|_| PipelineError::UnknownCategory {
                field: self.field.clone(),
                label: label.to_string(),
            })
    }

    pub fn decode(&self, code: u32) -> Option<&str> {
        self.labels.get(code as usize).map(String::as_str)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Sine/cosine encoding of periodic integers such as month of year.
#[derive(Debug, Clone, Copy, Default)]
pub struct CyclicalEncoder;

impl CyclicalEncoder {
    /// Returns `(sin(2πv/L), cos(2πv/L))`. The value is reduced modulo the
    /// period first so `v` and `v + L` encode to the same bits.
    pub fn encode(value: i64, period: NonZeroU32) -> (f64, f64) {
        let period = i64::from(period.get());
        let phase = TAU * value.rem_euclid(period) as f64 / period as f64;
        (phase.sin(), phase.cos())
    }
}

/// Encoded column order. The target is always the trailing value of an
/// [`EncodedRow`] and is not listed in `columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLayout {
    columns: Vec<String>,
    target: String,
}

impl FeatureLayout {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn target_index(&self) -> usize {
        self.columns.len()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }
}

/// Feature values followed by the target value.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRow {
    values: Vec<f64>,
}

impl EncodedRow {
    pub fn features(&self) -> &[f64] {
        &self.values[..self.values.len() - 1]
    }

    pub fn target(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}

/// Persisted encoding state: the schema, one categorical encoder per
/// categorical column and the columns removed by pruning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    schema: TableSchema,
    categorical: Vec<CategoricalEncoder>,
    dropped: Vec<String>,
    active: Vec<usize>,
    layout: FeatureLayout,
}

impl FeatureEncoder {
    pub fn fit(schema: &TableSchema, observations: &[Observation]) -> PipelineResult<Self> {
        schema.validate()?;
        if let Some(idx) = observations
            .iter()
            .position(|obs| !obs.inputs.matches_schema(schema))
        {
            return Err(PipelineError::schema(format!(
                "observation {idx} does not match the schema field counts"
            )));
        }
        let categorical = schema
            .categorical_columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                CategoricalEncoder::fit(
                    column.clone(),
                    observations
                        .iter()
                        .map(|obs| obs.inputs.categorical[idx].as_str()),
                )
            })
            .collect();
        let columns = schema.encoded_feature_columns();
        Ok(Self {
            schema: schema.clone(),
            categorical,
            dropped: Vec::new(),
            active: (0..columns.len()).collect(),
            layout: FeatureLayout {
                columns,
                target: schema.target_column.clone(),
            },
        })
    }

    /// Copy of this encoder that omits the named encoded columns.
    pub fn without_columns(&self, names: &[String]) -> PipelineResult<Self> {
        let all_columns = self.schema.encoded_feature_columns();
        let mut dropped: BTreeSet<String> = self.dropped.iter().cloned().collect();
        for name in names {
            if !all_columns.contains(name) {
                return Err(PipelineError::schema(format!(
                    "cannot drop unknown feature column {name}"
                )));
            }
            dropped.insert(name.clone());
        }

        let active: Vec<usize> = all_columns
            .iter()
            .enumerate()
            .filter(|(_, name)| !dropped.contains(*name))
            .map(|(idx, _)| idx)
            .collect();
        if active.is_empty() {
            return Err(PipelineError::schema("every feature column was dropped"));
        }
        let columns = active.iter().map(|&idx| all_columns[idx].clone()).collect();

        Ok(Self {
            schema: self.schema.clone(),
            categorical: self.categorical.clone(),
            dropped: dropped.into_iter().collect(),
            active,
            layout: FeatureLayout {
                columns,
                target: self.layout.target.clone(),
            },
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn dropped_columns(&self) -> &[String] {
        &self.dropped
    }

    pub fn categorical_encoders(&self) -> &[CategoricalEncoder] {
        &self.categorical
    }

    pub fn categorical_encoder(&self, field: &str) -> Option<&CategoricalEncoder> {
        self.categorical.iter().find(|encoder| encoder.field() == field)
    }

    /// Encoded feature vector in layout order, target excluded.
    pub fn encode_inputs(&self, inputs: &FeatureInputs) -> PipelineResult<Vec<f64>> {
        if !inputs.matches_schema(&self.schema) {
            return Err(PipelineError::schema(
                "inputs do not match the encoder schema field counts",
            ));
        }
        let mut full = Vec::with_capacity(self.schema.encoded_feature_columns().len());
        full.extend_from_slice(&inputs.numeric);
        for (encoder, label) in self.categorical.iter().zip(&inputs.categorical) {
            full.push(f64::from(encoder.encode(label)?));
        }
        for (field, value) in self.schema.cyclic_fields.iter().zip(&inputs.cyclic) {
            let period = NonZeroU32::new(field.period).ok_or_else(|| {
                PipelineError::schema(format!("cyclic field {} has a zero period", field.name))
            })?;
            let (sin, cos) = CyclicalEncoder::encode(*value, period);
            full.push(sin);
            full.push(cos);
        }
        Ok(self.active.iter().map(|&idx| full[idx]).collect())
    }

    pub fn encode_observation(&self, observation: &Observation) -> PipelineResult<EncodedRow> {
        let mut values = self.encode_inputs(&observation.inputs)?;
        values.push(observation.target);
        Ok(EncodedRow { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_timestamp;

    fn period(value: u32) -> NonZeroU32 {
        NonZeroU32::new(value).unwrap()
    }

    fn observation(day: &str, holiday: &str, hvac: &str, month: i64, target: f64) -> Observation {
        Observation {
            timestamp: parse_timestamp("2023-05-01").unwrap(),
            group: "Norway".to_string(),
            inputs: FeatureInputs {
                numeric: vec![20.0, 45.0, 1500.0, 10.0, 2.0],
                categorical: vec![
                    day.to_string(),
                    holiday.to_string(),
                    hvac.to_string(),
                    "On".to_string(),
                ],
                cyclic: vec![month, 6],
            },
            target,
        }
    }

    #[test]
    fn categorical_codes_follow_sorted_labels() {
        let encoder = CategoricalEncoder::fit("HVACUsage", ["On", "Off", "On", "Auto"]);
        assert_eq!(encoder.labels(), ["Auto", "Off", "On"]);
        assert_eq!(encoder.encode("Auto").unwrap(), 0);
        assert_eq!(encoder.encode("On").unwrap(), 2);
        assert_eq!(encoder.decode(1), Some("Off"));
        assert_eq!(encoder.decode(3), None);
    }

    #[test]
    fn unseen_label_never_maps_to_a_code() {
        let encoder = CategoricalEncoder::fit("Holiday", ["Yes", "No"]);
        for label in ["yes", "", "Maybe", "No "] {
            match encoder.encode(label) {
                Err(PipelineError::UnknownCategory { field, label: seen }) => {
                    assert_eq!(field, "Holiday");
                    assert_eq!(seen, label);
                }
                other => panic!("expected unknown category for {label:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn cyclical_encoding_is_periodic() {
        for length in [7, 12, 24] {
            let start = CyclicalEncoder::encode(0, period(length));
            let wrapped = CyclicalEncoder::encode(i64::from(length), period(length));
            assert_eq!(start, wrapped);
        }
        assert_eq!(
            CyclicalEncoder::encode(-1, period(12)),
            CyclicalEncoder::encode(11, period(12))
        );
    }

    #[test]
    fn december_and_january_are_neighbours() {
        let (dec_sin, dec_cos) = CyclicalEncoder::encode(12, period(12));
        let (jan_sin, jan_cos) = CyclicalEncoder::encode(1, period(12));
        let (jun_sin, jun_cos) = CyclicalEncoder::encode(6, period(12));
        let near = ((dec_sin - jan_sin).powi(2) + (dec_cos - jan_cos).powi(2)).sqrt();
        let far = ((dec_sin - jun_sin).powi(2) + (dec_cos - jun_cos).powi(2)).sqrt();
        assert!(near < far);
    }

    #[test]
    fn layout_lists_numeric_then_categorical_then_cyclic() {
        let schema = TableSchema::energy_default();
        let encoder = FeatureEncoder::fit(&schema, &[observation("Monday", "No", "On", 1, 1.0)])
            .expect("fit");
        assert_eq!(
            encoder.layout().columns(),
            [
                "Temperature",
                "Humidity",
                "SquareFootage",
                "Occupancy",
                "RenewableEnergy",
                "DayOfWeek",
                "Holiday",
                "HVACUsage",
                "LightingUsage",
                "Month_sin",
                "Month_cos",
                "Hour_sin",
                "Hour_cos",
            ]
        );
        assert_eq!(encoder.layout().target(), "EnergyConsumption");
        assert_eq!(encoder.layout().target_index(), 13);
    }

    #[test]
    fn encoded_row_keeps_target_last() {
        let schema = TableSchema::energy_default();
        let rows = vec![
            observation("Monday", "No", "On", 3, 71.0),
            observation("Sunday", "Yes", "Off", 3, 64.0),
        ];
        let encoder = FeatureEncoder::fit(&schema, &rows).expect("fit");
        let encoded = encoder.encode_observation(&rows[1]).expect("encode");
        assert_eq!(encoded.values().len(), 14);
        assert_eq!(encoded.target(), 64.0);
        // Sunday sorts after Monday, Yes after No, Off before On.
        assert_eq!(&encoded.features()[5..8], &[1.0, 1.0, 0.0]);
        let (sin, cos) = CyclicalEncoder::encode(3, period(12));
        assert_eq!(&encoded.features()[9..11], &[sin, cos]);
    }

    #[test]
    fn pruning_removes_columns_without_reordering() {
        let schema = TableSchema::energy_default();
        let rows = vec![observation("Monday", "No", "On", 3, 71.0)];
        let encoder = FeatureEncoder::fit(&schema, &rows).expect("fit");
        let pruned = encoder
            .without_columns(&["Humidity".to_string(), "Hour_cos".to_string()])
            .expect("prune");
        assert_eq!(pruned.layout().width(), 11);
        assert_eq!(pruned.layout().position("Humidity"), None);
        assert_eq!(pruned.layout().position("SquareFootage"), Some(1));

        let full = encoder.encode_inputs(&rows[0].inputs).unwrap();
        let reduced = pruned.encode_inputs(&rows[0].inputs).unwrap();
        assert_eq!(reduced[0], full[0]);
        assert_eq!(reduced[1], full[2]);
        assert_eq!(reduced[10], full[11]);

        assert!(matches!(
            encoder.without_columns(&["Pressure".to_string()]),
            Err(PipelineError::Schema(_))
        ));
    }

    #[test]
    fn encoding_unknown_category_fails_for_the_whole_row() {
        let schema = TableSchema::energy_default();
        let rows = vec![observation("Monday", "No", "On", 3, 71.0)];
        let encoder = FeatureEncoder::fit(&schema, &rows).expect("fit");
        let unseen = observation("Friday", "No", "On", 3, 71.0);
        assert!(matches!(
            encoder.encode_observation(&unseen),
            Err(PipelineError::UnknownCategory { ref field, .. }) if field == "DayOfWeek"
        ));
    }
}
