use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Calendar component extracted from an observation timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampPart {
    /// 1..=12
    Month,
    /// 0..=23
    Hour,
    /// 0 (Monday) ..= 6 (Sunday)
    DayOfWeek,
}

impl TimestampPart {
    pub fn extract(self, timestamp: &NaiveDateTime) -> i64 {
        match self {
            Self::Month => i64::from(timestamp.month()),
            Self::Hour => i64::from(timestamp.hour()),
            Self::DayOfWeek => i64::from(timestamp.weekday().num_days_from_monday()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclicSource {
    /// Integer column supplied in every row.
    Column(String),
    /// Derived from the row timestamp.
    Timestamp(TimestampPart),
}

/// Inclusive bounds of a cyclic value, e.g. 1..=12 for months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: i64,
    pub max: i64,
}

impl ValueRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// A periodic integer field that is encoded as a sine/cosine pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclicField {
    pub name: String,
    pub period: u32,
    pub source: CyclicSource,
    /// Values outside the range are rejected instead of wrapped by the period.
    #[serde(default)]
    pub range: Option<ValueRange>,
}

impl CyclicField {
    pub fn sin_column(&self) -> String {
        format!("{}_sin", self.name)
    }

    pub fn cos_column(&self) -> String {
        format!("{}_cos", self.name)
    }

    fn source_column(&self) -> Option<&str> {
        match &self.source {
            CyclicSource::Column(column) => Some(column.as_str()),
            CyclicSource::Timestamp(_) => None,
        }
    }
}

/// Column contract shared by training tables and inference requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub timestamp_column: String,
    pub group_column: String,
    pub numeric_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
    #[serde(default)]
    pub cyclic_fields: Vec<CyclicField>,
    pub target_column: String,
    /// Columns tolerated in input tables but never read.
    #[serde(default)]
    pub ignored_columns: Vec<String>,
}

impl TableSchema {
    /// Schema of the building energy consumption dataset.
    pub fn energy_default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|item| item.to_string()).collect();
        Self {
            timestamp_column: "date".to_string(),
            group_column: "country".to_string(),
            numeric_columns: strings(&[
                "Temperature",
                "Humidity",
                "SquareFootage",
                "Occupancy",
                "RenewableEnergy",
            ]),
            categorical_columns: strings(&["DayOfWeek", "Holiday", "HVACUsage", "LightingUsage"]),
            cyclic_fields: vec![
                CyclicField {
                    name: "Month".to_string(),
                    period: 12,
                    source: CyclicSource::Column("Month".to_string()),
                    range: Some(ValueRange::new(1, 12)),
                },
                CyclicField {
                    name: "Hour".to_string(),
                    period: 24,
                    source: CyclicSource::Column("Hour".to_string()),
                    range: Some(ValueRange::new(0, 23)),
                },
            ],
            target_column: "EnergyConsumption".to_string(),
            ignored_columns: Vec::new(),
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        for (role, name) in [
            ("timestamp", &self.timestamp_column),
            ("group", &self.group_column),
            ("target", &self.target_column),
        ] {
            if name.trim().is_empty() {
                return Err(PipelineError::schema(format!("{role} column name is empty")));
            }
        }
        if self.categorical_columns.is_empty() {
            return Err(PipelineError::schema(
                "schema requires at least one categorical column",
            ));
        }

        let mut seen = HashSet::new();
        let ignored = self.ignored_columns.iter().map(String::as_str);
        for column in self.required_columns().into_iter().chain(ignored) {
            if column.trim().is_empty() {
                return Err(PipelineError::schema("schema contains an empty column name"));
            }
            if !seen.insert(column) {
                return Err(PipelineError::schema(format!(
                    "column {column} appears more than once in the schema"
                )));
            }
        }

        let mut encoded = HashSet::new();
        for name in self.encoded_feature_columns() {
            if !encoded.insert(name.clone()) {
                return Err(PipelineError::schema(format!(
                    "encoded feature name {name} is produced twice"
                )));
            }
        }
        if encoded.contains(&self.target_column) {
            return Err(PipelineError::schema(format!(
                "target {} collides with an encoded feature name",
                self.target_column
            )));
        }

        for field in &self.cyclic_fields {
            if field.period == 0 {
                return Err(PipelineError::schema(format!(
                    "cyclic field {} has a zero period",
                    field.name
                )));
            }
            if let Some(range) = field.range {
                if range.min > range.max {
                    return Err(PipelineError::schema(format!(
                        "cyclic field {} has an empty range {}..={}",
                        field.name, range.min, range.max
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every column an input table must carry, in schema order.
    pub fn required_columns(&self) -> Vec<&str> {
        let mut columns = vec![self.timestamp_column.as_str(), self.group_column.as_str()];
        columns.extend(self.input_field_names());
        columns.push(self.target_column.as_str());
        columns
    }

    /// Raw fields an inference request has to supply.
    pub fn input_field_names(&self) -> Vec<&str> {
        self.numeric_columns
            .iter()
            .map(String::as_str)
            .chain(self.categorical_columns.iter().map(String::as_str))
            .chain(self.cyclic_fields.iter().filter_map(CyclicField::source_column))
            .collect()
    }

    pub fn needs_timestamp(&self) -> bool {
        self.cyclic_fields
            .iter()
            .any(|field| matches!(field.source, CyclicSource::Timestamp(_)))
    }

    /// Names of the encoded feature columns before any pruning, target excluded.
    pub fn encoded_feature_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.numeric_columns.clone();
        columns.extend(self.categorical_columns.iter().cloned());
        for field in &self.cyclic_fields {
            columns.push(field.sin_column());
            columns.push(field.cos_column());
        }
        columns
    }
}

/// Raw feature values of one row, ordered like the schema lists them.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureInputs {
    pub numeric: Vec<f64>,
    pub categorical: Vec<String>,
    pub cyclic: Vec<i64>,
}

impl FeatureInputs {
    /// Parses schema fields through `lookup`; a missing or malformed field is a schema error.
    pub fn parse<'a, F>(
        schema: &TableSchema,
        mut lookup: F,
        timestamp: Option<&NaiveDateTime>,
    ) -> PipelineResult<Self>
    where
        F: FnMut(&str) -> Option<&'a str>,
    {
        let mut numeric = Vec::with_capacity(schema.numeric_columns.len());
        for column in &schema.numeric_columns {
            numeric.push(parse_numeric(column, require_field(column, &mut lookup)?)?);
        }

        let mut categorical = Vec::with_capacity(schema.categorical_columns.len());
        for column in &schema.categorical_columns {
            let raw = require_field(column, &mut lookup)?.trim();
            if raw.is_empty() {
                return Err(PipelineError::schema(format!("field {column} is empty")));
            }
            categorical.push(raw.to_string());
        }

        let mut cyclic = Vec::with_capacity(schema.cyclic_fields.len());
        for field in &schema.cyclic_fields {
            let value = match &field.source {
                CyclicSource::Column(column) => {
                    parse_integer(column, require_field(column, &mut lookup)?)?
                }
                CyclicSource::Timestamp(part) => {
                    let timestamp = timestamp.ok_or_else(|| {
                        PipelineError::schema(format!(
                            "field {} is derived from the timestamp, which was not supplied",
                            field.name
                        ))
                    })?;
                    part.extract(timestamp)
                }
            };
            if let Some(range) = field.range {
                if !range.contains(value) {
                    return Err(PipelineError::schema(format!(
                        "field {}: {value} is outside {}..={}",
                        field.name, range.min, range.max
                    )));
                }
            }
            cyclic.push(value);
        }

        Ok(Self {
            numeric,
            categorical,
            cyclic,
        })
    }

    pub fn numeric_value(&self, schema: &TableSchema, column: &str) -> Option<f64> {
        schema
            .numeric_columns
            .iter()
            .position(|name| name == column)
            .and_then(|idx| self.numeric.get(idx).copied())
    }

    pub fn matches_schema(&self, schema: &TableSchema) -> bool {
        self.numeric.len() == schema.numeric_columns.len()
            && self.categorical.len() == schema.categorical_columns.len()
            && self.cyclic.len() == schema.cyclic_fields.len()
    }
}

/// One row of a training table.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub group: String,
    pub inputs: FeatureInputs,
    pub target: f64,
}

impl Observation {
    pub fn parse<'a, F>(schema: &TableSchema, mut lookup: F) -> PipelineResult<Self>
    where
        F: FnMut(&str) -> Option<&'a str>,
    {
        let raw_timestamp = require_field(&schema.timestamp_column, &mut lookup)?;
        let timestamp = parse_timestamp(raw_timestamp).ok_or_else(|| {
            PipelineError::schema(format!(
                "field {}: {:?} is not a recognised timestamp",
                schema.timestamp_column, raw_timestamp
            ))
        })?;
        let group = require_field(&schema.group_column, &mut lookup)?.trim();
        if group.is_empty() {
            return Err(PipelineError::schema(format!(
                "field {} is empty",
                schema.group_column
            )));
        }
        let inputs = FeatureInputs::parse(schema, &mut lookup, Some(&timestamp))?;
        let target = parse_numeric(
            &schema.target_column,
            require_field(&schema.target_column, &mut lookup)?,
        )?;

        Ok(Self {
            timestamp,
            group: group.to_string(),
            inputs,
            target,
        })
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS]`, `YYYY-MM-DDTHH:MM:SS` and RFC 3339.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(value) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(value);
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|value| value.naive_utc())
}

fn require_field<'a, F>(column: &str, lookup: &mut F) -> PipelineResult<&'a str>
where
    F: FnMut(&str) -> Option<&'a str>,
{
    lookup(column).ok_or_else(|| PipelineError::schema(format!("missing field {column}")))
}

fn parse_numeric(column: &str, raw: &str) -> PipelineResult<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| {
            PipelineError::schema(format!(
                "field {column}: {raw:?} is not a finite number"
            ))
        })
}

fn parse_integer(column: &str, raw: &str) -> PipelineResult<i64> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(value);
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value.fract() == 0.0 => Ok(value as i64),
        _ => Err(PipelineError::schema(format!(
            "field {column}: {raw:?} is not an integer"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn energy_row() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("date", "2023-03-01 14:00:00"),
            ("country", "Norway"),
            ("Temperature", "21.5"),
            ("Humidity", "40"),
            ("SquareFootage", "1500"),
            ("Occupancy", "12"),
            ("RenewableEnergy", "3.2"),
            ("DayOfWeek", "Wednesday"),
            ("Holiday", "No"),
            ("HVACUsage", "On"),
            ("LightingUsage", "Off"),
            ("Month", "3"),
            ("Hour", "14"),
            ("EnergyConsumption", "75.3"),
        ])
    }

    #[test]
    fn energy_default_schema_is_valid() {
        let schema = TableSchema::energy_default();
        schema.validate().expect("default schema valid");
        assert_eq!(schema.required_columns().len(), 14);
        assert!(!schema.needs_timestamp());
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let mut schema = TableSchema::energy_default();
        schema.numeric_columns.push("Holiday".to_string());
        assert!(matches!(schema.validate(), Err(PipelineError::Schema(_))));
    }

    #[test]
    fn observation_parses_every_schema_field() {
        let schema = TableSchema::energy_default();
        let row = energy_row();
        let obs = Observation::parse(&schema, |name| row.get(name).copied()).expect("parse");
        assert_eq!(obs.group, "Norway");
        assert_eq!(obs.inputs.numeric, vec![21.5, 40.0, 1500.0, 12.0, 3.2]);
        assert_eq!(obs.inputs.cyclic, vec![3, 14]);
        assert!((obs.target - 75.3).abs() < 1e-12);
    }

    #[test]
    fn missing_field_is_a_schema_error() {
        let schema = TableSchema::energy_default();
        let mut row = energy_row();
        row.remove("Humidity");
        let err = Observation::parse(&schema, |name| row.get(name).copied()).unwrap_err();
        match err {
            PipelineError::Schema(message) => assert!(message.contains("Humidity"), "{message}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn non_numeric_value_is_a_schema_error() {
        let schema = TableSchema::energy_default();
        let mut row = energy_row();
        row.insert("Temperature", "warm");
        assert!(matches!(
            Observation::parse(&schema, |name| row.get(name).copied()),
            Err(PipelineError::Schema(_))
        ));
    }

    #[test]
    fn timestamp_parts_feed_cyclic_fields() {
        let mut schema = TableSchema::energy_default();
        schema.cyclic_fields = vec![CyclicField {
            name: "Month".to_string(),
            period: 12,
            source: CyclicSource::Timestamp(TimestampPart::Month),
            range: None,
        }];
        let row = energy_row();
        let obs = Observation::parse(&schema, |name| row.get(name).copied()).expect("parse");
        assert_eq!(obs.inputs.cyclic, vec![3]);

        let without_ts = FeatureInputs::parse(&schema, |name| row.get(name).copied(), None);
        assert!(matches!(without_ts, Err(PipelineError::Schema(_))));
    }

    #[test]
    fn cyclic_values_outside_their_range_are_rejected() {
        let schema = TableSchema::energy_default();
        for (field, value) in [("Month", "13"), ("Month", "0"), ("Hour", "-1"), ("Hour", "24")] {
            let mut row = energy_row();
            row.insert(field, value);
            match Observation::parse(&schema, |name| row.get(name).copied()) {
                Err(PipelineError::Schema(message)) => {
                    assert!(message.contains(field), "{message}")
                }
                other => panic!("{field}={value} gave {other:?}"),
            }
        }

        let mut row = energy_row();
        row.insert("Month", "12");
        row.insert("Hour", "0");
        let obs = Observation::parse(&schema, |name| row.get(name).copied()).expect("parse");
        assert_eq!(obs.inputs.cyclic, vec![12, 0]);
    }

    #[test]
    fn inverted_cyclic_range_is_rejected() {
        let mut schema = TableSchema::energy_default();
        schema.cyclic_fields[0].range = Some(ValueRange::new(12, 1));
        assert!(matches!(schema.validate(), Err(PipelineError::Schema(_))));
    }

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp("2024-01-31").is_some());
        assert!(parse_timestamp("2024-01-31 23:00:00").is_some());
        assert!(parse_timestamp("2024-01-31T23:00:00").is_some());
        assert!(parse_timestamp("2024-01-31T23:00:00+02:00").is_some());
        assert!(parse_timestamp("31/01/2024").is_none());
    }
}
