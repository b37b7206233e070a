use crate::error::{PipelineError, PipelineResult};
use crate::schema::{Observation, TableSchema};
use csv::{ReaderBuilder, Trim};
use log::info;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Observations that all satisfy one [`TableSchema`].
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: TableSchema,
    observations: Vec<Observation>,
}

impl Dataset {
    pub fn new(schema: TableSchema, observations: Vec<Observation>) -> PipelineResult<Self> {
        schema.validate()?;
        if let Some(idx) = observations
            .iter()
            .position(|obs| !obs.inputs.matches_schema(&schema))
        {
            return Err(PipelineError::schema(format!(
                "observation {idx} does not match the schema field counts"
            )));
        }
        Ok(Self {
            schema,
            observations,
        })
    }

    pub fn load_csv<P: AsRef<Path>>(path: P, schema: TableSchema) -> PipelineResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| PipelineError::io(path, err))?;
        let dataset = Self::from_reader(BufReader::new(file), schema)?;
        info!(
            "Loaded {} observations across {} groups from {}",
            dataset.len(),
            dataset.groups().len(),
            path.display()
        );
        Ok(dataset)
    }

    /// Reads a headed CSV table. Every schema column must be present and no
    /// unlisted column may appear.
    pub fn from_reader<R: Read>(reader: R, schema: TableSchema) -> PipelineResult<Self> {
        schema.validate()?;
        let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let headers = reader.headers()?.clone();

        let mut index: HashMap<String, usize> = HashMap::with_capacity(headers.len());
        for (position, header) in headers.iter().enumerate() {
            if index.insert(header.to_string(), position).is_some() {
                return Err(PipelineError::schema(format!(
                    "column {header} appears more than once in the header"
                )));
            }
        }

        let required = schema.required_columns();
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|column| !index.contains_key(*column))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::schema(format!(
                "missing column(s): {}",
                missing.join(", ")
            )));
        }

        let known: HashSet<&str> = required
            .iter()
            .copied()
            .chain(schema.ignored_columns.iter().map(String::as_str))
            .collect();
        let unexpected: Vec<&str> = headers
            .iter()
            .filter(|header| !known.contains(header))
            .collect();
        if !unexpected.is_empty() {
            return Err(PipelineError::schema(format!(
                "unexpected column(s): {}",
                unexpected.join(", ")
            )));
        }

        let mut observations = Vec::new();
        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            let observation = Observation::parse(&schema, |column| {
                index.get(column).and_then(|&position| record.get(position))
            })
            .map_err(|err| match err {
                // header is line 1
                PipelineError::Schema(message) => {
                    PipelineError::schema(format!("line {}: {message}", row_idx + 2))
                }
                other => other,
            })?;
            observations.push(observation);
        }

        Ok(Self {
            schema,
            observations,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Distinct grouping keys, sorted.
    pub fn groups(&self) -> Vec<String> {
        self.observations
            .iter()
            .map(|obs| obs.group.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn group_rows<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a Observation> + 'a {
        self.observations.iter().filter(move |obs| obs.group == group)
    }
}
