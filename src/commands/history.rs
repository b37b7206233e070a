use crate::dataset::Dataset;
use crate::history::{filter_choices, query, FilterChoices, HistoryFilter};
use crate::schema::{Observation, TableSchema};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRow {
    timestamp: String,
    group: String,
    values: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    choices: FilterChoices,
    total: usize,
    shown: usize,
    rows: Vec<HistoryRow>,
}

pub fn run(
    schema: TableSchema,
    data_path: &Path,
    filter: &HistoryFilter,
    limit: usize,
) -> Result<()> {
    let dataset = Dataset::load_csv(data_path, schema)
        .with_context(|| format!("Failed to load data from {}", data_path.display()))?;
    let page = query(dataset.observations(), filter, limit);
    let response = HistoryResponse {
        choices: filter_choices(dataset.observations()),
        total: page.total,
        shown: page.rows.len(),
        rows: page
            .rows
            .iter()
            .map(|observation| history_row(dataset.schema(), observation))
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn history_row(schema: &TableSchema, observation: &Observation) -> HistoryRow {
    let mut values = BTreeMap::new();
    for (column, value) in schema.numeric_columns.iter().zip(&observation.inputs.numeric) {
        values.insert(column.clone(), serde_json::json!(value));
    }
    for (column, label) in schema
        .categorical_columns
        .iter()
        .zip(&observation.inputs.categorical)
    {
        values.insert(column.clone(), serde_json::json!(label));
    }
    for (field, value) in schema.cyclic_fields.iter().zip(&observation.inputs.cyclic) {
        values.insert(field.name.clone(), serde_json::json!(value));
    }
    values.insert(
        schema.target_column.clone(),
        serde_json::json!(observation.target),
    );
    HistoryRow {
        timestamp: observation.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        group: observation.group.clone(),
        values,
    }
}
