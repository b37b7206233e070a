use crate::dataset::Dataset;
use crate::encoding::CategoricalEncoder;
use crate::schema::CyclicSource;
use serde::Serialize;
use statrs::statistics::Statistics;

pub const DEFAULT_HISTOGRAM_BINS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSummary {
    pub column: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl ColumnSummary {
    pub fn from_values(column: impl Into<String>, values: &[f64]) -> Self {
        let std_dev = match values.iter().std_dev() {
            std if std.is_nan() => 0.0,
            std => std,
        };
        Self {
            column: column.into(),
            count: values.len(),
            min: lowest(values),
            max: highest(values),
            mean: values.iter().mean(),
            std_dev,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width bins over `[min, max]`; the last bin is closed on the right.
pub fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }
    let min = lowest(values);
    let max = highest(values);
    if min == max {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            count: values.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut histogram: Vec<HistogramBin> = (0..bins)
        .map(|idx| HistogramBin {
            lower: min + width * idx as f64,
            upper: if idx + 1 == bins {
                max
            } else {
                min + width * (idx + 1) as f64
            },
            count: 0,
        })
        .collect();
    for &value in values {
        let idx = (((value - min) / width) as usize).min(bins - 1);
        histogram[idx].count += 1;
    }
    histogram
}

fn lowest(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn highest(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Pearson correlation; 0 when either side has no variance.
pub fn pearson(left: &[f64], right: &[f64]) -> f64 {
    let n = left.len().min(right.len());
    if n < 2 {
        return 0.0;
    }
    let left = &left[..n];
    let right = &right[..n];
    let left_mean = left.iter().mean();
    let right_mean = right.iter().mean();
    let mut covariance = 0.0;
    let mut left_ss = 0.0;
    let mut right_ss = 0.0;
    for (&x, &y) in left.iter().zip(right) {
        let dx = x - left_mean;
        let dy = y - right_mean;
        covariance += dx * dy;
        left_ss += dx * dx;
        right_ss += dy * dy;
    }
    let denominator = (left_ss * right_ss).sqrt();
    if denominator > 0.0 {
        covariance / denominator
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

pub fn correlation_matrix(columns: &[(String, Vec<f64>)]) -> CorrelationMatrix {
    let values = columns
        .iter()
        .map(|(_, left)| {
            columns
                .iter()
                .map(|(_, right)| pearson(left, right))
                .collect()
        })
        .collect();
    CorrelationMatrix {
        columns: columns.iter().map(|(name, _)| name.clone()).collect(),
        values,
    }
}

/// Column summaries, target distribution and correlations of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetProfile {
    pub rows: usize,
    pub groups: Vec<String>,
    pub columns: Vec<ColumnSummary>,
    pub target: ColumnSummary,
    pub target_histogram: Vec<HistogramBin>,
    pub correlations: CorrelationMatrix,
}

impl DatasetProfile {
    /// Correlations cover the numeric columns, the raw cyclic values, every
    /// categorical column with exactly two labels (as its 0/1 code) and the
    /// target.
    pub fn from_dataset(dataset: &Dataset, bins: usize) -> Self {
        let schema = dataset.schema();
        let observations = dataset.observations();

        let mut series: Vec<(String, Vec<f64>)> = schema
            .numeric_columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let values = observations.iter().map(|obs| obs.inputs.numeric[idx]).collect();
                (column.clone(), values)
            })
            .collect();
        let columns = series
            .iter()
            .map(|(name, values)| ColumnSummary::from_values(name.clone(), values))
            .collect();

        for (idx, field) in schema.cyclic_fields.iter().enumerate() {
            let name = match &field.source {
                CyclicSource::Column(column) => column.clone(),
                CyclicSource::Timestamp(_) => field.name.clone(),
            };
            let values = observations
                .iter()
                .map(|obs| obs.inputs.cyclic[idx] as f64)
                .collect();
            series.push((name, values));
        }

        let targets: Vec<f64> = observations.iter().map(|obs| obs.target).collect();
        let target = ColumnSummary::from_values(schema.target_column.clone(), &targets);
        let target_histogram = histogram(&targets, bins);

        for (idx, column) in schema.categorical_columns.iter().enumerate() {
            let encoder = CategoricalEncoder::fit(
                column.clone(),
                observations.iter().map(|obs| obs.inputs.categorical[idx].as_str()),
            );
            if encoder.len() != 2 {
                continue;
            }
            let codes = observations
                .iter()
                .filter_map(|obs| encoder.encode(&obs.inputs.categorical[idx]).ok())
                .map(f64::from)
                .collect();
            series.push((column.clone(), codes));
        }
        series.push((schema.target_column.clone(), targets));

        Self {
            rows: observations.len(),
            groups: dataset.groups(),
            columns,
            target,
            target_histogram,
            correlations: correlation_matrix(&series),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;

    #[test]
    fn histogram_counts_every_value() {
        let values = [0.0, 1.0, 2.0, 3.0, 4.0, 10.0];
        let bins = histogram(&values, 5);
        assert_eq!(bins.len(), 5);
        assert_eq!(bins.iter().map(|bin| bin.count).sum::<usize>(), 6);
        assert_eq!(bins[0].count, 2);
        assert_eq!(bins[4].count, 1);
        assert_eq!(bins[4].upper, 10.0);
        assert_eq!(histogram(&[3.0, 3.0], 10).len(), 1);
    }

    #[test]
    fn pearson_basics() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&x, &[2.0, 4.0, 6.0, 8.0]) - 1.0).abs() < 1e-12);
        assert!((pearson(&x, &[8.0, 6.0, 4.0, 2.0]) + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&x, &[5.0, 5.0, 5.0, 5.0]), 0.0);
    }

    #[test]
    fn profile_correlates_cyclic_and_binary_columns() {
        let csv = "date,country,Temperature,Humidity,SquareFootage,Occupancy,RenewableEnergy,DayOfWeek,Holiday,HVACUsage,LightingUsage,Month,Hour,EnergyConsumption\n\
2023-01-01,Norway,20,45,1500,10,2,Sunday,Yes,On,Off,1,8,80\n\
2023-01-02,Norway,18,47,1500,12,2,Monday,No,Off,On,1,2,60\n\
2023-01-03,Norway,22,44,1500,11,2,Tuesday,No,On,On,1,9,84\n";
        let dataset = Dataset::from_reader(csv.as_bytes(), TableSchema::energy_default()).unwrap();
        let profile = DatasetProfile::from_dataset(&dataset, DEFAULT_HISTOGRAM_BINS);
        assert_eq!(profile.rows, 3);
        assert_eq!(profile.columns.len(), 5);
        assert_eq!(profile.target.max, 84.0);
        let names = &profile.correlations.columns;
        assert!(names.contains(&"HVACUsage".to_string()));
        assert!(!names.contains(&"DayOfWeek".to_string()));
        assert_eq!(&names[5..7], ["Month", "Hour"]);
        assert_eq!(names.last().map(String::as_str), Some("EnergyConsumption"));
        let hvac = names.iter().position(|name| name == "HVACUsage").unwrap();
        let target = names.len() - 1;
        assert!(profile.correlations.values[hvac][target] > 0.9);
        assert!(profile.correlations.values[6][target] > 0.9);
        assert_eq!(profile.correlations.values[5][target], 0.0);
    }
}
