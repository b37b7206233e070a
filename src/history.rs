use crate::schema::Observation;
use chrono::Datelike;
use serde::Serialize;
use std::collections::BTreeSet;

pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Cumulative filters; `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub group: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
}

impl HistoryFilter {
    pub fn matches(&self, observation: &Observation) -> bool {
        self.group
            .as_deref()
            .map_or(true, |group| observation.group == group)
            && self
                .year
                .map_or(true, |year| observation.timestamp.year() == year)
            && self
                .month
                .map_or(true, |month| observation.timestamp.month() == month)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage<'a> {
    pub rows: Vec<&'a Observation>,
    /// Matching rows before the limit was applied.
    pub total: usize,
}

impl HistoryPage<'_> {
    pub fn truncated(&self) -> bool {
        self.total > self.rows.len()
    }
}

pub fn query<'a>(
    observations: &'a [Observation],
    filter: &HistoryFilter,
    limit: usize,
) -> HistoryPage<'a> {
    let mut total = 0;
    let mut rows = Vec::new();
    for observation in observations.iter().filter(|obs| filter.matches(obs)) {
        total += 1;
        if rows.len() < limit {
            rows.push(observation);
        }
    }
    HistoryPage { rows, total }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterChoices {
    pub groups: Vec<String>,
    pub years: Vec<i32>,
    pub months: Vec<u32>,
}

/// Distinct values available for each filter, sorted.
pub fn filter_choices(observations: &[Observation]) -> FilterChoices {
    let mut groups = BTreeSet::new();
    let mut years = BTreeSet::new();
    let mut months = BTreeSet::new();
    for observation in observations {
        groups.insert(observation.group.clone());
        years.insert(observation.timestamp.year());
        months.insert(observation.timestamp.month());
    }
    FilterChoices {
        groups: groups.into_iter().collect(),
        years: years.into_iter().collect(),
        months: months.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_timestamp, FeatureInputs};

    fn obs(group: &str, date: &str) -> Observation {
        Observation {
            timestamp: parse_timestamp(date).unwrap(),
            group: group.to_string(),
            inputs: FeatureInputs {
                numeric: vec![],
                categorical: vec![],
                cyclic: vec![],
            },
            target: 1.0,
        }
    }

    fn rows() -> Vec<Observation> {
        vec![
            obs("Norway", "2022-11-05"),
            obs("Norway", "2023-02-01"),
            obs("Spain", "2023-02-14"),
            obs("Norway", "2023-10-09"),
            obs("Norway", "2023-02-20"),
        ]
    }

    #[test]
    fn filters_are_cumulative() {
        let rows = rows();
        let filter = HistoryFilter {
            group: Some("Norway".to_string()),
            year: Some(2023),
            month: Some(2),
        };
        let page = query(&rows, &filter, DEFAULT_HISTORY_LIMIT);
        assert_eq!(page.total, 2);
        assert_eq!(page.rows[0].timestamp, parse_timestamp("2023-02-01").unwrap());
        assert_eq!(page.rows[1].timestamp, parse_timestamp("2023-02-20").unwrap());
    }

    #[test]
    fn limit_truncates_but_counts_everything() {
        let rows = rows();
        let page = query(&rows, &HistoryFilter::default(), 3);
        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.total, 5);
        assert!(page.truncated());
    }

    #[test]
    fn choices_are_sorted_numerically() {
        let choices = filter_choices(&rows());
        assert_eq!(choices.groups, vec!["Norway".to_string(), "Spain".to_string()]);
        assert_eq!(choices.years, vec![2022, 2023]);
        assert_eq!(choices.months, vec![2, 10, 11]);
    }
}
