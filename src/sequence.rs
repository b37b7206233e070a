use crate::error::{PipelineError, PipelineResult};
use crate::schema::Observation;
use chrono::{Duration, NaiveDateTime};

/// `W` consecutive feature rows, oldest first.
pub type Window = Vec<Vec<f64>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceSet {
    pub sequences: Vec<Window>,
    pub targets: Vec<f64>,
}

impl SequenceSet {
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn push(&mut self, window: Window, target: f64) {
        self.sequences.push(window);
        self.targets.push(target);
    }

    pub fn extend(&mut self, other: SequenceSet) {
        self.sequences.extend(other.sequences);
        self.targets.extend(other.targets);
    }
}

/// Turns an ordered, normalized matrix whose last column is the target into
/// sliding windows.
#[derive(Debug, Clone, Copy)]
pub struct SequenceBuilder {
    window_length: usize,
}

impl SequenceBuilder {
    pub fn new(window_length: usize) -> PipelineResult<Self> {
        if window_length == 0 {
            return Err(PipelineError::InvalidConfig(
                "window length must be at least 1".to_string(),
            ));
        }
        Ok(Self { window_length })
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    /// Window `i` holds rows `i..i+W` without the target column and is labelled
    /// with the target of row `i+W`. Yields `max(0, N - W)` sequences.
    pub fn build(&self, matrix: &[Vec<f64>]) -> PipelineResult<SequenceSet> {
        let Some(width) = matrix.first().map(Vec::len) else {
            return Ok(SequenceSet::default());
        };
        if width < 2 {
            return Err(PipelineError::schema(
                "sequence input needs at least one feature column and the target",
            ));
        }
        if let Some(idx) = matrix.iter().position(|row| row.len() != width) {
            return Err(PipelineError::schema(format!(
                "row {idx} has {} values, expected {width}",
                matrix[idx].len()
            )));
        }

        let target_idx = width - 1;
        let count = matrix.len().saturating_sub(self.window_length);
        let mut set = SequenceSet {
            sequences: Vec::with_capacity(count),
            targets: Vec::with_capacity(count),
        };
        for start in 0..count {
            let window = matrix[start..start + self.window_length]
                .iter()
                .map(|row| row[..target_idx].to_vec())
                .collect();
            set.push(window, matrix[start + self.window_length][target_idx]);
        }
        Ok(set)
    }

    /// Repeats a single feature row `W` times. Used at inference, where only
    /// one row is available.
    pub fn tile(&self, row: &[f64]) -> Window {
        vec![row.to_vec(); self.window_length]
    }
}

/// Splits observations into index runs that share a group and have no
/// timestamp gap larger than `max_gap`. Each run is ordered by timestamp;
/// ties keep file order. Runs are returned in group order.
pub fn contiguous_segments(
    observations: &[Observation],
    max_gap: Option<Duration>,
) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..observations.len()).collect();
    order.sort_by(|&a, &b| {
        let left = &observations[a];
        let right = &observations[b];
        left.group
            .cmp(&right.group)
            .then(left.timestamp.cmp(&right.timestamp))
    });

    let mut segments: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    for idx in order {
        if let Some(&prev) = current.last() {
            let previous = &observations[prev];
            let next = &observations[idx];
            let gap_exceeded = max_gap
                .map(|limit| next.timestamp - previous.timestamp > limit)
                .unwrap_or(false);
            if previous.group != next.group || gap_exceeded {
                segments.push(std::mem::take(&mut current));
            }
        }
        current.push(idx);
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Spacing inside a segment at least this many times the segment's median
/// spacing is reported as irregular.
pub const IRREGULAR_GAP_FACTOR: i32 = 3;

/// A jump between consecutive rows of one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacingGap {
    pub group: String,
    pub before: NaiveDateTime,
    pub after: NaiveDateTime,
    pub median: Duration,
}

impl SpacingGap {
    pub fn gap(&self) -> Duration {
        self.after - self.before
    }
}

/// Gaps inside each segment larger than `factor` times its median positive
/// spacing. Segments with fewer than two positive spacings are skipped.
pub fn irregular_gaps(
    observations: &[Observation],
    segments: &[Vec<usize>],
    factor: i32,
) -> Vec<SpacingGap> {
    let mut gaps = Vec::new();
    for segment in segments {
        let spacings: Vec<Duration> = segment
            .windows(2)
            .map(|pair| observations[pair[1]].timestamp - observations[pair[0]].timestamp)
            .collect();
        let mut positive: Vec<Duration> = spacings
            .iter()
            .copied()
            .filter(|spacing| *spacing > Duration::zero())
            .collect();
        if positive.len() < 2 {
            continue;
        }
        positive.sort();
        let median = positive[positive.len() / 2];
        let limit = median * factor;
        for (pair, spacing) in segment.windows(2).zip(&spacings) {
            if *spacing > limit {
                let before = &observations[pair[0]];
                gaps.push(SpacingGap {
                    group: before.group.clone(),
                    before: before.timestamp,
                    after: observations[pair[1]].timestamp,
                    median,
                });
            }
        }
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_timestamp, FeatureInputs};

    fn matrix(rows: usize) -> Vec<Vec<f64>> {
        (0..rows)
            .map(|idx| {
                let base = idx as f64;
                vec![base, base * 10.0, base * 100.0]
            })
            .collect()
    }

    fn obs(group: &str, timestamp: &str) -> Observation {
        Observation {
            timestamp: parse_timestamp(timestamp).unwrap(),
            group: group.to_string(),
            inputs: FeatureInputs {
                numeric: vec![],
                categorical: vec![],
                cyclic: vec![],
            },
            target: 0.0,
        }
    }

    #[test]
    fn window_count_and_slices() {
        let builder = SequenceBuilder::new(3).unwrap();
        let set = builder.build(&matrix(7)).unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(set.sequences[1], vec![vec![1.0, 10.0], vec![2.0, 20.0], vec![3.0, 30.0]]);
        assert_eq!(set.targets, vec![300.0, 400.0, 500.0, 600.0]);
    }

    #[test]
    fn short_input_yields_no_sequences() {
        let builder = SequenceBuilder::new(5).unwrap();
        for rows in 0..=5 {
            assert!(builder.build(&matrix(rows)).unwrap().is_empty());
        }
        assert_eq!(builder.build(&matrix(6)).unwrap().len(), 1);
    }

    #[test]
    fn zero_window_is_invalid() {
        assert!(matches!(
            SequenceBuilder::new(0),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn tile_repeats_the_row() {
        let builder = SequenceBuilder::new(4).unwrap();
        let window = builder.tile(&[0.25, 0.5]);
        assert_eq!(window.len(), 4);
        assert!(window.iter().all(|row| row == &[0.25, 0.5]));
    }

    #[test]
    fn segments_split_on_group_and_gap() {
        let rows = vec![
            obs("Spain", "2023-01-02"),
            obs("Norway", "2023-01-03"),
            obs("Spain", "2023-01-01"),
            obs("Norway", "2023-01-01"),
            obs("Norway", "2023-01-02"),
            obs("Norway", "2023-01-09"),
            obs("Spain", "2023-01-03"),
        ];
        let unbounded = contiguous_segments(&rows, None);
        assert_eq!(unbounded, vec![vec![3, 4, 1, 5], vec![2, 0, 6]]);

        let daily = contiguous_segments(&rows, Some(Duration::days(1)));
        assert_eq!(daily, vec![vec![3, 4, 1], vec![5], vec![2, 0, 6]]);
    }

    #[test]
    fn irregular_gaps_are_measured_against_the_median_spacing() {
        let rows = vec![
            obs("Norway", "2023-01-01"),
            obs("Norway", "2023-01-02"),
            obs("Norway", "2023-01-03"),
            obs("Norway", "2023-01-04"),
            obs("Norway", "2023-03-01"),
            obs("Norway", "2023-03-02"),
            obs("Spain", "2023-01-01"),
            obs("Spain", "2023-01-03"),
            obs("Spain", "2023-01-05"),
        ];
        let segments = contiguous_segments(&rows, None);
        let gaps = irregular_gaps(&rows, &segments, IRREGULAR_GAP_FACTOR);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].group, "Norway");
        assert_eq!(gaps[0].before, parse_timestamp("2023-01-04").unwrap());
        assert_eq!(gaps[0].gap(), Duration::days(56));
        assert_eq!(gaps[0].median, Duration::days(1));

        let split = contiguous_segments(&rows, Some(Duration::days(7)));
        assert!(irregular_gaps(&rows, &split, IRREGULAR_GAP_FACTOR).is_empty());
    }
}
