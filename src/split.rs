use crate::error::{PipelineError, PipelineResult};
use crate::sequence::SequenceSet;

#[derive(Debug, Clone, PartialEq)]
pub struct SplitSets {
    pub train: SequenceSet,
    pub test: SequenceSet,
}

/// Ordered train/test split. Nothing is shuffled: everything before the
/// boundary trains, everything at or after it tests.
#[derive(Debug, Clone, Copy)]
pub struct ChronologicalSplitter {
    train_fraction: f64,
}

impl ChronologicalSplitter {
    pub fn new(train_fraction: f64) -> PipelineResult<Self> {
        if !(0.0..=1.0).contains(&train_fraction) {
            return Err(PipelineError::InvalidConfig(format!(
                "train fraction must be within [0, 1] (value: {train_fraction})"
            )));
        }
        Ok(Self { train_fraction })
    }

    pub fn train_fraction(&self) -> f64 {
        self.train_fraction
    }

    /// `floor(n * fraction)`
    pub fn boundary(&self, n: usize) -> usize {
        ((n as f64 * self.train_fraction).floor() as usize).min(n)
    }

    pub fn split(&self, mut set: SequenceSet) -> SplitSets {
        let boundary = self.boundary(set.len());
        let test = SequenceSet {
            sequences: set.sequences.split_off(boundary),
            targets: set.targets.split_off(boundary),
        };
        SplitSets { train: set, test }
    }
}
