use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the encoding, scaling, training and inference stages.
///
/// Every stage fails fast: the first error propagates to the caller and no
/// stage substitutes a default value for bad input.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing, unexpected or mistyped columns and fields.
    #[error("schema error: {0}")]
    Schema(String),

    /// A categorical label that was not present when the encoder was fit.
    #[error("unknown category {label:?} for field {field}")]
    UnknownCategory { field: String, label: String },

    /// A fitted component was used before fit, or a bundle was only partially available.
    #[error("{component} is not fitted")]
    NotFitted { component: String },

    /// Artifacts that were not produced by the same training run.
    #[error("artifact bundle mismatch: {0}")]
    BundleMismatch(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("i/o failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact codec failed for {}: {source}", path.display())]
    Codec {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn not_fitted(component: impl Into<String>) -> Self {
        Self::NotFitted {
            component: component.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn codec(path: impl Into<PathBuf>, source: bincode::Error) -> Self {
        Self::Codec {
            path: path.into(),
            source,
        }
    }
}
