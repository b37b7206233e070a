pub mod bundle;
pub mod commands;
pub mod config;
pub mod dataset;
pub mod drift;
pub mod encoding;
pub mod error;
pub mod forest;
pub mod history;
pub mod importance;
pub mod inference;
pub mod metrics;
pub mod model;
pub mod scaler;
pub mod schema;
pub mod sequence;
pub mod split;
pub mod stats;
pub mod training;

pub use error::{PipelineError, PipelineResult};
