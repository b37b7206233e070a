pub mod fields;
pub mod history;
pub mod predict;
pub mod rank_features;
pub mod stats;
pub mod train;
