//! Baseline training and deviation scoring.
//!
//! Events are grouped by a derived [`BaselineKey`], each group with enough
//! history is summarized by a robust center (median) and dispersion (MAD),
//! and new events are scored in MAD units against the latest baseline for
//! their key.

pub mod key;
pub mod model;
pub mod scoring;
pub mod stats;
pub mod trainer;

pub use key::derive_key;
pub use model::{
    parse_timestamp, AnomalyResult, BaselineKey, BaselineStats, BaselineStatsV1, Direction, Event,
};
pub use scoring::score;
pub use stats::compute_center_and_dispersion;
pub use trainer::{train, train_with_summary, TrainSummary};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum BaselineError {
    #[error("robust statistics need at least one value")]
    EmptyInput,

    #[error("robust statistics need finite values, got a non-finite value at index {index}")]
    NonFiniteInput { index: usize },

    #[error("baseline {key} has non-positive dispersion (mad={mad}); refusing to score")]
    InvalidBaseline { key: String, mad: f64 },
}
