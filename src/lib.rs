//! Baseline Engine -- robust per-key baselines for metric time series.
//!
//! Learns a median/MAD baseline for every `(entity, metric[, hour of day])`
//! key from historical events, persists versioned baselines in SQLite, and
//! scores new events against the latest baseline for their key.

pub mod baseline;
pub mod clock;
pub mod config;
pub mod demo;
pub mod explain;
pub mod ingest;
pub mod report;
pub mod storage;

use anyhow::Result;

use crate::baseline::{Event, TrainSummary};
use crate::clock::Clock;
use crate::config::BaselineConfig;
use crate::storage::BaselineStore;

/// Train baselines from `events` and persist them.
///
/// Returns the training summary and the number of rows actually inserted
/// (identical artifacts already in the store are not counted).
pub fn run_training(
    events: &[Event],
    store: &dyn BaselineStore,
    config: &BaselineConfig,
    clock: &dyn Clock,
) -> Result<(TrainSummary, usize)> {
    let (baselines, summary) = baseline::train_with_summary(events, config, clock)?;
    let inserted = store.put_many(&baselines)?;
    tracing::info!(
        baselines = baselines.len(),
        inserted,
        skipped_groups = summary.skipped_groups,
        "training run stored"
    );
    Ok((summary, inserted))
}
