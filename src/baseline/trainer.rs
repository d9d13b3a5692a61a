//! Batch baseline training.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::baseline::key::{derive_key, derive_key_string};
use crate::baseline::model::{BaselineStats, BaselineStatsV1, Event};
use crate::baseline::stats::compute_center_and_dispersion;
use crate::baseline::BaselineError;
use crate::clock::Clock;
use crate::config::BaselineConfig;

/// Counts describing one training run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TrainSummary {
    pub events: usize,
    pub groups: usize,
    pub baselines: usize,
    /// Groups discarded for having fewer than `min_samples` events.
    pub skipped_groups: usize,
}

/// Train one baseline per key that has at least `min_samples` events.
///
/// Output order is unspecified.
pub fn train(
    events: &[Event],
    config: &BaselineConfig,
    clock: &dyn Clock,
) -> Result<Vec<BaselineStats>, BaselineError> {
    train_with_summary(events, config, clock).map(|(baselines, _)| baselines)
}

/// Same as [`train`], also reporting how many groups were skipped.
pub fn train_with_summary(
    events: &[Event],
    config: &BaselineConfig,
    clock: &dyn Clock,
) -> Result<(Vec<BaselineStats>, TrainSummary), BaselineError> {
    // Group on the canonical string so grouping and storage agree on identity.
    let mut groups: HashMap<String, Vec<&Event>> = HashMap::new();
    for event in events {
        groups
            .entry(derive_key_string(event, config))
            .or_default()
            .push(event);
    }

    let created_at = clock.now();
    let mut summary = TrainSummary {
        events: events.len(),
        groups: groups.len(),
        ..TrainSummary::default()
    };
    let mut baselines = Vec::new();

    for (key_str, mut group) in groups {
        if group.len() < config.min_samples {
            debug!(
                key = %key_str,
                samples = group.len(),
                min_samples = config.min_samples,
                "not enough history, skipping"
            );
            summary.skipped_groups += 1;
            continue;
        }

        group.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let (first, last) = (group[0], group[group.len() - 1]);

        let values: Vec<f64> = group.iter().map(|e| e.value).collect();
        let (median, mad) = compute_center_and_dispersion(&values, config.min_mad)?;

        debug!(key = %key_str, median, mad, samples = values.len(), "trained baseline");

        baselines.push(BaselineStats::V1(BaselineStatsV1 {
            key: derive_key(first, config),
            median,
            mad,
            sample_count: values.len(),
            training_start: first.timestamp,
            training_end: last.timestamp,
            created_at,
        }));
    }

    summary.baselines = baselines.len();
    info!(
        events = summary.events,
        groups = summary.groups,
        baselines = summary.baselines,
        skipped = summary.skipped_groups,
        "training complete"
    );

    Ok((baselines, summary))
}
