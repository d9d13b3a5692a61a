//! Batch scoring and the Markdown anomaly report.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use anyhow::{Context, Result};
use askama::Template;
use chrono::Timelike;
use serde::Serialize;
use tracing::info;

use crate::baseline::key::derive_key_string;
use crate::baseline::{score, AnomalyResult, Event};
use crate::config::BaselineConfig;
use crate::storage::BaselineStore;

/// Coverage counters for one scoring pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportStats {
    pub total_events: usize,
    pub scored: usize,
    pub skipped_no_baseline: usize,
    pub anomalies: usize,
}

impl ReportStats {
    /// Percentage of events that had a baseline.
    pub fn scored_rate(&self) -> f64 {
        percent(self.scored, self.total_events)
    }

    /// Percentage of scored events flagged anomalous.
    pub fn anomaly_rate(&self) -> f64 {
        percent(self.anomalies, self.scored)
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Score every event against the latest baseline for its key.
///
/// Events without a baseline are counted and skipped. Baselines are looked up
/// once per distinct key.
pub fn score_events_with_store(
    events: &[Event],
    store: &dyn BaselineStore,
    config: &BaselineConfig,
) -> Result<(Vec<AnomalyResult>, ReportStats)> {
    let mut cache = BTreeMap::new();
    let mut results = Vec::new();
    let mut stats = ReportStats {
        total_events: events.len(),
        ..ReportStats::default()
    };

    for event in events {
        let key = derive_key_string(event, config);
        let baseline = match cache.entry(key) {
            Entry::Occupied(cached) => cached.into_mut(),
            Entry::Vacant(slot) => {
                let latest = store.get_latest(slot.key())?;
                slot.insert(latest)
            }
        };

        let Some(baseline) = baseline.as_ref() else {
            stats.skipped_no_baseline += 1;
            continue;
        };

        let result = score(event, baseline, config)?;
        stats.scored += 1;
        if result.is_anomaly {
            stats.anomalies += 1;
        }
        results.push(result);
    }

    info!(
        total = stats.total_events,
        scored = stats.scored,
        skipped = stats.skipped_no_baseline,
        anomalies = stats.anomalies,
        "scoring complete"
    );
    Ok((results, stats))
}

/// Anomaly counts per entity, most anomalous first (ties by name).
pub fn anomalies_by_entity(results: &[AnomalyResult]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for r in results.iter().filter(|r| r.is_anomaly) {
        *counts.entry(r.event.entity_id.as_str()).or_default() += 1;
    }

    let mut out: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(entity, count)| (entity.to_string(), count))
        .collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

/// Anomaly counts per hour of day, ascending. Empty when hour bucketing is off.
pub fn anomalies_by_hour(results: &[AnomalyResult], enabled: bool) -> Vec<(u8, usize)> {
    if !enabled {
        return Vec::new();
    }
    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
    for r in results.iter().filter(|r| r.is_anomaly) {
        *counts.entry(r.event.timestamp.hour() as u8).or_default() += 1;
    }
    counts.into_iter().collect()
}

/// The `n` highest-scoring anomalies.
pub fn top_anomalies(results: &[AnomalyResult], n: usize) -> Vec<AnomalyResult> {
    let mut anomalies: Vec<AnomalyResult> = results.iter().filter(|r| r.is_anomaly).cloned().collect();
    anomalies.sort_by(|a, b| b.score.total_cmp(&a.score));
    anomalies.truncate(n);
    anomalies
}

/// Everything the Markdown report needs.
pub struct ReportContext<'a> {
    pub input_path: &'a str,
    pub db_path: &'a str,
    pub config: &'a BaselineConfig,
    pub stats: ReportStats,
    pub by_entity: &'a [(String, usize)],
    pub by_hour: &'a [(u8, usize)],
    pub top: &'a [AnomalyResult],
}

struct CountRow {
    label: String,
    count: usize,
}

struct TopRow {
    score: String,
    entity: String,
    metric: String,
    value: String,
    median: String,
    mad: String,
    key: String,
    time: String,
}

#[derive(Template)]
#[template(path = "report.md", escape = "none")]
struct ReportTemplate {
    input_path: String,
    db_path: String,
    use_hour_of_day: bool,
    mad_threshold: f64,
    min_samples: usize,
    min_mad: f64,
    total_events: usize,
    scored: usize,
    scored_rate: String,
    skipped: usize,
    anomalies: usize,
    anomaly_rate: String,
    by_entity: Vec<CountRow>,
    by_hour: Vec<CountRow>,
    top: Vec<TopRow>,
}

/// Render the Markdown report.
pub fn render_markdown(ctx: &ReportContext<'_>) -> Result<String> {
    let template = ReportTemplate {
        input_path: ctx.input_path.to_string(),
        db_path: ctx.db_path.to_string(),
        use_hour_of_day: ctx.config.use_hour_of_day,
        mad_threshold: ctx.config.mad_threshold,
        min_samples: ctx.config.min_samples,
        min_mad: ctx.config.min_mad,
        total_events: ctx.stats.total_events,
        scored: ctx.stats.scored,
        scored_rate: format!("{:.1}", ctx.stats.scored_rate()),
        skipped: ctx.stats.skipped_no_baseline,
        anomalies: ctx.stats.anomalies,
        anomaly_rate: format!("{:.1}", ctx.stats.anomaly_rate()),
        by_entity: ctx
            .by_entity
            .iter()
            .map(|(entity, count)| CountRow {
                label: entity.clone(),
                count: *count,
            })
            .collect(),
        by_hour: ctx
            .by_hour
            .iter()
            .map(|(hour, count)| CountRow {
                label: format!("{:02}:00", hour),
                count: *count,
            })
            .collect(),
        top: ctx
            .top
            .iter()
            .map(|r| TopRow {
                score: format!("{:.2}", r.score),
                entity: r.event.entity_id.clone(),
                metric: r.event.metric.clone(),
                value: format!("{:.2}", r.event.value),
                median: format!("{:.2}", r.baseline.median()),
                mad: format!("{:.4}", r.baseline.mad()),
                key: r.baseline.key_string(),
                time: r.event.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
            })
            .collect(),
    };

    template.render().context("failed to render report template")
}
