//! Single-event explanation: derive the key, look up the latest baseline,
//! score, and describe the outcome in plain text.

use std::fmt;

use anyhow::Result;
use chrono::NaiveDateTime;
use tracing::debug;

use crate::baseline::key::derive_key_string;
use crate::baseline::{score, AnomalyResult, Event};
use crate::config::BaselineConfig;
use crate::storage::BaselineStore;

/// First event matching timestamp, entity and metric exactly.
pub fn find_event<'a>(
    events: &'a [Event],
    timestamp: NaiveDateTime,
    entity_id: &str,
    metric: &str,
) -> Option<&'a Event> {
    events
        .iter()
        .find(|e| e.timestamp == timestamp && e.entity_id == entity_id && e.metric == metric)
}

/// Outcome of [`explain_event`]. `Display` renders the human-readable text.
#[derive(Debug, Clone)]
pub struct Explanation {
    pub key: String,
    pub mad_threshold: f64,
    /// `None` when no baseline exists for `key`.
    pub result: Option<AnomalyResult>,
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(result) = &self.result else {
            writeln!(f, "No baseline found for this event.")?;
            writeln!(f, "- Derived key: {}", self.key)?;
            return writeln!(
                f,
                "This usually means there wasn't enough training history for that key \
                 (or hour-of-day bucketing differs from training)."
            );
        };

        let event = &result.event;
        let baseline = &result.baseline;
        writeln!(f, "Explain result")?;
        writeln!(
            f,
            "- Event: {} {} {} value={:.2}",
            event.timestamp.format("%Y-%m-%dT%H:%M:%S%.f"),
            event.entity_id,
            event.metric,
            event.value
        )?;
        writeln!(f, "- Derived key: {}", self.key)?;
        writeln!(
            f,
            "- Baseline: median={:.2}, MAD={:.4}, samples={}",
            baseline.median(),
            baseline.mad(),
            baseline.sample_count()
        )?;
        writeln!(f, "- Score: {:.2} MAD units", result.score)?;
        writeln!(f, "- Threshold: {:.2}", self.mad_threshold)?;
        writeln!(
            f,
            "- Decision: {}",
            if result.is_anomaly { "ANOMALY" } else { "normal" }
        )?;
        writeln!(f, "- Why: {}", result.explanation)
    }
}

/// Explain how one event compares to the latest baseline for its key.
pub fn explain_event(
    event: &Event,
    store: &dyn BaselineStore,
    config: &BaselineConfig,
) -> Result<Explanation> {
    let key = derive_key_string(event, config);
    let result = match store.get_latest(&key)? {
        Some(baseline) => Some(score(event, &baseline, config)?),
        None => {
            debug!(key = %key, "no baseline for event");
            None
        }
    };

    Ok(Explanation {
        key,
        mad_threshold: config.mad_threshold,
        result,
    })
}
