//! Baseline key derivation.

use chrono::Timelike;

use crate::baseline::model::{BaselineKey, Event};
use crate::config::BaselineConfig;

/// Derive the baseline key for an event under the configured granularity.
///
/// Training and scoring must run with the same `use_hour_of_day` setting,
/// otherwise lookups silently miss.
pub fn derive_key(event: &Event, config: &BaselineConfig) -> BaselineKey {
    let hour_of_day = if config.use_hour_of_day {
        // hour() is always 0..=23
        Some(event.timestamp.hour() as u8)
    } else {
        None
    };
    BaselineKey::new(event.entity_id.clone(), event.metric.clone(), hour_of_day)
}

/// Canonical key string for an event; shorthand for grouping and lookups.
pub fn derive_key_string(event: &Event, config: &BaselineConfig) -> String {
    derive_key(event, config).as_key_string()
}
