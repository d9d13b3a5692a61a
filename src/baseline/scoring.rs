//! Deviation scoring against a learned baseline.

use crate::baseline::model::{AnomalyResult, BaselineStats, Direction, Event};
use crate::baseline::BaselineError;
use crate::config::BaselineConfig;

/// Score a single event against a baseline.
///
/// `score = |value - median| / mad`; anything at or past `mad_threshold` is
/// anomalous. Pure: no I/O, no clock.
pub fn score(
    event: &Event,
    baseline: &BaselineStats,
    config: &BaselineConfig,
) -> Result<AnomalyResult, BaselineError> {
    let mad = baseline.mad();
    if !(mad > 0.0 && mad.is_finite()) {
        return Err(BaselineError::InvalidBaseline {
            key: baseline.key_string(),
            mad,
        });
    }

    let median = baseline.median();
    let deviation = (event.value - median).abs();
    let score = deviation / mad;
    let is_anomaly = score >= config.mad_threshold;

    let direction = if event.value > median {
        Direction::Above
    } else {
        Direction::Below
    };

    let explanation = format!(
        "Value {:.2} is {:.2} MAD {} baseline median {:.2} for {}",
        event.value,
        score,
        direction,
        median,
        baseline.key()
    );

    Ok(AnomalyResult {
        event: event.clone(),
        baseline: baseline.clone(),
        score,
        is_anomaly,
        direction,
        explanation,
    })
}
