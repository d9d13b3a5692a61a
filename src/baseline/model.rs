//! Records shared by training, storage, scoring and reporting.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Schema version carried by [`BaselineStatsV1`] artifacts.
pub const SCHEMA_V1: u32 = 1;

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
#[error("unrecognized timestamp '{0}' (expected ISO-8601, e.g. 2026-01-01T14:00:00)")]
pub struct TimestampError(pub String);

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parse an ISO-8601 timestamp into the wall-clock time it was written in.
///
/// Offset forms (`Z`, `+02:00`) keep their local reading: `14:00+02:00`
/// buckets into hour 14, same as a naive `14:00`.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, TimestampError> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local());
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Ok(dt.naive_local());
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| TimestampError(raw.to_string()))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A single observed data point.
///
/// Generic over the signal: latency, auth failures, DNS volume and so on all fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: NaiveDateTime,
    pub entity_id: String,
    pub metric: String,
    pub value: f64,
    /// Free-form labels. Carried through, never used for grouping.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub tags: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn new(
        timestamp: NaiveDateTime,
        entity_id: impl Into<String>,
        metric: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            timestamp,
            entity_id: entity_id.into(),
            metric: metric.into(),
            value,
            tags: serde_json::Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// BaselineKey
// ---------------------------------------------------------------------------

/// The slice of behavior a baseline describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaselineKey {
    pub entity_id: String,
    pub metric: String,
    #[serde(default)]
    pub hour_of_day: Option<u8>,
}

impl BaselineKey {
    pub fn new(entity_id: impl Into<String>, metric: impl Into<String>, hour_of_day: Option<u8>) -> Self {
        Self {
            entity_id: entity_id.into(),
            metric: metric.into(),
            hour_of_day,
        }
    }

    /// Canonical identity used for grouping, storage and lookup.
    ///
    /// `<entity>:<metric>` or `<entity>:<metric>:hour=<H>`. A `:` or `\`
    /// inside a component is backslash-escaped so distinct keys never share a
    /// string.
    pub fn as_key_string(&self) -> String {
        let mut out = String::with_capacity(self.entity_id.len() + self.metric.len() + 9);
        push_escaped(&mut out, &self.entity_id);
        out.push(':');
        push_escaped(&mut out, &self.metric);
        if let Some(hour) = self.hour_of_day {
            out.push_str(":hour=");
            out.push_str(&hour.to_string());
        }
        out
    }
}

fn push_escaped(out: &mut String, component: &str) {
    for c in component.chars() {
        if c == ':' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}

impl fmt::Display for BaselineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key_string())
    }
}

// ---------------------------------------------------------------------------
// BaselineStats
// ---------------------------------------------------------------------------

/// First artifact schema: a median/MAD pair plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStatsV1 {
    pub key: BaselineKey,
    pub median: f64,
    pub mad: f64,
    pub sample_count: usize,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub training_start: NaiveDateTime,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub training_end: NaiveDateTime,
    pub created_at: DateTime<Utc>,
}

/// A learned definition of normal for one [`BaselineKey`].
///
/// Artifacts are immutable. On the wire they are a flat object carrying an
/// integer `version` next to the schema's fields, so stored history stays
/// readable as new schemas are added.
#[derive(Debug, Clone, PartialEq)]
pub enum BaselineStats {
    V1(BaselineStatsV1),
}

#[derive(Serialize)]
struct VersionedRef<'a, T> {
    version: u32,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Deserialize)]
struct VersionedOwned {
    version: u32,
    #[serde(flatten)]
    body: serde_json::Value,
}

impl Serialize for BaselineStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BaselineStats::V1(body) => VersionedRef {
                version: SCHEMA_V1,
                body,
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for BaselineStats {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = VersionedOwned::deserialize(deserializer)?;
        match raw.version {
            SCHEMA_V1 => BaselineStatsV1::deserialize(raw.body)
                .map(BaselineStats::V1)
                .map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!(
                "unsupported baseline version {}",
                other
            ))),
        }
    }
}

impl From<BaselineStatsV1> for BaselineStats {
    fn from(v1: BaselineStatsV1) -> Self {
        BaselineStats::V1(v1)
    }
}

impl BaselineStats {
    pub fn version(&self) -> u32 {
        match self {
            BaselineStats::V1(_) => SCHEMA_V1,
        }
    }

    pub fn key(&self) -> &BaselineKey {
        match self {
            BaselineStats::V1(b) => &b.key,
        }
    }

    pub fn key_string(&self) -> String {
        self.key().as_key_string()
    }

    pub fn median(&self) -> f64 {
        match self {
            BaselineStats::V1(b) => b.median,
        }
    }

    pub fn mad(&self) -> f64 {
        match self {
            BaselineStats::V1(b) => b.mad,
        }
    }

    pub fn sample_count(&self) -> usize {
        match self {
            BaselineStats::V1(b) => b.sample_count,
        }
    }

    pub fn training_start(&self) -> NaiveDateTime {
        match self {
            BaselineStats::V1(b) => b.training_start,
        }
    }

    pub fn training_end(&self) -> NaiveDateTime {
        match self {
            BaselineStats::V1(b) => b.training_end,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            BaselineStats::V1(b) => b.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// AnomalyResult
// ---------------------------------------------------------------------------

/// Which side of the baseline median a value fell on.
///
/// A value exactly at the median reports `Below`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Above => write!(f, "above"),
            Direction::Below => write!(f, "below"),
        }
    }
}

/// Outcome of scoring one event against one baseline. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub event: Event,
    pub baseline: BaselineStats,
    /// Distance from the median in MAD units.
    pub score: f64,
    pub is_anomaly: bool,
    pub direction: Direction,
    pub explanation: String,
}
