//! Event ingest from CSV and JSONL files.
//!
//! Ingest is all-or-nothing: one malformed row (bad timestamp, non-finite
//! value, broken tags JSON, missing field) rejects the whole file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::baseline::{parse_timestamp, Event};

/// Columns every CSV input must carry. `tags` is optional.
pub const REQUIRED_COLUMNS: [&str; 4] = ["timestamp", "entity_id", "metric", "value"];

/// Load events from a `.csv` or `.jsonl` file.
pub fn load_events(path: impl AsRef<Path>) -> Result<Vec<Event>> {
    let path = path.as_ref();
    if !path.exists() {
        bail!("input file not found: {}", path.display());
    }

    let suffix = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let events = match suffix.as_str() {
        "csv" => read_csv(path)?,
        "jsonl" => read_jsonl(path)?,
        other => bail!("unsupported input format '.{}'. Use .csv or .jsonl", other),
    };

    info!(path = %path.display(), events = events.len(), "loaded events");
    Ok(events)
}

fn validate(event: Event) -> Result<Event> {
    ensure!(!event.entity_id.trim().is_empty(), "entity_id must not be empty");
    ensure!(!event.metric.trim().is_empty(), "metric must not be empty");
    ensure!(
        event.value.is_finite(),
        "value must be a finite number, got {}",
        event.value
    );
    Ok(event)
}

fn read_jsonl(path: &Path) -> Result<Vec<Event>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let lineno = idx + 1;
        let line = line.with_context(|| format!("failed to read line {} of {}", lineno, path.display()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: Event = serde_json::from_str(line)
            .with_context(|| format!("invalid JSON on line {} in {}", lineno, path.display()))?;
        events.push(
            validate(event)
                .with_context(|| format!("invalid event on line {} in {}", lineno, path.display()))?,
        );
    }
    Ok(events)
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    entity_id: String,
    metric: String,
    value: f64,
    #[serde(default)]
    tags: Option<String>,
}

impl CsvRow {
    fn into_event(self) -> Result<Event> {
        let timestamp = parse_timestamp(&self.timestamp)?;

        let tags = match self.tags.as_deref().map(str::trim) {
            None | Some("") => serde_json::Map::new(),
            Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(_) => bail!("tags must be a JSON object, got: {}", raw),
                Err(e) => bail!("invalid tags JSON '{}': {}", raw, e),
            },
        };

        validate(Event {
            timestamp,
            entity_id: self.entity_id,
            metric: self.metric,
            value: self.value,
            tags,
        })
    }
}

fn read_csv(path: &Path) -> Result<Vec<Event>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)
        .with_context(|| format!("failed to open CSV: {}", path.display()))?;

    let headers = rdr
        .headers()
        .with_context(|| format!("failed to read CSV headers: {}", path.display()))?
        .clone();
    if headers.is_empty() {
        bail!("CSV file has no header row: {}", path.display());
    }

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect();
    if !missing.is_empty() {
        bail!(
            "CSV missing required columns {:?} in {}",
            missing,
            path.display()
        );
    }

    let mut events = Vec::new();
    for result in rdr.deserialize::<CsvRow>() {
        let row = result.with_context(|| format!("malformed CSV row in {}", path.display()))?;
        let event = row
            .into_event()
            .with_context(|| format!("invalid CSV row {} in {}", events.len() + 1, path.display()))?;
        events.push(event);
    }
    Ok(events)
}
