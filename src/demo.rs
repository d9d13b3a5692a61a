//! Synthetic latency data for demos and end-to-end tests.
//!
//! Produces a clean training window and a scoring window with a sustained
//! incident (plus a spike at its start) on selected endpoints. Output is
//! deterministic for a given seed.

use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDateTime, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

/// Header written to every generated CSV.
pub const CSV_HEADER: [&str; 4] = ["timestamp", "entity_id", "metric", "value"];

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub start: NaiveDateTime,
    pub train_days: i64,
    pub score_days: i64,
    pub interval_minutes: i64,

    pub endpoints: Vec<String>,
    pub metric: String,

    /// Amplitude of the daily sine pattern, in ms.
    pub daily_amplitude_ms: f64,
    pub noise_std_ms: f64,

    // Incident, applied in the scoring window only.
    pub incident_enabled: bool,
    /// Day within the scoring window (0 = first day).
    pub incident_day_offset: i64,
    pub incident_start_hour: u32,
    pub incident_duration_hours: i64,
    pub incident_endpoints: Vec<String>,
    pub incident_multiplier: f64,
    pub incident_spike_ms: f64,

    pub seed: u64,
}

impl DemoConfig {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            start,
            train_days: 7,
            score_days: 2,
            interval_minutes: 5,
            endpoints: vec!["/login".into(), "/search".into(), "/checkout".into()],
            metric: "latency_p95_ms".into(),
            daily_amplitude_ms: 35.0,
            noise_std_ms: 8.0,
            incident_enabled: true,
            incident_day_offset: 0,
            incident_start_hour: 13,
            incident_duration_hours: 4,
            incident_endpoints: vec!["/login".into(), "/checkout".into()],
            incident_multiplier: 1.8,
            incident_spike_ms: 120.0,
            seed: 42,
        }
    }

    fn score_start(&self) -> Result<NaiveDateTime> {
        add_days(self.start, self.train_days)
    }

    /// `[start, end)` of the incident, if enabled.
    fn incident_window(&self) -> Result<Option<(NaiveDateTime, NaiveDateTime)>> {
        if !self.incident_enabled {
            return Ok(None);
        }
        let day = add_days(self.score_start()?, self.incident_day_offset)?.date();
        let Some(start) = day.and_hms_opt(self.incident_start_hour, 0, 0) else {
            bail!("incident start hour {} out of range", self.incident_start_hour);
        };
        let Some(end) = Duration::try_hours(self.incident_duration_hours)
            .and_then(|d| start.checked_add_signed(d))
        else {
            bail!(
                "incident duration of {} hours is out of range",
                self.incident_duration_hours
            );
        };
        Ok(Some((start, end)))
    }
}

fn add_days(from: NaiveDateTime, days: i64) -> Result<NaiveDateTime> {
    match Duration::try_days(days).and_then(|d| from.checked_add_signed(d)) {
        Some(ts) => Ok(ts),
        None => bail!("{} + {} days is out of range", from, days),
    }
}

fn base_latency(endpoint: &str) -> f64 {
    match endpoint {
        "/login" => 95.0,
        "/search" => 120.0,
        "/checkout" => 140.0,
        _ => 110.0,
    }
}

/// Smooth daily pattern peaking in the afternoon, as an additive delta in ms.
fn daily_seasonality(hour: u32, amplitude: f64) -> f64 {
    let radians = 2.0 * PI * (hour as f64 / 24.0);
    amplitude * (radians - 2.0).sin()
}

/// Box-Muller normal sample.
fn gaussian(rng: &mut StdRng, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Generate one CSV covering `[window_start, window_start + days)`.
pub fn generate_events_csv(
    out_path: &Path,
    cfg: &DemoConfig,
    window_start: NaiveDateTime,
    days: i64,
    apply_incident: bool,
) -> Result<usize> {
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if days < 0 {
        bail!("window length must not be negative, got {} days", days);
    }
    if cfg.interval_minutes <= 0 {
        bail!("interval_minutes must be positive, got {}", cfg.interval_minutes);
    }
    let Some(step) = Duration::try_minutes(cfg.interval_minutes) else {
        bail!("interval of {} minutes is out of range", cfg.interval_minutes);
    };
    let end = add_days(window_start, days)?;
    let incident = if apply_incident { cfg.incident_window()? } else { None };

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut writer = csv::Writer::from_path(out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    writer.write_record(CSV_HEADER)?;

    let mut ts = window_start;
    let mut rows = 0;

    while ts < end {
        for endpoint in &cfg.endpoints {
            let mut value = base_latency(endpoint)
                + daily_seasonality(ts.hour(), cfg.daily_amplitude_ms)
                + gaussian(&mut rng, cfg.noise_std_ms);

            if let Some((start, stop)) = incident {
                if cfg.incident_endpoints.contains(endpoint) && start <= ts && ts < stop {
                    value *= cfg.incident_multiplier;
                    if ts == start {
                        value += cfg.incident_spike_ms;
                    }
                }
            }

            let value = value.max(1.0);
            writer.write_record([
                ts.format("%Y-%m-%dT%H:%M:%S").to_string(),
                endpoint.clone(),
                cfg.metric.clone(),
                format!("{:.3}", value),
            ])?;
            rows += 1;
        }
        ts = match ts.checked_add_signed(step) {
            Some(next) => next,
            None => break,
        };
    }

    writer.flush()?;
    info!(path = %out_path.display(), rows, apply_incident, "wrote demo events");
    Ok(rows)
}

/// Write the training window (no incident) and the scoring window (with incident).
pub fn generate_train_and_score(train_out: &Path, score_out: &Path, cfg: &DemoConfig) -> Result<()> {
    generate_events_csv(train_out, cfg, cfg.start, cfg.train_days, false)?;
    generate_events_csv(score_out, cfg, cfg.score_start()?, cfg.score_days, true)?;
    Ok(())
}
