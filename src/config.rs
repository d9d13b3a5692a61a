//! TOML configuration for baseline training and scoring.
//!
//! Resolution order: an explicit `--config` path, then the file named by the
//! `BASELINE_CONFIG` environment variable, then compiled-in defaults. CLI
//! flags are applied on top by the binary, and the result is validated
//! before use.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "BASELINE_CONFIG";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("mad_threshold must be a positive finite number, got {0}")]
    InvalidThreshold(f64),

    #[error("min_mad must be a positive finite number, got {0}")]
    InvalidMinMad(f64),

    #[error("min_samples must be at least 1")]
    InvalidMinSamples,
}

/// Knobs shared by training and scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaselineConfig {
    /// Bucket baselines by hour of day (0-23).
    pub use_hour_of_day: bool,
    /// Anomaly cutoff in MAD units (inclusive).
    pub mad_threshold: f64,
    /// Minimum events per key before a baseline is trained.
    pub min_samples: usize,
    /// Dispersion floor; guards against zero-MAD baselines.
    pub min_mad: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            use_hour_of_day: true,
            mad_threshold: 3.5,
            min_samples: 30,
            min_mad: 1e-6,
        }
    }
}

impl BaselineConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded baseline configuration");
        Ok(config)
    }

    /// Resolve configuration for a run.
    ///
    /// An explicit path must load. A broken `BASELINE_CONFIG` only warns and
    /// falls back to defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "BASELINE_CONFIG set but file could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file given, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.mad_threshold > 0.0 && self.mad_threshold.is_finite()) {
            return Err(ConfigError::InvalidThreshold(self.mad_threshold));
        }
        if !(self.min_mad > 0.0 && self.min_mad.is_finite()) {
            return Err(ConfigError::InvalidMinMad(self.min_mad));
        }
        if self.min_samples == 0 {
            return Err(ConfigError::InvalidMinSamples);
        }
        Ok(())
    }
}
