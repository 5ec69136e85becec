//! TOML configuration for the sequencer.
//!
//! Every field is optional; unset fields fall back to the defaults exposed
//! by the accessor methods.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::factor::QuotaIncreaseFactor;

/// Errors loading a [`SequencerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// `batch_size` must be at least 1.
    #[error("batch_size must be at least 1")]
    ZeroBatchSize,

    /// `increase_factor` must be a finite number.
    #[error("invalid quota increase factor {0}")]
    InvalidFactor(f64),
}

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Batch sizing and timing.
    pub sequencer: SequencerSection,
    /// Quota accounting.
    pub quota: QuotaSection,
}

/// `[sequencer]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SequencerSection {
    /// Maximum leaves integrated per batch.
    pub batch_size: Option<usize>,
    /// How long a leaf must have been queued before it is sequenced
    /// (e.g. `"10s"`).
    #[serde(deserialize_with = "humantime_serde::deserialize")]
    pub guard_window: Option<Duration>,
    /// Re-sign an idle tree's root once it is this old (e.g. `"1h 30m"`).
    /// `"0s"` disables re-signing.
    #[serde(deserialize_with = "humantime_serde::deserialize")]
    pub max_root_duration: Option<Duration>,
}

/// `[quota]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuotaSection {
    /// Multiplier for tokens returned after each batch. Below 1 acts as 1.
    pub increase_factor: Option<f64>,
}

/// Arguments for one `integrate_batch` call, resolved from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchParams {
    pub limit: usize,
    pub guard_window: Duration,
    pub max_root_duration: Duration,
}

impl SequencerConfig {
    /// Load and validate config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: SequencerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sequencer.batch_size == Some(0) {
            return Err(ConfigError::ZeroBatchSize);
        }
        if let Some(f) = self.quota.increase_factor {
            if !f.is_finite() {
                return Err(ConfigError::InvalidFactor(f));
            }
        }
        Ok(())
    }

    /// Effective batch size. Defaults to 50.
    pub fn batch_size(&self) -> usize {
        self.sequencer.batch_size.unwrap_or(50)
    }

    /// Effective guard window. Defaults to zero.
    pub fn guard_window(&self) -> Duration {
        self.sequencer.guard_window.unwrap_or(Duration::ZERO)
    }

    /// Effective maximum root age. Defaults to zero (never re-sign).
    pub fn max_root_duration(&self) -> Duration {
        self.sequencer.max_root_duration.unwrap_or(Duration::ZERO)
    }

    /// Effective quota increase factor. Defaults to 1.
    pub fn increase_factor(&self) -> f64 {
        self.quota.increase_factor.unwrap_or(1.0)
    }

    /// A shared factor initialised from this config.
    pub fn quota_increase_factor(&self) -> QuotaIncreaseFactor {
        QuotaIncreaseFactor::new(self.increase_factor())
    }

    /// `integrate_batch` arguments from this config.
    pub fn batch_params(&self) -> BatchParams {
        BatchParams {
            limit: self.batch_size(),
            guard_window: self.guard_window(),
            max_root_duration: self.max_root_duration(),
        }
    }
}

/// Optional durations written in humane form (`"10s"`, `"1h 30m"`).
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
