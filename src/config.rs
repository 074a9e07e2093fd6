//! Configuration management for Paceline limiters.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{PacelineError, Result};

/// How many windows' worth of waiting a single `trigger()` call may
/// accumulate before it fails with a timeout, when no explicit budget
/// is configured.
pub(crate) const DEFAULT_MAX_WAIT_FACTOR: u32 = 8;

/// Configuration for a single rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum number of triggers allowed within one window
    pub max_triggers: u32,

    /// Window length in seconds
    pub max_period_secs: u64,

    /// Per-call cooldown wait budget in seconds.
    ///
    /// `None` derives the default of eight windows' worth of waiting;
    /// zero makes saturated calls fail immediately instead of blocking.
    #[serde(default)]
    pub max_wait_secs: Option<u64>,

    /// Optional label attached to this limiter's tracing events
    #[serde(default)]
    pub name: Option<String>,
}

impl LimiterConfig {
    /// Create a configuration with the given capacity and window length.
    pub fn new(max_triggers: u32, max_period_secs: u64) -> Self {
        Self {
            max_triggers,
            max_period_secs,
            max_wait_secs: None,
            name: None,
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| PacelineError::Config(format!("Failed to parse limiter config: {}", e)))
    }

    /// Validate the configuration.
    ///
    /// A zero capacity can never admit a trigger and a zero-length window
    /// cannot throttle, so both are rejected rather than silently permitted.
    pub fn validate(&self) -> Result<()> {
        if self.max_triggers == 0 {
            return Err(PacelineError::InvalidMaxTriggers);
        }
        if self.max_period_secs == 0 {
            return Err(PacelineError::InvalidMaxPeriod);
        }
        Ok(())
    }

    /// The window length as a duration.
    pub fn max_period(&self) -> Duration {
        Duration::from_secs(self.max_period_secs)
    }

    /// The effective per-call wait budget as a duration.
    pub fn max_wait(&self) -> Duration {
        match self.max_wait_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.max_period().saturating_mul(DEFAULT_MAX_WAIT_FACTOR),
        }
    }
}
