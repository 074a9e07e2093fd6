//! Error types for the Paceline limiters.

use std::time::Duration;
use thiserror::Error;

/// Main error type for Paceline operations.
#[derive(Error, Debug)]
pub enum PacelineError {
    /// The cooldown wait budget was exhausted with the window still saturated.
    ///
    /// This indicates a configuration or clock problem rather than a
    /// transient condition; callers should treat it as fatal to the call.
    #[error("Rate limit timeout: waited {}s of a {}s budget without capacity opening", waited.as_secs(), budget.as_secs())]
    Timeout {
        /// Total time this call spent in cooldown waits.
        waited: Duration,
        /// The per-call wait budget that was exceeded.
        budget: Duration,
    },

    /// A limiter was constructed with a trigger capacity of zero.
    #[error("max_triggers must be greater than zero")]
    InvalidMaxTriggers,

    /// A limiter was constructed with a zero-length window.
    #[error("max_period must be greater than zero")]
    InvalidMaxPeriod,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Paceline operations.
pub type Result<T> = std::result::Result<T, PacelineError>;
