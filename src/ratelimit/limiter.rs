//! Core blocking rate limiter implementation.

use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::config::{LimiterConfig, DEFAULT_MAX_WAIT_FACTOR};
use crate::error::{PacelineError, Result};

use super::window::TriggerWindow;

/// A sliding-window rate limiter that blocks the calling thread.
///
/// At most `max_triggers` calls are admitted within any trailing
/// `max_period` window; a saturated `trigger()` sleeps until the oldest
/// live trigger expires, then retries.
///
/// This struct is thread-safe: the expire/check/admit sequence runs under
/// one lock acquisition, and the cooldown sleep happens with the lock
/// released, so a woken caller re-derives liveness before admitting.
pub struct RateLimiter {
    /// Live trigger timestamps
    window: Mutex<TriggerWindow>,
    /// Maximum number of triggers allowed within one window
    max_triggers: u32,
    /// Window length
    max_period: Duration,
    /// Per-call cooldown wait budget
    max_wait: Duration,
    /// Label attached to tracing events
    name: Option<String>,
}

impl RateLimiter {
    /// Create a rate limiter admitting `max_triggers` triggers per
    /// `max_period`.
    ///
    /// The wait budget defaults to eight windows per call. Returns an error
    /// if the capacity is zero or the period is zero.
    pub fn new(max_triggers: u32, max_period: Duration) -> Result<Self> {
        if max_triggers == 0 {
            return Err(PacelineError::InvalidMaxTriggers);
        }
        if max_period.is_zero() {
            return Err(PacelineError::InvalidMaxPeriod);
        }

        Ok(Self {
            window: Mutex::new(TriggerWindow::new(max_triggers, max_period)),
            max_triggers,
            max_period,
            max_wait: max_period.saturating_mul(DEFAULT_MAX_WAIT_FACTOR),
            name: None,
        })
    }

    /// Create a rate limiter from a validated configuration.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        config.validate()?;

        let mut limiter = Self::new(config.max_triggers, config.max_period())?;
        limiter.max_wait = config.max_wait();
        limiter.name = config.name.clone();
        Ok(limiter)
    }

    /// Gate one unit of work, blocking until it can be admitted.
    ///
    /// Expires stale triggers, then either records the new trigger and
    /// returns, or sleeps until the oldest live trigger expires and retries.
    /// Fails with [`PacelineError::Timeout`] when the next sleep would push
    /// the call past its wait budget; no trigger is recorded in that case.
    pub fn trigger(&self) -> Result<()> {
        let mut waited = Duration::ZERO;

        loop {
            let cooldown = {
                let mut window = self.window.lock();
                let now = Instant::now();

                let expired = window.expire(now);
                if expired > 0 {
                    trace!(
                        limiter = self.name.as_deref().unwrap_or_default(),
                        expired = expired,
                        live = window.len(),
                        "Expired stale triggers"
                    );
                }

                if !window.is_saturated() {
                    window.record(now);
                    trace!(
                        limiter = self.name.as_deref().unwrap_or_default(),
                        live = window.len(),
                        "Trigger admitted"
                    );
                    return Ok(());
                }

                debug!(
                    limiter = self.name.as_deref().unwrap_or_default(),
                    live = window.len(),
                    max_triggers = self.max_triggers,
                    "Trigger budget exhausted"
                );
                window.cooldown(now)
            };

            if waited + cooldown > self.max_wait {
                debug!(
                    limiter = self.name.as_deref().unwrap_or_default(),
                    waited_secs = waited.as_secs(),
                    budget_secs = self.max_wait.as_secs(),
                    "Cooldown wait budget exhausted"
                );
                return Err(PacelineError::Timeout {
                    waited,
                    budget: self.max_wait,
                });
            }

            info!(
                limiter = self.name.as_deref().unwrap_or_default(),
                wait_secs = cooldown.as_secs(),
                "Rate limit reached, waiting"
            );

            // Sleep with the lock released; another caller may take the
            // freed slot, in which case the next pass loops again.
            thread::sleep(cooldown);
            waited += cooldown;
        }
    }

    /// Number of live triggers as of the last check.
    ///
    /// Does not re-run expiry; only `trigger()` re-derives liveness.
    pub fn len(&self) -> usize {
        self.window.lock().len()
    }

    /// Whether no triggers are currently recorded.
    pub fn is_empty(&self) -> bool {
        self.window.lock().is_empty()
    }

    /// The configured trigger capacity.
    pub fn max_triggers(&self) -> u32 {
        self.max_triggers
    }

    /// The configured window length.
    pub fn max_period(&self) -> Duration {
        self.max_period
    }

    /// The per-call cooldown wait budget.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }
}
