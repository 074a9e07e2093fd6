//! Async variant of the rate limiter for tokio tasks.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::config::{LimiterConfig, DEFAULT_MAX_WAIT_FACTOR};
use crate::error::{PacelineError, Result};

use super::window::TriggerWindow;

/// A sliding-window rate limiter whose cooldown suspends the calling task
/// instead of blocking a thread.
///
/// Same admission protocol as [`RateLimiter`](super::RateLimiter). The
/// window lock is never held across an await, and dropping a pending
/// `trigger()` future admits nothing, so cancelling a waiting caller (for
/// example via `tokio::time::timeout`) leaves the limiter unchanged.
pub struct AsyncRateLimiter {
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

impl AsyncRateLimiter {
    /// Create an async rate limiter admitting `max_triggers` triggers per
    /// `max_period`.
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

    /// Create an async rate limiter from a validated configuration.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        config.validate()?;

        let mut limiter = Self::new(config.max_triggers, config.max_period())?;
        limiter.max_wait = config.max_wait();
        limiter.name = config.name.clone();
        Ok(limiter)
    }

    /// Gate one unit of work, suspending the task until it can be admitted.
    ///
    /// Fails with [`PacelineError::Timeout`] when the next sleep would push
    /// the call past its wait budget; no trigger is recorded in that case.
    pub async fn trigger(&self) -> Result<()> {
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

            tokio::time::sleep(cooldown).await;
            waited += cooldown;
        }
    }

    /// Number of live triggers as of the last check.
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

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::Arc;

    fn limiter(max_triggers: u32, max_period_secs: u64) -> AsyncRateLimiter {
        AsyncRateLimiter::new(max_triggers, Duration::from_secs(max_period_secs)).unwrap()
    }

    #[tokio::test]
    async fn test_triggers_under_capacity_do_not_block() {
        let limiter = limiter(10, 300);
        let start = Instant::now();

        for _ in 0..5 {
            limiter.trigger().await.unwrap();
        }

        assert_eq!(limiter.len(), 5);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_saturated_trigger_waits_for_oldest() {
        let limiter = limiter(1, 2);
        let start = Instant::now();

        limiter.trigger().await.unwrap();
        limiter.trigger().await.unwrap();

        assert_eq!(limiter.len(), 1);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_zero_budget_fails_fast_when_saturated() {
        let mut config = LimiterConfig::new(1, 60);
        config.max_wait_secs = Some(0);
        let limiter = AsyncRateLimiter::from_config(&config).unwrap();

        limiter.trigger().await.unwrap();

        let result = limiter.trigger().await;
        assert!(matches!(result, Err(PacelineError::Timeout { .. })));
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_trigger_admits_nothing() {
        let limiter = limiter(1, 3);
        limiter.trigger().await.unwrap();

        // The second call would sleep for 3s; cancel it early.
        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), limiter.trigger()).await;
        assert!(cancelled.is_err());
        assert_eq!(limiter.len(), 1);

        // The limiter still works after the cancellation.
        tokio::time::sleep(Duration::from_secs(3)).await;
        limiter.trigger().await.unwrap();
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_tasks_respect_capacity() {
        let limiter = Arc::new(limiter(3, 2));

        let calls = (0..6).map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.trigger().await })
        });

        for result in join_all(calls).await {
            result.unwrap().unwrap();
        }

        assert!(limiter.len() <= 3);
    }
}
