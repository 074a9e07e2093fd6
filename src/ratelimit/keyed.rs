//! Keyed rate limiter: one shared policy, independent windows per key.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::config::{LimiterConfig, DEFAULT_MAX_WAIT_FACTOR};
use crate::error::{PacelineError, Result};

use super::window::TriggerWindow;

/// A blocking rate limiter that maintains an independent trigger window
/// per string key.
///
/// All keys share one `(max_triggers, max_period, max_wait)` policy;
/// triggers against one key never count against another. Windows are
/// created lazily on first use and removed by [`purge_expired`].
///
/// [`purge_expired`]: KeyedRateLimiter::purge_expired
pub struct KeyedRateLimiter {
    /// Per-key trigger windows
    windows: DashMap<String, Arc<Mutex<TriggerWindow>>>,
    /// Maximum number of triggers allowed within one window
    max_triggers: u32,
    /// Window length
    max_period: Duration,
    /// Per-call cooldown wait budget
    max_wait: Duration,
    /// Label attached to tracing events
    name: Option<String>,
}

impl KeyedRateLimiter {
    /// Create a keyed rate limiter admitting `max_triggers` triggers per
    /// `max_period` for each key.
    pub fn new(max_triggers: u32, max_period: Duration) -> Result<Self> {
        if max_triggers == 0 {
            return Err(PacelineError::InvalidMaxTriggers);
        }
        if max_period.is_zero() {
            return Err(PacelineError::InvalidMaxPeriod);
        }

        Ok(Self {
            windows: DashMap::new(),
            max_triggers,
            max_period,
            max_wait: max_period.saturating_mul(DEFAULT_MAX_WAIT_FACTOR),
            name: None,
        })
    }

    /// Create a keyed rate limiter from a validated configuration.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        config.validate()?;

        let mut limiter = Self::new(config.max_triggers, config.max_period())?;
        limiter.max_wait = config.max_wait();
        limiter.name = config.name.clone();
        Ok(limiter)
    }

    /// Gate one unit of work against `key`, blocking until it can be
    /// admitted.
    ///
    /// Same protocol as [`RateLimiter::trigger`](super::RateLimiter::trigger),
    /// applied to the key's own window.
    pub fn trigger(&self, key: &str) -> Result<()> {
        let window = self.window_for(key);
        let mut waited = Duration::ZERO;

        loop {
            let cooldown = {
                let mut window = window.lock();
                let now = Instant::now();

                let expired = window.expire(now);
                if expired > 0 {
                    trace!(
                        limiter = self.name.as_deref().unwrap_or_default(),
                        key = key,
                        expired = expired,
                        live = window.len(),
                        "Expired stale triggers"
                    );
                }

                if !window.is_saturated() {
                    window.record(now);
                    trace!(
                        limiter = self.name.as_deref().unwrap_or_default(),
                        key = key,
                        live = window.len(),
                        "Trigger admitted"
                    );
                    return Ok(());
                }

                debug!(
                    limiter = self.name.as_deref().unwrap_or_default(),
                    key = key,
                    live = window.len(),
                    max_triggers = self.max_triggers,
                    "Trigger budget exhausted"
                );
                window.cooldown(now)
            };

            if waited + cooldown > self.max_wait {
                debug!(
                    limiter = self.name.as_deref().unwrap_or_default(),
                    key = key,
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
                key = key,
                wait_secs = cooldown.as_secs(),
                "Rate limit reached, waiting"
            );

            thread::sleep(cooldown);
            waited += cooldown;
        }
    }

    /// Get or create the window for a key.
    ///
    /// The map shard guard is dropped before the returned window is locked,
    /// so a long cooldown on one key never stalls lookups of other keys.
    fn window_for(&self, key: &str) -> Arc<Mutex<TriggerWindow>> {
        if let Some(window) = self.windows.get(key) {
            return Arc::clone(&window);
        }

        self.windows
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(
                    limiter = self.name.as_deref().unwrap_or_default(),
                    key = key,
                    max_triggers = self.max_triggers,
                    "Creating trigger window"
                );
                Arc::new(Mutex::new(TriggerWindow::new(
                    self.max_triggers,
                    self.max_period,
                )))
            })
            .clone()
    }

    /// Number of live triggers recorded for a key, as of its last check.
    ///
    /// Returns zero for keys that have never triggered.
    pub fn len(&self, key: &str) -> usize {
        self.windows
            .get(key)
            .map(|window| window.lock().len())
            .unwrap_or(0)
    }

    /// Number of keys with a trigger window.
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    /// Drop all per-key windows.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.windows.clear();
    }

    /// Remove windows whose triggers have all expired.
    ///
    /// Windows still referenced by an in-flight `trigger()` call are kept
    /// even when empty. Unbounded key cardinality otherwise grows the map,
    /// so callers with churning key sets should run this periodically.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let before = self.windows.len();

        self.windows.retain(|_, window| {
            let mut guard = window.lock();
            guard.expire(now);
            !guard.is_empty() || Arc::strong_count(window) > 1
        });

        let purged = before - self.windows.len();
        if purged > 0 {
            debug!(
                limiter = self.name.as_deref().unwrap_or_default(),
                purged = purged,
                remaining = self.windows.len(),
                "Purged expired trigger windows"
            );
        }
    }

    /// The configured per-key trigger capacity.
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

    fn limiter(max_triggers: u32, max_period_secs: u64) -> KeyedRateLimiter {
        KeyedRateLimiter::new(max_triggers, Duration::from_secs(max_period_secs)).unwrap()
    }

    #[test]
    fn test_unknown_key_has_no_triggers() {
        let limiter = limiter(4, 60);
        assert_eq!(limiter.len("missing"), 0);
        assert_eq!(limiter.key_count(), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        // Saturating one key must not block another.
        let limiter = limiter(2, 60);
        let start = Instant::now();

        limiter.trigger("a").unwrap();
        limiter.trigger("a").unwrap();
        limiter.trigger("b").unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(limiter.len("a"), 2);
        assert_eq!(limiter.len("b"), 1);
        assert_eq!(limiter.key_count(), 2);
    }

    #[test]
    fn test_saturated_key_waits_for_oldest() {
        let limiter = limiter(1, 2);
        let start = Instant::now();

        limiter.trigger("k").unwrap();
        limiter.trigger("k").unwrap();

        assert_eq!(limiter.len("k"), 1);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_zero_budget_fails_fast_per_key() {
        let mut config = LimiterConfig::new(1, 60);
        config.max_wait_secs = Some(0);
        let limiter = KeyedRateLimiter::from_config(&config).unwrap();

        limiter.trigger("k").unwrap();
        assert!(matches!(
            limiter.trigger("k"),
            Err(PacelineError::Timeout { .. })
        ));

        // The failure is scoped to the saturated key.
        limiter.trigger("other").unwrap();
        assert_eq!(limiter.len("k"), 1);
    }

    #[test]
    fn test_clear_drops_all_windows() {
        let limiter = limiter(4, 60);

        limiter.trigger("a").unwrap();
        limiter.trigger("b").unwrap();
        assert_eq!(limiter.key_count(), 2);

        limiter.clear();
        assert_eq!(limiter.key_count(), 0);
    }

    #[test]
    fn test_purge_removes_only_expired_keys() {
        let limiter = limiter(4, 1);

        limiter.trigger("stale").unwrap();
        thread::sleep(Duration::from_secs(2));
        limiter.trigger("fresh").unwrap();

        limiter.purge_expired();

        assert_eq!(limiter.key_count(), 1);
        assert_eq!(limiter.len("fresh"), 1);
        assert_eq!(limiter.len("stale"), 0);
    }

    #[test]
    fn test_concurrent_distinct_keys_do_not_serialize() {
        let limiter = Arc::new(limiter(1, 60));
        let start = Instant::now();
        let mut handles = Vec::new();

        for i in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(thread::spawn(move || {
                limiter.trigger(&format!("key_{}", i))
            }));
        }

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(limiter.key_count(), 8);
    }
}
