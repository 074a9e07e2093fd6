//! Trigger timestamp store and window math.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One admitted trigger's worth of state: the instants of currently live
/// triggers, oldest at the front (insertion order equals time order).
///
/// All methods take `now` as a parameter, so every decision is a pure
/// function of `(now, stored timestamps, capacity, period)`.
pub(crate) struct TriggerWindow {
    /// Timestamps of live triggers, oldest first
    timestamps: VecDeque<Instant>,
    /// Maximum number of live triggers
    max_triggers: usize,
    /// Window length
    max_period: Duration,
}

impl TriggerWindow {
    /// Create an empty window with the given capacity and period.
    pub(crate) fn new(max_triggers: u32, max_period: Duration) -> Self {
        // Preallocation is capped: a huge configured capacity should not
        // reserve memory the window may never use.
        let prealloc = (max_triggers as usize).min(1024);
        Self {
            timestamps: VecDeque::with_capacity(prealloc),
            max_triggers: max_triggers as usize,
            max_period,
        }
    }

    /// Drop every timestamp strictly older than `now - max_period`.
    ///
    /// A timestamp sitting exactly on the threshold is still live. Returns
    /// the number of entries removed.
    pub(crate) fn expire(&mut self, now: Instant) -> usize {
        // Instants earlier than the process clock origin cannot be stored,
        // so an unrepresentable threshold expires nothing.
        let Some(threshold) = now.checked_sub(self.max_period) else {
            return 0;
        };

        let before = self.timestamps.len();
        while self.timestamps.front().is_some_and(|ts| *ts < threshold) {
            self.timestamps.pop_front();
        }
        before - self.timestamps.len()
    }

    /// Whether the window holds its full trigger budget.
    pub(crate) fn is_saturated(&self) -> bool {
        self.timestamps.len() >= self.max_triggers
    }

    /// Time to sleep until the oldest live trigger expires, rounded up to
    /// whole seconds so the wait never under-shoots expiry.
    ///
    /// While saturated the cooldown floors at one second: an oldest entry
    /// sitting exactly on the expiry threshold computes a zero remainder,
    /// and the floor keeps the wait loop advancing the clock.
    pub(crate) fn cooldown(&self, now: Instant) -> Duration {
        let Some(oldest) = self.timestamps.front() else {
            return Duration::ZERO;
        };

        let remaining = (*oldest + self.max_period).saturating_duration_since(now);
        let mut secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs += 1;
        }

        Duration::from_secs(secs.max(1))
    }

    /// Record an admitted trigger at `now`.
    pub(crate) fn record(&mut self, now: Instant) {
        self.timestamps.push_back(now);
    }

    /// Number of live triggers as of the last expiry pass.
    pub(crate) fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
