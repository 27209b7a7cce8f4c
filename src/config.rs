use std::time::Duration;

use crate::guard::DEFAULT_COLLAPSE_THRESHOLD;
use crate::queue::DEFAULT_TIMEOUT_TICKS;
use crate::request::DEFAULT_RETRIES;

/// Tuning knobs of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    /// Delay between two ticks while any queue has work.
    pub tick_interval: Duration,
    /// Ticks to wait for a confirmation before the in-flight request counts as failed.
    pub timeout_ticks: u32,
    /// Retry budget of requests built by the convenience methods of `SchedulerHandle`.
    pub default_retries: u32,
    /// Consecutive stack collapses on one device before its queue is cleared.
    pub collapse_threshold: u32,
    /// Capacity of the event broadcast channel; the oldest events are dropped on overflow.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            timeout_ticks: DEFAULT_TIMEOUT_TICKS,
            default_retries: DEFAULT_RETRIES,
            collapse_threshold: DEFAULT_COLLAPSE_THRESHOLD,
            event_capacity: 32,
        }
    }
}

impl SchedulerConfig {
    /// Sets the confirmation timeout as a wall-clock duration, rounded up to whole ticks.
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        let interval = self.tick_interval.as_micros().max(1);
        let ticks = timeout.as_micros().div_ceil(interval);
        self.timeout_ticks = u32::try_from(ticks).unwrap_or(u32::MAX).max(1);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_default_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries;
        self
    }

    pub fn with_collapse_threshold(mut self, threshold: u32) -> Self {
        self.collapse_threshold = threshold;
        self
    }

    /// The effective wall-clock confirmation timeout.
    pub fn confirmation_timeout(&self) -> Duration {
        self.tick_interval * self.timeout_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_five_seconds() {
        let config = SchedulerConfig::default();
        assert_eq!(config.confirmation_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn wall_clock_timeout_rounds_up_to_ticks() {
        let config = SchedulerConfig::default()
            .with_tick_interval(Duration::from_millis(50))
            .with_confirmation_timeout(Duration::from_millis(120));
        assert_eq!(config.timeout_ticks, 3);

        let config = config.with_confirmation_timeout(Duration::ZERO);
        assert_eq!(config.timeout_ticks, 1);
    }
}
