//! Bounded escalating backoff for remote reconciliation.

use std::time::Duration;
use studio_config::BackoffSettings;

/// Retry timing shared by every reconciliation.
///
/// Waits start at `floor` and grow by `factor`; once the next wait would be
/// longer than `ceiling` the resource is given up on. Throttling uses a fixed
/// pause that does not advance the escalation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub floor: Duration,
    pub factor: f64,
    pub ceiling: Duration,
    pub throttle_pause: Duration,
    pub max_throttle_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::with_unit(Duration::from_secs(1))
    }
}

impl BackoffPolicy {
    /// Default timings (floor 2, ceiling 11, throttle pause 5) in multiples of `unit`.
    pub fn with_unit(unit: Duration) -> Self {
        Self {
            floor: unit * 2,
            factor: 1.5,
            ceiling: unit * 11,
            throttle_pause: unit * 5,
            max_throttle_retries: 20,
        }
    }

    /// Every wait a resource can accumulate before it is given up on.
    pub fn schedule(&self) -> Vec<Duration> {
        let mut state = BackoffState::new(self);
        std::iter::from_fn(|| state.escalate(self)).collect()
    }
}

/// Out-of-range seconds saturate instead of panicking.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

impl From<&BackoffSettings> for BackoffPolicy {
    fn from(settings: &BackoffSettings) -> Self {
        Self {
            floor: saturating_secs(settings.floor_secs),
            factor: settings.factor,
            ceiling: saturating_secs(settings.ceiling_secs),
            throttle_pause: saturating_secs(settings.throttle_pause_secs),
            max_throttle_retries: settings.max_throttle_retries,
        }
    }
}

/// Per-resource retry bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffState {
    attempt: u32,
    delay: Option<Duration>,
    throttled: u32,
}

impl BackoffState {
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            attempt: 0,
            delay: Some(policy.floor),
            throttled: 0,
        }
    }

    /// Number of escalating waits taken so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Wait that the next escalation would use; `None` once it no longer fits in a `Duration`.
    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    /// Take the next escalating wait, or `None` once it exceeds the ceiling.
    pub fn escalate(&mut self, policy: &BackoffPolicy) -> Option<Duration> {
        let wait = self.delay.filter(|delay| *delay <= policy.ceiling)?;
        self.delay = Duration::try_from_secs_f64(wait.as_secs_f64() * policy.factor).ok();
        self.attempt += 1;
        Some(wait)
    }

    /// Take a throttling pause, or `None` once the throttle budget is spent.
    pub fn throttle(&mut self, policy: &BackoffPolicy) -> Option<Duration> {
        if self.throttled >= policy.max_throttle_retries {
            return None;
        }
        self.throttled += 1;
        Some(policy.throttle_pause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_default_schedule() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.schedule(),
            vec![ms(2000), ms(3000), ms(4500), ms(6750), ms(10125)]
        );
    }

    #[test]
    fn test_gives_up_after_ceiling() {
        let policy = BackoffPolicy::default();
        let mut state = BackoffState::new(&policy);
        for _ in 0..5 {
            assert!(state.escalate(&policy).is_some());
        }
        assert_eq!(state.attempt(), 5);
        assert_eq!(state.delay(), Some(ms(15187) + Duration::from_micros(500)));
        assert_eq!(state.escalate(&policy), None);
        assert_eq!(state.attempt(), 5);
    }

    #[test]
    fn test_higher_ceiling_allows_equal_wait() {
        let policy = BackoffPolicy {
            ceiling: ms(4500),
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.schedule(), vec![ms(2000), ms(3000), ms(4500)]);
    }

    #[test]
    fn test_throttle_does_not_escalate() {
        let policy = BackoffPolicy {
            max_throttle_retries: 2,
            ..BackoffPolicy::default()
        };
        let mut state = BackoffState::new(&policy);
        assert_eq!(state.throttle(&policy), Some(ms(5000)));
        assert_eq!(state.throttle(&policy), Some(ms(5000)));
        assert_eq!(state.throttle(&policy), None);
        assert_eq!(state.delay(), Some(ms(2000)));
        assert_eq!(state.attempt(), 0);
    }

    #[test]
    fn test_unit_scaling() {
        let policy = BackoffPolicy::with_unit(ms(1));
        assert_eq!(policy.floor, ms(2));
        assert_eq!(policy.ceiling, ms(11));
        assert_eq!(policy.throttle_pause, ms(5));
        assert_eq!(policy.schedule().len(), 5);
    }

    #[test]
    fn test_from_settings() {
        let policy = BackoffPolicy::from(&BackoffSettings::default());
        assert_eq!(policy, BackoffPolicy::default());
    }

    #[test]
    fn test_huge_settings_saturate() {
        let policy = BackoffPolicy::from(&BackoffSettings {
            ceiling_secs: 1e30,
            ..BackoffSettings::default()
        });
        assert_eq!(policy.ceiling, Duration::MAX);
        assert_eq!(policy.floor, ms(2000));
    }

    #[test]
    fn test_overflowing_factor_ends_escalation() {
        let policy = BackoffPolicy {
            factor: 1e300,
            ceiling: Duration::MAX,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.schedule(), vec![ms(2000)]);

        let mut state = BackoffState::new(&policy);
        assert_eq!(state.escalate(&policy), Some(ms(2000)));
        assert_eq!(state.delay(), None);
        assert_eq!(state.escalate(&policy), None);
        assert_eq!(state.attempt(), 1);
    }
}
