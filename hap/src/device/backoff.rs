//! Capped exponential backoff shared by the bootstrap listing and the
//! subscription receive loop.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(with = "duration_secs")]
    pub initial: Duration,
    pub multiplier: f64,
    #[serde(with = "duration_secs")]
    pub max: Duration,
    /// Add up to 25% random delay on top of each step.
    #[serde(default)]
    pub jitter: bool,
}

impl BackoffPolicy {
    /// Listing retries during startup: 1s, doubling, at most 2 minutes apart.
    pub fn bootstrap() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(120),
            jitter: false,
        }
    }

    /// Reissuing a failed subscription receive: 1s, doubling, at most 1 minute.
    pub fn ingestion() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(60),
            jitter: false,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max.as_secs_f64());
        let delay = if self.jitter {
            capped * (1.0 + rand::rng().random::<f64>() * 0.25)
        } else {
            capped
        };
        // saturates at `max` when the float no longer fits a Duration
        Duration::try_from_secs_f64(delay).unwrap_or(self.max)
    }
}

/// Tracks consecutive failures against a [`BackoffPolicy`]. There is no retry
/// ceiling here, callers decide when to give up.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_delays_double_until_capped() {
        let mut backoff = Backoff::new(BackoffPolicy::bootstrap());
        let delays: Vec<u64> = (0..10).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 64, 120, 120, 120]);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(BackoffPolicy::ingestion());
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn ingestion_cap_is_one_minute() {
        let mut backoff = Backoff::new(BackoffPolicy::ingestion());
        let last = (0..20).map(|_| backoff.next_delay()).last().unwrap();
        assert_eq!(last, Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = BackoffPolicy {
            jitter: true,
            ..BackoffPolicy::bootstrap()
        };
        for attempt in 0..8 {
            let plain = BackoffPolicy::bootstrap().delay_for_attempt(attempt);
            let jittered = policy.delay_for_attempt(attempt);
            assert!(jittered >= plain);
            assert!(jittered.as_secs_f64() <= plain.as_secs_f64() * 1.25 + 1e-9);
        }
    }

    #[test]
    fn policy_reads_whole_seconds() {
        let policy: BackoffPolicy =
            serde_json::from_str(r#"{"initial": 2, "multiplier": 3.0, "max": 30}"#).unwrap();
        assert_eq!(policy.initial, Duration::from_secs(2));
        assert_eq!(policy.max, Duration::from_secs(30));
        assert!(!policy.jitter);
        assert_eq!(
            serde_json::to_value(policy).unwrap(),
            serde_json::json!({"initial": 2, "multiplier": 3.0, "max": 30, "jitter": false})
        );
    }

    #[test]
    fn huge_max_saturates_instead_of_overflowing() {
        for jitter in [false, true] {
            let policy: BackoffPolicy = serde_json::from_value(serde_json::json!({
                "initial": 1,
                "multiplier": 2.0,
                "max": u64::MAX,
                "jitter": jitter
            }))
            .unwrap();
            let mut backoff = Backoff::new(policy);
            let delays: Vec<Duration> = (0..80).map(|_| backoff.next_delay()).collect();
            if !jitter {
                assert!(delays.windows(2).all(|w| w[0] <= w[1]));
            }
            assert_eq!(*delays.last().unwrap(), policy.max);
        }
    }

    #[test]
    fn attempt_counter_does_not_wrap_into_shrinking_delays() {
        let policy = BackoffPolicy::ingestion();
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }
}
