// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Reconnect Backoff
//!
//! Explicit policy for the delays between reconnect attempts. The policy is an ordinary
//! value handed to the connection manager, so callers can shorten it in tests or bound
//! the number of attempts in environments where giving up is preferable to waiting forever.

use crate::errors::AmqpError;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::time::Duration;

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor applied after every retry.
    pub multiplier: f32,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Number of retries before giving up, `None` retries forever.
    pub max_attempts: Option<usize>,
    /// Randomize delays to spread reconnect storms.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: None,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Policy that retries forever with the default delays.
    pub fn unbounded() -> Self {
        BackoffPolicy::default()
    }

    /// Same delays, but gives up after `attempts` retries.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f32) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Rejects a multiplier that would keep the delays from growing.
    pub fn validate(&self) -> Result<(), AmqpError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(AmqpError::InvalidOptions(format!(
                "backoff multiplier must be a finite number of at least 1, got {}",
                self.multiplier
            )));
        }

        Ok(())
    }

    fn builder(&self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.multiplier);

        builder = match self.max_attempts {
            Some(attempts) => builder.with_max_times(attempts),
            None => builder.with_max_times(usize::MAX),
        };

        if self.jitter {
            builder = builder.with_jitter();
        }

        builder
    }

    /// Fresh sequence of delays, one per retry. Ends when `max_attempts` is reached.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + Send + 'static {
        self.builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Delays are scaled with f32 arithmetic, so compare with a small tolerance.
    fn assert_close(actual: Duration, expected: Duration) {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(
            diff < Duration::from_millis(1),
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn default_grows_exponentially_up_to_the_cap() {
        let delays: Vec<Duration> = BackoffPolicy::default().delays().take(8).collect();

        assert_close(delays[0], Duration::from_millis(100));
        assert_close(delays[1], Duration::from_millis(200));
        assert_close(delays[2], Duration::from_millis(400));
        assert_close(delays[5], Duration::from_millis(3200));
        assert_close(delays[6], Duration::from_secs(5));
        assert_close(delays[7], Duration::from_secs(5));
    }

    #[test]
    fn unbounded_policy_never_ends() {
        assert_eq!(BackoffPolicy::unbounded().delays().take(1000).count(), 1000);
    }

    #[test]
    fn bounded_policy_stops_after_max_attempts() {
        let policy = BackoffPolicy::default().with_max_attempts(3);
        assert_eq!(policy.delays().count(), 3);
    }

    #[test]
    fn custom_delays_are_honoured() {
        let policy = BackoffPolicy::default()
            .with_initial_delay(Duration::from_millis(10))
            .with_multiplier(3.0)
            .with_max_delay(Duration::from_millis(50));

        let delays: Vec<Duration> = policy.delays().take(3).collect();
        assert_close(delays[0], Duration::from_millis(10));
        assert_close(delays[1], Duration::from_millis(30));
        assert_close(delays[2], Duration::from_millis(50));
    }

    #[test]
    fn jitter_never_shortens_the_first_delay() {
        let policy = BackoffPolicy::default().with_max_attempts(1).with_jitter();
        let delays: Vec<Duration> = policy.delays().collect();

        assert_eq!(delays.len(), 1);
        assert!(delays[0] >= Duration::from_millis(100));
    }

    #[test]
    fn growing_multipliers_are_valid() {
        assert!(BackoffPolicy::default().validate().is_ok());
        assert!(BackoffPolicy::default().with_multiplier(1.0).validate().is_ok());
    }

    #[test]
    fn shrinking_or_non_finite_multipliers_are_rejected() {
        for multiplier in [-1.0, 0.0, 0.5, f32::NAN, f32::INFINITY] {
            let err = BackoffPolicy::default()
                .with_multiplier(multiplier)
                .validate()
                .unwrap_err();
            assert!(matches!(err, AmqpError::InvalidOptions(_)), "{}", multiplier);
            assert!(err.is_fatal());
        }
    }
}
