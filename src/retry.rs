//! # Retry Module
//!
//! Pure retry decisions for failed pulls. The engine consults the policy and
//! hands the outcome to the registry, which parks the entry in cooldown until
//! the decided delay has elapsed.

use std::time::Duration;

use rand::Rng;

use crate::error::FetchError;
use crate::request::FeedRequest;

/// Outcome of a retry consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Stop retrying; a one-shot request is dropped, a periodic one waits for
    /// its next tick.
    GiveUp,
    /// Re-dispatch after the given cooldown.
    RetryAfter(Duration),
}

/// Pure function from `(attempt, error, request)` to a [`RetryDecision`].
///
/// `attempt` is the number of the attempt that just failed, starting at 1.
pub trait RetryPolicy: Send + Sync {
    fn decide(&self, attempt: u32, error: &FetchError, request: &FeedRequest) -> RetryDecision;
}

/// Exponential backoff with jitter and a hard attempt cap.
///
/// Retries transport errors, timeouts and 5xx statuses; gives up immediately
/// on 4xx.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    factor: f64,
    max_delay: Duration,
    max_attempts: u32,
    jitter_ratio: f64,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts,
            jitter_ratio: 0.1,
        }
    }

    /// Multiplier applied per failed attempt. Defaults to 2.
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Relative jitter in `[0, 1)` applied symmetrically around the computed
    /// delay. Zero disables jitter.
    pub fn with_jitter(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio;
        self
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(24);
        let raw = self.base_delay.as_secs_f64() * self.factor.powi(exponent as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter_ratio > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.jitter_ratio..self.jitter_ratio);
            capped * (1.0 + spread)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), 4)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn decide(&self, attempt: u32, error: &FetchError, _request: &FeedRequest) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay_for(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::FeedRequest;

    fn request() -> FeedRequest {
        FeedRequest::builder("https://feeds.example.com/live")
            .build()
            .unwrap()
    }

    #[test]
    fn client_errors_give_up_immediately() {
        let policy = ExponentialBackoff::default();
        let decision = policy.decide(1, &FetchError::ClientStatus(404), &request());
        assert_eq!(decision, RetryDecision::GiveUp);
    }

    #[test]
    fn server_errors_retry_until_cap() {
        let policy = ExponentialBackoff::new(Duration::from_millis(50), 3).with_jitter(0.0);
        let err = FetchError::ServerStatus(503);
        assert!(matches!(
            policy.decide(1, &err, &request()),
            RetryDecision::RetryAfter(_)
        ));
        assert!(matches!(
            policy.decide(2, &err, &request()),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(policy.decide(3, &err, &request()), RetryDecision::GiveUp);
    }

    #[test]
    fn backoff_ladder_grows_by_factor() {
        let policy = ExponentialBackoff::new(Duration::from_millis(50), 5)
            .with_factor(3.0)
            .with_jitter(0.0);
        let err = FetchError::Timeout;
        assert_eq!(
            policy.decide(1, &err, &request()),
            RetryDecision::RetryAfter(Duration::from_millis(50))
        );
        assert_eq!(
            policy.decide(2, &err, &request()),
            RetryDecision::RetryAfter(Duration::from_millis(150))
        );
        assert_eq!(
            policy.decide(3, &err, &request()),
            RetryDecision::RetryAfter(Duration::from_millis(450))
        );
    }

    #[test]
    fn delay_is_capped() {
        let policy = ExponentialBackoff::new(Duration::from_secs(10), 20)
            .with_max_delay(Duration::from_secs(15))
            .with_jitter(0.0);
        match policy.decide(10, &FetchError::Timeout, &request()) {
            RetryDecision::RetryAfter(d) => assert_eq!(d, Duration::from_secs(15)),
            other => panic!("expected RetryAfter, got {other:?}"),
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = ExponentialBackoff::new(Duration::from_millis(100), 10).with_jitter(0.5);
        for _ in 0..100 {
            match policy.decide(1, &FetchError::Timeout, &request()) {
                RetryDecision::RetryAfter(d) => {
                    assert!(d >= Duration::from_millis(50), "delay {d:?} below bound");
                    assert!(d <= Duration::from_millis(150), "delay {d:?} above bound");
                }
                other => panic!("expected RetryAfter, got {other:?}"),
            }
        }
    }
}
