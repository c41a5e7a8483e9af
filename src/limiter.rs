//! # Rate Limiter Module
//!
//! Per-priority-class concurrency gating for the pulling engine.
//!
//! ## Overview
//!
//! Each [`FeedPriority`] class owns an independent semaphore pool, so
//! saturating one class never delays another. Within a class, waiters are
//! served in FIFO order. Acquired capacity travels as an opaque
//! [`PriorityToken`]; releasing a token twice is a no-op and releasing a token
//! against a limiter that did not issue it is a contract violation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{FetchError, ProgrammingError};
use crate::request::FeedPriority;

static NEXT_LIMITER_ID: AtomicU64 = AtomicU64::new(1);

/// Concurrency caps per priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    caps: [usize; FeedPriority::COUNT],
}

impl RateLimitConfig {
    /// The same cap for every class.
    pub fn uniform(cap: usize) -> Self {
        Self {
            caps: [cap; FeedPriority::COUNT],
        }
    }

    pub fn with_cap(mut self, priority: FeedPriority, cap: usize) -> Self {
        self.caps[priority.index()] = cap;
        self
    }

    pub fn cap(&self, priority: FeedPriority) -> usize {
        self.caps[priority.index()]
    }

    pub(crate) fn validate(&self) -> Result<(), ProgrammingError> {
        for priority in FeedPriority::ALL {
            if self.cap(priority) == 0 {
                return Err(ProgrammingError::new(format!(
                    "rate limit cap for priority {priority} must be greater than 0"
                )));
            }
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::uniform(num_cpus::get().max(8))
    }
}

/// Opaque capacity token for one priority class.
///
/// Dropping the token releases its slot; [`PriorityRateLimiter::release`] does
/// the same explicitly and is safe to call more than once.
#[derive(Debug)]
pub struct PriorityToken {
    limiter_id: u64,
    priority: FeedPriority,
    permit: Option<OwnedSemaphorePermit>,
}

impl PriorityToken {
    pub fn priority(&self) -> FeedPriority {
        self.priority
    }
}

/// Independent FIFO concurrency pools, one per priority class.
pub struct PriorityRateLimiter {
    id: u64,
    pools: [Arc<Semaphore>; FeedPriority::COUNT],
}

impl PriorityRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let pools = [
            Arc::new(Semaphore::new(config.cap(FeedPriority::Highest))),
            Arc::new(Semaphore::new(config.cap(FeedPriority::High))),
            Arc::new(Semaphore::new(config.cap(FeedPriority::Medium))),
            Arc::new(Semaphore::new(config.cap(FeedPriority::Low))),
            Arc::new(Semaphore::new(config.cap(FeedPriority::Lowest))),
        ];
        Self {
            id: NEXT_LIMITER_ID.fetch_add(1, Ordering::Relaxed),
            pools,
        }
    }

    /// Waits until a slot is free in the class pool and returns its token.
    ///
    /// Fails with [`FetchError::Shutdown`] once [`close`](Self::close) has
    /// been called, which wakes all waiters.
    pub async fn acquire(&self, priority: FeedPriority) -> Result<PriorityToken, FetchError> {
        let permit = self.pools[priority.index()]
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Shutdown)?;
        Ok(PriorityToken {
            limiter_id: self.id,
            priority,
            permit: Some(permit),
        })
    }

    /// Returns the token's capacity. Idempotent; a second release of the same
    /// token is a no-op. Releasing a token issued by a different limiter is a
    /// [`ProgrammingError`].
    pub fn release(&self, token: &mut PriorityToken) -> Result<(), ProgrammingError> {
        if token.limiter_id != self.id {
            return Err(ProgrammingError::new(
                "released a token issued by a different rate limiter",
            ));
        }
        token.permit.take();
        Ok(())
    }

    /// Currently free slots in the class pool. Advisory only.
    pub fn available(&self, priority: FeedPriority) -> usize {
        self.pools[priority.index()].available_permits()
    }

    /// Closes every pool; pending and future acquisitions fail with
    /// [`FetchError::Shutdown`].
    pub fn close(&self) {
        for pool in &self.pools {
            pool.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn caps_are_enforced_per_class() {
        let limiter = PriorityRateLimiter::new(&RateLimitConfig::uniform(2));
        let _a = limiter.acquire(FeedPriority::Low).await.unwrap();
        let _b = limiter.acquire(FeedPriority::Low).await.unwrap();
        assert_eq!(limiter.available(FeedPriority::Low), 0);

        let third = tokio::time::timeout(
            Duration::from_millis(50),
            limiter.acquire(FeedPriority::Low),
        )
        .await;
        assert!(third.is_err(), "third acquisition should block");
    }

    #[tokio::test]
    async fn high_priority_is_isolated_from_saturated_low() {
        let limiter = PriorityRateLimiter::new(&RateLimitConfig::uniform(2));
        let _l1 = limiter.acquire(FeedPriority::Low).await.unwrap();
        let _l2 = limiter.acquire(FeedPriority::Low).await.unwrap();

        let token = tokio::time::timeout(
            Duration::from_millis(50),
            limiter.acquire(FeedPriority::High),
        )
        .await
        .expect("high priority must not wait behind low")
        .unwrap();
        assert_eq!(token.priority(), FeedPriority::High);
    }

    #[tokio::test]
    async fn waiters_are_served_in_fifo_order() {
        let limiter = Arc::new(PriorityRateLimiter::new(&RateLimitConfig::uniform(1)));
        let first = limiter.acquire(FeedPriority::Medium).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for i in 0..3 {
            let limiter = limiter.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let token = limiter.acquire(FeedPriority::Medium).await.unwrap();
                tx.send(i).unwrap();
                drop(token);
            });
            // Let each waiter join the queue before the next one.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(first);
        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(rx.recv().await.unwrap());
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let limiter = PriorityRateLimiter::new(&RateLimitConfig::uniform(1));
        let mut token = limiter.acquire(FeedPriority::High).await.unwrap();
        limiter.release(&mut token).unwrap();
        limiter.release(&mut token).unwrap();
        assert_eq!(limiter.available(FeedPriority::High), 1);
    }

    #[tokio::test]
    async fn foreign_token_release_fails() {
        let limiter_a = PriorityRateLimiter::new(&RateLimitConfig::uniform(1));
        let limiter_b = PriorityRateLimiter::new(&RateLimitConfig::uniform(1));
        let mut token = limiter_a.acquire(FeedPriority::High).await.unwrap();
        assert!(limiter_b.release(&mut token).is_err());
        // The slot still belongs to limiter_a and is freed by its owner.
        limiter_a.release(&mut token).unwrap();
        assert_eq!(limiter_a.available(FeedPriority::High), 1);
    }

    #[tokio::test]
    async fn dropping_a_token_releases_capacity() {
        let limiter = PriorityRateLimiter::new(&RateLimitConfig::uniform(1));
        {
            let _token = limiter.acquire(FeedPriority::Lowest).await.unwrap();
            assert_eq!(limiter.available(FeedPriority::Lowest), 0);
        }
        assert_eq!(limiter.available(FeedPriority::Lowest), 1);
    }

    #[tokio::test]
    async fn close_wakes_waiters_with_shutdown() {
        let limiter = Arc::new(PriorityRateLimiter::new(&RateLimitConfig::uniform(1)));
        let _held = limiter.acquire(FeedPriority::Low).await.unwrap();
        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire(FeedPriority::Low).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        limiter.close();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(FetchError::Shutdown)));
    }
}
