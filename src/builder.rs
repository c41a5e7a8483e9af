//! # Builder Module
//!
//! Provides the `PullingEngineBuilder`, a fluent API for constructing and
//! configuring [`PullingEngine`] instances.
//!
//! ## Overview
//!
//! The builder assembles the engine's collaborators — transport client,
//! retry policy, per-priority rate limits — and validates the configuration
//! before spawning the engine loop.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use feedpull::{ExponentialBackoff, FeedPriority, PullingEngine, RateLimitConfig};
//!
//! let engine = PullingEngine::builder()
//!     .rate_limits(RateLimitConfig::uniform(8).with_cap(FeedPriority::Highest, 16))
//!     .retry_policy(ExponentialBackoff::new(Duration::from_millis(250), 4))
//!     .build()?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::engine::PullingEngine;
use crate::error::ProgrammingError;
use crate::http::{HttpClient, HttpClientConfig, ReqwestHttpClient};
use crate::limiter::RateLimitConfig;
use crate::request::FeedPriority;
use crate::retry::{ExponentialBackoff, RetryPolicy};

/// Configuration for the pulling engine.
pub struct EngineConfig {
    /// Concurrency caps per priority class.
    pub rate_limits: RateLimitConfig,
    /// Granularity of the due-scan driving retries and periodic pulls.
    pub tick_interval: Duration,
    /// Capacity of the multicast response stream; a consumer lagging beyond
    /// this observes `Lagged` instead of slowing the engine down.
    pub response_buffer: usize,
    /// Settings for the bundled transport when no client is supplied.
    pub http: HttpClientConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            rate_limits: RateLimitConfig::default(),
            tick_interval: Duration::from_millis(20),
            response_buffer: 1024,
            http: HttpClientConfig::default(),
        }
    }
}

pub struct PullingEngineBuilder {
    config: EngineConfig,
    client: Option<Arc<dyn HttpClient>>,
    retry_policy: Arc<dyn RetryPolicy>,
}

impl Default for PullingEngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            client: None,
            retry_policy: Arc::new(ExponentialBackoff::default()),
        }
    }
}

impl PullingEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a custom transport client.
    pub fn http_client(mut self, client: impl HttpClient + 'static) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Sets an already-shared transport client.
    pub fn shared_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the engine-wide retry policy. Individual requests may still
    /// carry their own override.
    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Arc::new(policy);
        self
    }

    pub fn rate_limits(mut self, rate_limits: RateLimitConfig) -> Self {
        self.config.rate_limits = rate_limits;
        self
    }

    /// Adjusts the cap of a single priority class.
    pub fn rate_limit(mut self, priority: FeedPriority, cap: usize) -> Self {
        self.config.rate_limits = self.config.rate_limits.with_cap(priority, cap);
        self
    }

    pub fn tick_interval(mut self, tick_interval: Duration) -> Self {
        self.config.tick_interval = tick_interval;
        self
    }

    pub fn response_buffer(mut self, capacity: usize) -> Self {
        self.config.response_buffer = capacity;
        self
    }

    /// Settings for the bundled `reqwest` transport. Ignored when a custom
    /// client was supplied.
    pub fn http_config(mut self, http: HttpClientConfig) -> Self {
        self.config.http = http;
        self
    }

    /// Validates the configuration and spawns the engine loop. Must be
    /// called within a tokio runtime.
    pub fn build(self) -> Result<PullingEngine, ProgrammingError> {
        self.config.rate_limits.validate()?;
        if self.config.response_buffer == 0 {
            return Err(ProgrammingError::new(
                "response_buffer must be greater than 0",
            ));
        }
        if self.config.tick_interval < Duration::from_millis(1) {
            return Err(ProgrammingError::new(
                "tick_interval must be at least 1 ms",
            ));
        }

        let client = match self.client {
            Some(client) => client,
            None => Arc::new(ReqwestHttpClient::new(&self.config.http)?),
        };
        Ok(PullingEngine::start(self.config, client, self.retry_policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_caps_are_rejected() {
        let result = PullingEngine::builder()
            .rate_limits(RateLimitConfig::uniform(0))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn zero_response_buffer_is_rejected() {
        let result = PullingEngine::builder().response_buffer(0).build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn default_configuration_builds() {
        let engine = PullingEngine::builder().build().unwrap();
        assert_eq!(engine.scheduled_requests(), 0);
        engine.shutdown(Duration::from_millis(50)).await;
    }
}
