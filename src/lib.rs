//! # feedpull
//!
//! Data-ingestion pipeline library: a priority-aware HTTP pulling engine and
//! a sharded sequential processor with strict per-key ordering.
//!
//! Provides the main components: `PullingEngine`, `SequentialProcessor`,
//! the `HttpClient` transport seam, and infrastructure.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use feedpull::{
//!     FeedPriority, FeedRequest, KeyHashResolver, PullingEngine, Schedule,
//!     SequentialInput, SequentialProcessor, SubscriberAdapter,
//! };
//!
//! async fn ingest() -> anyhow::Result<()> {
//!     let engine = PullingEngine::builder().build()?;
//!     let processor = SequentialProcessor::new();
//!
//!     let request = FeedRequest::builder("https://feeds.example.com/match/42")
//!         .priority(FeedPriority::High)
//!         .tag("live-results")
//!         .build()?;
//!     engine
//!         .schedule_periodic(request, Schedule::every(Duration::from_secs(1)))
//!         .await?;
//!
//!     let mut responses = engine.responses();
//!     while let Ok(response) = responses.recv().await {
//!         let subscriber = SubscriberAdapter::new(|response: feedpull::FeedResponse| async move {
//!             // decode and store the payload
//!             Ok(())
//!         });
//!         processor.process_sequentially(SequentialInput::new(
//!             response,
//!             KeyHashResolver::new(|r: &feedpull::FeedResponse| r.fingerprint.clone()),
//!             subscriber,
//!         ));
//!     }
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod engine;
pub mod error;
pub mod http;
pub mod limiter;
pub mod prelude;
pub mod registry;
pub mod request;
pub mod response;
pub mod retry;
pub mod sequential;
pub mod stats;

pub use builder::{EngineConfig, PullingEngineBuilder};
pub use engine::{PullHandle, PullingEngine};
pub use error::{FetchError, ProgrammingError, SubmitError, SubscriberError};
pub use http::{HttpBody, HttpClient, HttpClientConfig, ReqwestHttpClient};
pub use limiter::{PriorityRateLimiter, PriorityToken, RateLimitConfig};
pub use registry::{AdmitOutcome, RequestRegistry, RequestState};
pub use request::{FeedHeader, FeedPriority, FeedRequest, FeedRequestBuilder, Fingerprint, Schedule};
pub use response::FeedResponse;
pub use retry::{ExponentialBackoff, RetryDecision, RetryPolicy};
pub use sequential::{
    KeyHashResolver, LogContext, QueueResolver, SequentialInput, SequentialProcessor,
    SequentialProcessorBuilder, SubscriberAdapter,
};
pub use stats::PullStats;

pub use async_trait::async_trait;
pub use tokio;
