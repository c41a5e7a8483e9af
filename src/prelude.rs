//! A "prelude" for users of the `feedpull` crate.
//!
//! This prelude re-exports the most commonly used traits, structs, and macros
//! so that they can be easily imported.
//!
//! # Example
//!
//! ```
//! use feedpull::prelude::*;
//! ```

pub use crate::{
    // Core structs
    FeedPriority,
    FeedRequest,
    FeedResponse,
    PullHandle,
    PullingEngine,
    Schedule,
    SequentialInput,
    SequentialProcessor,
    SubscriberAdapter,
    // Core traits
    HttpClient,
    QueueResolver,
    RetryPolicy,
    // Essential re-export for trait implementation
    async_trait,
};

pub use crate::error::{FetchError, SubmitError, SubscriberError};
pub use crate::retry::{ExponentialBackoff, RetryDecision};
pub use crate::sequential::KeyHashResolver;
