//! # Subscriber Module
//!
//! The caller-facing half of the sequential processor: queue resolvers that
//! map inputs to shards, the [`SubscriberAdapter`] that bridges the caller's
//! async computation to the processor's completion signalling, and the
//! [`SequentialInput`] carrier tying them together.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::error;

use super::processor::Completion;
use crate::error::SubscriberError;

/// Pure mapping from an input to a shard index in `[0, shard_count)`.
///
/// Must be deterministic: equal inputs always land on the same shard, which
/// is what makes per-key ordering hold.
pub trait QueueResolver<I>: Send + Sync {
    fn shard_for(&self, input: &I, shard_count: usize) -> usize;
}

impl<I, F> QueueResolver<I> for F
where
    F: Fn(&I, usize) -> usize + Send + Sync,
{
    fn shard_for(&self, input: &I, shard_count: usize) -> usize {
        self(input, shard_count)
    }
}

/// Resolver hashing a caller-chosen key field modulo the shard count.
pub struct KeyHashResolver<F> {
    key_fn: F,
}

impl<F> KeyHashResolver<F> {
    pub fn new(key_fn: F) -> Self {
        Self { key_fn }
    }
}

impl<I, K, F> QueueResolver<I> for KeyHashResolver<F>
where
    K: Hash,
    F: Fn(&I) -> K + Send + Sync,
{
    fn shard_for(&self, input: &I, shard_count: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        (self.key_fn)(input).hash(&mut hasher);
        (hasher.finish() % shard_count as u64) as usize
    }
}

/// Opaque key/value bag attached to an input for log correlation.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    message: String,
    fields: Vec<(String, String)>,
}

impl LogContext {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for (key, value) in &self.fields {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

type Handler<I> = Box<dyn FnOnce(I) -> BoxFuture<'static, Result<(), SubscriberError>> + Send>;
type SuccessHook = Box<dyn FnOnce() + Send>;
type FailureHook = Box<dyn FnOnce(SubscriberError) + Send>;

/// Bridges a caller-supplied async computation to the processor's completion
/// callbacks.
///
/// Exactly one completion signal fires per subscription, no matter how the
/// handler or the hooks end: normal return, error, or panic. The shard queue
/// advances on completion regardless of success or failure; the error itself
/// is only the caller's concern.
pub struct SubscriberAdapter<I> {
    handler: Handler<I>,
    on_success: Option<SuccessHook>,
    on_failure: Option<FailureHook>,
}

impl<I: Send + 'static> SubscriberAdapter<I> {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SubscriberError>> + Send + 'static,
    {
        Self {
            handler: Box::new(move |input| handler(input).boxed()),
            on_success: None,
            on_failure: None,
        }
    }

    /// Hook invoked after the handler resolves successfully.
    pub fn on_success(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    /// Hook invoked with the handler's error. A panicking hook is caught and
    /// logged; it never stalls the shard.
    pub fn on_failure(mut self, hook: impl FnOnce(SubscriberError) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    /// Launches the computation on its own task. The completion signal is
    /// wired into every exit path; this is what lets the next queued item of
    /// the shard start once this one is done.
    pub(crate) fn subscribe(self, input: I, completion: Completion) {
        let Self {
            handler,
            on_success,
            on_failure,
        } = self;
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler(input)).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {
                    if let Some(hook) = on_success {
                        run_hook(|| hook());
                    }
                }
                Ok(Err(err)) => {
                    if let Some(hook) = on_failure {
                        run_hook(move || hook(err));
                    }
                }
                Err(_) => {
                    error!("subscriber panicked; advancing its shard queue");
                }
            }
            completion.finish();
        });
    }
}

fn run_hook(hook: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
        error!("subscriber completion hook panicked; advancing its shard queue");
    }
}

/// Carrier of one work item for the sequential processor.
pub struct SequentialInput<I> {
    pub(crate) input: I,
    pub(crate) resolver: Box<dyn QueueResolver<I>>,
    pub(crate) subscriber: SubscriberAdapter<I>,
    pub(crate) context: LogContext,
}

impl<I: Send + 'static> SequentialInput<I> {
    pub fn new(
        input: I,
        resolver: impl QueueResolver<I> + 'static,
        subscriber: SubscriberAdapter<I>,
    ) -> Self {
        Self {
            input,
            resolver: Box::new(resolver),
            subscriber,
            context: LogContext::default(),
        }
    }

    pub fn with_context(mut self, context: LogContext) -> Self {
        self.context = context;
        self
    }
}
