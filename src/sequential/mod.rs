//! # Sequential Module
//!
//! Sharded, per-key FIFO processing with strict one-in-flight-per-shard
//! semantics.
//!
//! ## Overview
//!
//! Callers wrap each work item in a [`SequentialInput`] carrying a queue
//! resolver and a [`SubscriberAdapter`] around their async computation, then
//! hand it to [`SequentialProcessor::process_sequentially`]. Inputs that
//! resolve to the same shard run strictly in submission order, one at a
//! time; inputs on different shards run in parallel, bounded only by the
//! runtime.

mod processor;
mod queues;
mod subscriber;

pub use processor::{SequentialProcessor, SequentialProcessorBuilder};
pub use subscriber::{
    KeyHashResolver, LogContext, QueueResolver, SequentialInput, SubscriberAdapter,
};
