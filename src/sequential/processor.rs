//! # Sequential Processor Module
//!
//! Routes inputs to shards and guarantees at-most-one in-flight computation
//! per shard while allowing unbounded parallelism across shards.
//!
//! ## Overview
//!
//! `process_sequentially` is fire-and-forget: it resolves the input's shard,
//! enqueues it and returns. If the shard was idle the item starts
//! immediately; otherwise the running item's completion signal picks it up.
//! Completion fires exactly once per item (success, failure or panic alike),
//! which is the mechanism that preserves per-shard FIFO order.
//!
//! A subscriber that never signals completion permanently stalls its shard;
//! that is the price of the ordering guarantee. Items that wait longer than
//! the configured threshold before starting are logged with the
//! `enqueued_input_for_too_long` analytics id so such stalls are observable.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::queues::{
    AdvanceOutcome, EnqueueOutcome, EnqueuedInput, QueueDepths, ShardedQueueSet, StartItem,
};
use super::subscriber::{LogContext, SequentialInput};

const SHARD_COUNT_DEFAULT: usize = 100_000;
const STALL_WARN_AFTER_DEFAULT: Duration = Duration::from_secs(2);

/// Completion signal for one enqueued input.
///
/// `finish` is idempotent. If the holder drops the signal without calling it
/// (a panicked task, an aborted future), dropping advances the shard anyway,
/// so a lost signal degrades to a log line instead of a stalled shard.
pub struct Completion {
    inner: Arc<ProcessorInner>,
    shard: usize,
    signalled: AtomicBool,
}

impl Completion {
    fn new(inner: Arc<ProcessorInner>, shard: usize) -> Self {
        Self {
            inner,
            shard,
            signalled: AtomicBool::new(false),
        }
    }

    pub(crate) fn finish(&self) {
        if self.signalled.swap(true, Ordering::SeqCst) {
            return;
        }
        advance(&self.inner, self.shard);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.signalled.swap(true, Ordering::SeqCst) {
            warn!(
                shard = self.shard,
                "completion signal dropped without firing; advancing shard"
            );
            advance(&self.inner, self.shard);
        }
    }
}

pub(crate) struct ProcessorInner {
    queues: ShardedQueueSet,
    stall_warn_after: Duration,
    stall_warnings: AtomicU64,
    rejected_inputs: AtomicU64,
    processed_inputs: AtomicU64,
}

/// Sharded, per-key FIFO dispatcher.
#[derive(Clone)]
pub struct SequentialProcessor {
    inner: Arc<ProcessorInner>,
}

impl SequentialProcessor {
    /// Processor with the default shard count of 100 000 — large so that
    /// key-heavy workloads spread out with few hash collisions.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn with_shard_count(shard_count: usize) -> Self {
        Self::builder().shard_count(shard_count).build()
    }

    pub fn builder() -> SequentialProcessorBuilder {
        SequentialProcessorBuilder::default()
    }

    /// Enqueues the input on its shard and returns immediately. Processing
    /// starts now if the shard was idle, or when the items ahead of it have
    /// all signalled completion.
    pub fn process_sequentially<I: Send + 'static>(&self, sequential_input: SequentialInput<I>) {
        let shard_count = self.inner.queues.shard_count();
        let shard = sequential_input
            .resolver
            .shard_for(&sequential_input.input, shard_count);
        if shard >= shard_count {
            // Contract violation by the resolver; never recovered.
            error!(
                shard,
                shard_count,
                input = %sequential_input.context,
                "queue resolver returned an out-of-range shard index; input dropped"
            );
            self.inner.rejected_inputs.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let SequentialInput {
            input,
            subscriber,
            context,
            ..
        } = sequential_input;
        let item = EnqueuedInput {
            launch: Some(Box::new(move |completion| {
                subscriber.subscribe(input, completion)
            })),
            enqueued_at: Instant::now(),
            context: context.clone(),
        };

        match self.inner.queues.enqueue(shard, item) {
            EnqueueOutcome::Started(start, depths) => {
                log_depths(shard, depths, "enqueued input, shard idle, starting", &context);
                start_item(&self.inner, shard, start);
            }
            EnqueueOutcome::Queued(depths) => {
                log_depths(shard, depths, "enqueued input behind running head", &context);
            }
            EnqueueOutcome::Rejected(depths) => {
                error!(
                    shard,
                    shard_size = depths.shard_size,
                    input = %context,
                    "shard queue at capacity; input dropped"
                );
                self.inner.rejected_inputs.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Advisory count of inputs enqueued across all shards.
    pub fn unprocessed_total(&self) -> u64 {
        self.inner.queues.total()
    }

    /// Number of items that waited longer than the stall threshold before
    /// starting.
    pub fn stall_warnings(&self) -> u64 {
        self.inner.stall_warnings.load(Ordering::Relaxed)
    }

    /// Inputs dropped for contract violations or capacity overflow.
    pub fn rejected_inputs(&self) -> u64 {
        self.inner.rejected_inputs.load(Ordering::Relaxed)
    }

    /// Items whose completion has been signalled.
    pub fn processed_inputs(&self) -> u64 {
        self.inner.processed_inputs.load(Ordering::Relaxed)
    }

    pub fn shard_count(&self) -> usize {
        self.inner.queues.shard_count()
    }
}

impl Default for SequentialProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for [`SequentialProcessor`].
pub struct SequentialProcessorBuilder {
    shard_count: usize,
    per_shard_cap: Option<usize>,
    stall_warn_after: Duration,
}

impl Default for SequentialProcessorBuilder {
    fn default() -> Self {
        Self {
            shard_count: SHARD_COUNT_DEFAULT,
            per_shard_cap: None,
            stall_warn_after: STALL_WARN_AFTER_DEFAULT,
        }
    }
}

impl SequentialProcessorBuilder {
    pub fn shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count.max(1);
        self
    }

    /// Optional bound on each shard queue. Overflowing inputs are dropped
    /// with an error log; backpressure beyond that is the caller's concern.
    pub fn per_shard_cap(mut self, cap: usize) -> Self {
        self.per_shard_cap = Some(cap.max(1));
        self
    }

    pub fn stall_warn_after(mut self, threshold: Duration) -> Self {
        self.stall_warn_after = threshold;
        self
    }

    pub fn build(self) -> SequentialProcessor {
        SequentialProcessor {
            inner: Arc::new(ProcessorInner {
                queues: ShardedQueueSet::new(self.shard_count, self.per_shard_cap),
                stall_warn_after: self.stall_warn_after,
                stall_warnings: AtomicU64::new(0),
                rejected_inputs: AtomicU64::new(0),
                processed_inputs: AtomicU64::new(0),
            }),
        }
    }
}

fn log_depths(shard: usize, depths: QueueDepths, what: &str, context: &LogContext) {
    info!(
        analytics_id = "unprocessed_total",
        shard,
        shard_size = depths.shard_size,
        unprocessed_total = depths.total,
        input = %context,
        "{what}"
    );
}

fn start_item(inner: &Arc<ProcessorInner>, shard: usize, start: StartItem) {
    warn_if_waiting_too_long(inner, &start);
    debug!(shard, input = %start.context, "starting next input");
    let completion = Completion::new(Arc::clone(inner), shard);
    let launch = start.launch;
    // A panicking launch must not escape: the completion guard it consumed
    // advances the shard while this unwinds.
    if std::panic::catch_unwind(AssertUnwindSafe(move || launch(completion))).is_err() {
        error!(shard, "failed to launch subscriber; shard advanced by completion guard");
    }
}

fn advance(inner: &Arc<ProcessorInner>, shard: usize) {
    inner.processed_inputs.fetch_add(1, Ordering::Relaxed);
    match inner.queues.dequeue_head(shard) {
        AdvanceOutcome::Next(start, depths) => {
            info!(
                analytics_id = "unprocessed_total",
                shard,
                shard_size = depths.shard_size,
                unprocessed_total = depths.total,
                "dequeued finished input, launching next"
            );
            start_item(inner, shard, start);
        }
        AdvanceOutcome::Drained(depths) => {
            info!(
                analytics_id = "unprocessed_total",
                shard,
                shard_size = depths.shard_size,
                unprocessed_total = depths.total,
                "dequeued finished input, shard drained"
            );
        }
        AdvanceOutcome::NotProcessing => {
            error!(
                shard,
                "completion signalled for an idle shard; this indicates a double completion"
            );
        }
    }
}

fn warn_if_waiting_too_long(inner: &Arc<ProcessorInner>, start: &StartItem) {
    let waited = start.enqueued_at.elapsed();
    if waited > inner.stall_warn_after {
        inner.stall_warnings.fetch_add(1, Ordering::Relaxed);
        warn!(
            analytics_id = "enqueued_input_for_too_long",
            waiting_millis = waited.as_millis() as u64,
            unprocessed_total = inner.queues.total(),
            input = %start.context,
            "enqueued input waited too long for processing"
        );
    }
}
