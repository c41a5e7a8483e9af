//! Fixed set of per-shard FIFO queues with a shared total counter.
//!
//! All queue mutations and the paired counter update happen under one
//! process-wide lock. Critical sections only enqueue, dequeue and peek; no
//! subscriber code, I/O or logging runs while the lock is held. Per-shard
//! locking would need two-phase acquisition to keep the total consistent,
//! and for critical sections this short a single lock is fast enough at the
//! expected submission rates.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use super::processor::Completion;
use super::subscriber::LogContext;

/// Type-erased starter for one enqueued input: invoking it launches the
/// subscriber's async computation with the given completion signal.
pub(crate) type LaunchFn = Box<dyn FnOnce(Completion) + Send>;

/// Explicit per-shard state: the head of a `Processing` shard is the item
/// currently running; an `Idle` shard has an empty queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShardState {
    Idle,
    Processing,
}

/// One queued work item. While the item is being processed it stays at the
/// head of its queue with the launcher already taken out.
pub(crate) struct EnqueuedInput {
    pub launch: Option<LaunchFn>,
    pub enqueued_at: Instant,
    pub context: LogContext,
}

/// An item ready to start, handed back to the caller outside the lock.
pub(crate) struct StartItem {
    pub launch: LaunchFn,
    pub enqueued_at: Instant,
    pub context: LogContext,
}

/// Queue depths observed in the same critical section as the mutation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueDepths {
    pub shard_size: usize,
    pub total: u64,
}

pub(crate) enum EnqueueOutcome {
    /// The shard was idle; the caller must launch the item now.
    Started(StartItem, QueueDepths),
    /// The shard is busy; the running item's completion will pick this up.
    Queued(QueueDepths),
    /// The optional per-shard cap was hit; the item was not enqueued.
    Rejected(QueueDepths),
}

pub(crate) enum AdvanceOutcome {
    /// The finished head was removed and the next item must be launched.
    Next(StartItem, QueueDepths),
    /// The finished head was removed and the shard is idle again.
    Drained(QueueDepths),
    /// The shard was not processing anything; completion was signalled twice.
    NotProcessing,
}

struct Shards {
    queues: Vec<VecDeque<EnqueuedInput>>,
    states: Vec<ShardState>,
    total: u64,
}

/// Fixed mapping from shard index to a FIFO queue plus the shared counter.
pub(crate) struct ShardedQueueSet {
    inner: Mutex<Shards>,
    // Advisory mirror of the counter for reads outside the lock.
    total_advisory: AtomicU64,
    shard_count: usize,
    per_shard_cap: Option<usize>,
}

impl ShardedQueueSet {
    pub fn new(shard_count: usize, per_shard_cap: Option<usize>) -> Self {
        let mut queues = Vec::with_capacity(shard_count);
        queues.resize_with(shard_count, VecDeque::new);
        Self {
            inner: Mutex::new(Shards {
                queues,
                states: vec![ShardState::Idle; shard_count],
                total: 0,
            }),
            total_advisory: AtomicU64::new(0),
            shard_count,
            per_shard_cap,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Appends to the shard queue, bumping the counter. When the shard was
    /// idle the item's launcher is handed back and the shard becomes busy:
    /// the caller is now responsible for starting it.
    pub fn enqueue(&self, shard: usize, mut item: EnqueuedInput) -> EnqueueOutcome {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(cap) = self.per_shard_cap {
            let len = inner.queues[shard].len();
            if len >= cap {
                return EnqueueOutcome::Rejected(QueueDepths {
                    shard_size: len,
                    total: inner.total,
                });
            }
        }

        let start = if inner.states[shard] == ShardState::Idle {
            inner.states[shard] = ShardState::Processing;
            item.launch.take().map(|launch| StartItem {
                launch,
                enqueued_at: item.enqueued_at,
                context: item.context.clone(),
            })
        } else {
            None
        };

        inner.queues[shard].push_back(item);
        inner.total += 1;
        let depths = QueueDepths {
            shard_size: inner.queues[shard].len(),
            total: inner.total,
        };
        self.total_advisory.store(inner.total, Ordering::Relaxed);

        match start {
            Some(start) => EnqueueOutcome::Started(start, depths),
            None => EnqueueOutcome::Queued(depths),
        }
    }

    /// Removes the just-finished head, decrements the counter and peeks the
    /// new head. A present head is handed back for launching and the shard
    /// stays busy; otherwise it returns to idle.
    pub fn dequeue_head(&self, shard: usize) -> AdvanceOutcome {
        let mut inner = self.inner.lock();
        if inner.states[shard] != ShardState::Processing {
            return AdvanceOutcome::NotProcessing;
        }
        if inner.queues[shard].pop_front().is_none() {
            inner.states[shard] = ShardState::Idle;
            return AdvanceOutcome::NotProcessing;
        }
        inner.total -= 1;
        self.total_advisory.store(inner.total, Ordering::Relaxed);

        let next = inner.queues[shard].front_mut().and_then(|item| {
            item.launch.take().map(|launch| StartItem {
                launch,
                enqueued_at: item.enqueued_at,
                context: item.context.clone(),
            })
        });
        let depths = QueueDepths {
            shard_size: inner.queues[shard].len(),
            total: inner.total,
        };
        match next {
            Some(start) => AdvanceOutcome::Next(start, depths),
            None => {
                inner.states[shard] = ShardState::Idle;
                AdvanceOutcome::Drained(depths)
            }
        }
    }

    /// Advisory read of the total; only consistent when taken under the lock,
    /// which logging does not need.
    pub fn total(&self) -> u64 {
        self.total_advisory.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn counter_matches_queue_sizes(&self) -> bool {
        let inner = self.inner.lock();
        let sum: u64 = inner.queues.iter().map(|q| q.len() as u64).sum();
        sum == inner.total
    }
}
