//! # Statistics Module
//!
//! Collects counters about the pulling engine's operation.
//!
//! ## Overview
//!
//! `PullStats` tracks submissions, duplicate drops, dispatches, retries,
//! give-ups and emitted responses. All counters are atomics, updated from the
//! engine's tasks without locking; a snapshot is taken for presentation so
//! the export formats stay consistent with each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ProgrammingError;

// A consistent snapshot used by the export/display methods.
struct StatsSnapshot {
    submitted: u64,
    duplicates_dropped: u64,
    cooldown_deferred: u64,
    dispatched: u64,
    succeeded: u64,
    failed: u64,
    retried: u64,
    gave_up: u64,
    cancelled: u64,
    responses_emitted: u64,
    bytes_pulled: u64,
    status_counts: HashMap<u16, u64>,
    elapsed: Duration,
}

impl StatsSnapshot {
    fn pulls_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs();
        if secs > 0 {
            self.dispatched as f64 / secs as f64
        } else {
            0.0
        }
    }

    fn formatted_bytes(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = 1024 * KB;
        const GB: u64 = 1024 * MB;

        if self.bytes_pulled >= GB {
            format!("{:.2} GB", self.bytes_pulled as f64 / GB as f64)
        } else if self.bytes_pulled >= MB {
            format!("{:.2} MB", self.bytes_pulled as f64 / MB as f64)
        } else if self.bytes_pulled >= KB {
            format!("{:.2} KB", self.bytes_pulled as f64 / KB as f64)
        } else {
            format!("{} B", self.bytes_pulled)
        }
    }
}

/// Counters describing the pulling engine's activity since construction.
#[derive(Debug, serde::Serialize)]
pub struct PullStats {
    #[serde(skip)]
    pub start_time: Instant,

    // Submission metrics
    pub submitted: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub cooldown_deferred: AtomicU64,

    // Dispatch metrics
    pub dispatched: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub retried: AtomicU64,
    pub gave_up: AtomicU64,
    pub cancelled: AtomicU64,

    // Output metrics
    pub responses_emitted: AtomicU64,
    pub bytes_pulled: AtomicU64,
    pub status_counts: Arc<dashmap::DashMap<u16, u64>>,
}

impl PullStats {
    pub(crate) fn new() -> Self {
        PullStats {
            start_time: Instant::now(),
            submitted: AtomicU64::new(0),
            duplicates_dropped: AtomicU64::new(0),
            cooldown_deferred: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            gave_up: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            responses_emitted: AtomicU64::new(0),
            bytes_pulled: AtomicU64::new(0),
            status_counts: Arc::new(dashmap::DashMap::new()),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let mut status_counts = HashMap::new();
        for entry in self.status_counts.iter() {
            let (key, value) = entry.pair();
            status_counts.insert(*key, *value);
        }

        StatsSnapshot {
            submitted: self.submitted.load(Ordering::SeqCst),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::SeqCst),
            cooldown_deferred: self.cooldown_deferred.load(Ordering::SeqCst),
            dispatched: self.dispatched.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            gave_up: self.gave_up.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            responses_emitted: self.responses_emitted.load(Ordering::SeqCst),
            bytes_pulled: self.bytes_pulled.load(Ordering::SeqCst),
            status_counts,
            elapsed: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_duplicates_dropped(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_cooldown_deferred(&self) {
        self.cooldown_deferred.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_gave_up(&self) {
        self.gave_up.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_responses_emitted(&self) {
        self.responses_emitted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_status(&self, status: u16) {
        *self.status_counts.entry(status).or_insert(0) += 1;
    }

    pub(crate) fn add_bytes_pulled(&self, bytes: u64) {
        self.bytes_pulled.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn to_json_string(&self) -> Result<String, ProgrammingError> {
        serde_json::to_string(self)
            .map_err(|e| ProgrammingError::new(format!("failed to serialise stats: {e}")))
    }

    pub fn to_json_string_pretty(&self) -> Result<String, ProgrammingError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ProgrammingError::new(format!("failed to serialise stats: {e}")))
    }
}

impl Default for PullStats {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PullStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nPull Statistics")?;
        writeln!(f, "---------------")?;
        writeln!(f, "  duration : {:?}", snapshot.elapsed)?;
        writeln!(f, "  speed    : {:.2} pulls/s", snapshot.pulls_per_second())?;
        writeln!(
            f,
            "  submits  : accepted: {}, duplicate: {}, deferred: {}",
            snapshot.submitted, snapshot.duplicates_dropped, snapshot.cooldown_deferred
        )?;
        writeln!(
            f,
            "  pulls    : dispatched: {}, ok: {}, fail: {}, retry: {}, gave up: {}, cancelled: {}",
            snapshot.dispatched,
            snapshot.succeeded,
            snapshot.failed,
            snapshot.retried,
            snapshot.gave_up,
            snapshot.cancelled
        )?;
        writeln!(
            f,
            "  output   : responses: {}, pulled: {}",
            snapshot.responses_emitted,
            snapshot.formatted_bytes()
        )?;

        let status_string = if snapshot.status_counts.is_empty() {
            "none".to_string()
        } else {
            snapshot
                .status_counts
                .iter()
                .map(|(code, count)| format!("{}: {}", code, count))
                .collect::<Vec<String>>()
                .join(", ")
        };

        writeln!(f, "  status   : {}\n", status_string)
    }
}
