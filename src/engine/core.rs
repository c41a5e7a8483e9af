//! The core pulling engine for feed ingestion.
//!
//! This module defines the `PullingEngine`, which ties together the request
//! registry, the priority rate limiter, the transport seam and the retry
//! policy to continuously pull remote feeds. The engine runs an internal
//! command loop on its own task; fetches execute as separate tasks in a
//! `JoinSet`, and completed pulls are published on a hot multicast stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use kanal::{AsyncReceiver, AsyncSender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::fetch::fetch_and_publish;
use crate::builder::{EngineConfig, PullingEngineBuilder};
use crate::error::SubmitError;
use crate::http::HttpClient;
use crate::limiter::PriorityRateLimiter;
use crate::registry::{AdmitOutcome, RequestRegistry};
use crate::request::{FeedRequest, Fingerprint, Schedule};
use crate::response::FeedResponse;
use crate::retry::RetryPolicy;
use crate::stats::PullStats;

const LOOP_JOIN_SLACK: Duration = Duration::from_millis(250);

pub(crate) enum EngineCommand {
    Dispatch(Fingerprint),
    Shutdown { grace: Duration },
}

/// Opaque handle to a registered pull, used for cancellation.
///
/// The handle carries only the fingerprint; all state lives in the engine's
/// registry, never behind a reference from the handle back into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullHandle {
    fingerprint: Fingerprint,
}

impl PullHandle {
    /// Handle addressing whatever the given request's fingerprint currently
    /// identifies, letting one-shot submissions be cancelled too.
    pub fn for_request(request: &FeedRequest) -> Self {
        Self {
            fingerprint: request.fingerprint().clone(),
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

pub(crate) struct EngineInner {
    pub(crate) registry: RequestRegistry,
    pub(crate) limiter: PriorityRateLimiter,
    pub(crate) client: Arc<dyn HttpClient>,
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) responses_tx: broadcast::Sender<FeedResponse>,
    pub(crate) commands_tx: AsyncSender<EngineCommand>,
    pub(crate) in_flight: DashMap<Fingerprint, tokio::task::AbortHandle>,
    pub(crate) stats: Arc<PullStats>,
    pub(crate) is_shutting_down: AtomicBool,
}

/// Priority-aware feed pulling engine.
///
/// Long-lived and process-wide: accepts requests, de-duplicates them against
/// the registry, rate-limits per priority class, fetches over the transport
/// seam with retries, and emits [`FeedResponse`]s on a multicast stream until
/// shut down.
pub struct PullingEngine {
    inner: Arc<EngineInner>,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PullingEngine {
    pub fn builder() -> PullingEngineBuilder {
        PullingEngineBuilder::new()
    }

    /// Spawns the engine loop. Must be called within a tokio runtime.
    pub(crate) fn start(
        config: EngineConfig,
        client: Arc<dyn HttpClient>,
        retry_policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        let (commands_tx, commands_rx) = kanal::unbounded_async();
        let (responses_tx, _) = broadcast::channel(config.response_buffer);

        let inner = Arc::new(EngineInner {
            registry: RequestRegistry::new(),
            limiter: PriorityRateLimiter::new(&config.rate_limits),
            client,
            retry_policy,
            responses_tx,
            commands_tx,
            in_flight: DashMap::new(),
            stats: Arc::new(PullStats::new()),
            is_shutting_down: AtomicBool::new(false),
        });

        let loop_handle = tokio::spawn(run_loop(
            Arc::clone(&inner),
            commands_rx,
            config.tick_interval,
        ));

        Self {
            inner,
            loop_handle: Mutex::new(Some(loop_handle)),
        }
    }

    /// Submits a one-shot pull (or a periodic one when the request carries a
    /// schedule). Returns synchronously once the registry has admitted or
    /// rejected the fingerprint.
    pub async fn submit(&self, request: FeedRequest) -> Result<(), SubmitError> {
        if self.inner.is_shutting_down.load(Ordering::SeqCst) {
            return Err(SubmitError::ShuttingDown);
        }
        match self.inner.registry.admit(&request) {
            AdmitOutcome::DuplicateDrop => {
                self.inner.stats.increment_duplicates_dropped();
                debug!(
                    fingerprint = %request.fingerprint(),
                    "duplicate submission dropped"
                );
                Err(SubmitError::Duplicate)
            }
            AdmitOutcome::CooldownDefer(eligible_at) => {
                self.inner.stats.increment_cooldown_deferred();
                Err(SubmitError::CooldownDefer(
                    eligible_at.saturating_duration_since(Instant::now()),
                ))
            }
            AdmitOutcome::Admitted => {
                let fingerprint = request.fingerprint().clone();
                self.inner.stats.increment_submitted();
                if self
                    .inner
                    .commands_tx
                    .send(EngineCommand::Dispatch(fingerprint.clone()))
                    .await
                    .is_err()
                {
                    self.inner.registry.cancel(&fingerprint);
                    return Err(SubmitError::ShuttingDown);
                }
                Ok(())
            }
        }
    }

    /// Registers a self-repeating pull and returns its cancellation handle.
    pub async fn schedule_periodic(
        &self,
        request: FeedRequest,
        schedule: Schedule,
    ) -> Result<PullHandle, SubmitError> {
        let request = request.with_schedule(schedule);
        let fingerprint = request.fingerprint().clone();
        self.submit(request).await?;
        Ok(PullHandle { fingerprint })
    }

    /// Cancels a registered pull. An in-flight transport request is aborted
    /// best-effort and its outcome suppressed from the response stream.
    pub fn cancel(&self, handle: &PullHandle) -> bool {
        let existed = self.inner.registry.cancel(&handle.fingerprint);
        if let Some((_, abort)) = self.inner.in_flight.remove(&handle.fingerprint) {
            abort.abort();
        }
        if existed {
            self.inner.stats.increment_cancelled();
        }
        existed
    }

    /// Subscribes to the hot multicast stream of pulled responses.
    ///
    /// There is no global ordering across fingerprints; within one
    /// fingerprint, responses arrive in dispatch order because at most one
    /// request per fingerprint is ever in flight. A subscriber that lags
    /// behind the configured buffer observes `RecvError::Lagged` rather than
    /// slowing the engine down.
    pub fn responses(&self) -> broadcast::Receiver<FeedResponse> {
        self.inner.responses_tx.subscribe()
    }

    pub fn stats(&self) -> Arc<PullStats> {
        Arc::clone(&self.inner.stats)
    }

    /// Number of fingerprints currently registered (pending, in flight or
    /// cooling down).
    pub fn scheduled_requests(&self) -> usize {
        self.inner.registry.len()
    }

    /// Stops accepting submissions, drains in-flight pulls for at most
    /// `grace`, then aborts whatever remains. Idempotent.
    pub async fn shutdown(&self, grace: Duration) {
        if self.inner.is_shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("pulling engine shutting down");
        self.inner.limiter.close();
        let _ = self
            .inner
            .commands_tx
            .send(EngineCommand::Shutdown { grace })
            .await;

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(grace + LOOP_JOIN_SLACK, handle)
                .await
                .is_err()
            {
                warn!("engine loop did not stop within the grace period");
            }
        }

        self.inner.client.shutdown();
        self.inner.registry.clear();
        self.inner.in_flight.clear();
        info!("pulling engine shut down");
    }
}

async fn run_loop(
    inner: Arc<EngineInner>,
    commands_rx: AsyncReceiver<EngineCommand>,
    tick_interval: Duration,
) {
    let mut tasks = JoinSet::new();
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(tick_ms = tick_interval.as_millis() as u64, "pulling engine loop started");

    let grace = loop {
        tokio::select! {
            command = commands_rx.recv() => match command {
                Ok(EngineCommand::Dispatch(fingerprint)) => {
                    dispatch(&inner, &mut tasks, fingerprint);
                }
                Ok(EngineCommand::Shutdown { grace }) => break grace,
                Err(_) => {
                    warn!("engine command channel closed, stopping loop");
                    break Duration::from_secs(5);
                }
            },
            _ = ticker.tick() => {
                for fingerprint in inner.registry.due_requests(Instant::now()) {
                    dispatch(&inner, &mut tasks, fingerprint);
                }
            },
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        error!("fetch task failed: {e}");
                    }
                }
            }
        }
    };

    debug!(in_flight = tasks.len(), "draining in-flight pulls");
    let drain = async {
        while tasks.join_next().await.is_some() {}
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(
            grace_ms = grace.as_millis() as u64,
            "in-flight pulls exceeded the grace period, aborting"
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
    info!("pulling engine loop finished");
}

fn dispatch(inner: &Arc<EngineInner>, tasks: &mut JoinSet<()>, fingerprint: Fingerprint) {
    if inner.is_shutting_down.load(Ordering::SeqCst) {
        return;
    }
    // The registry is the single source of truth; an entry that is gone or
    // already claimed is simply not dispatched.
    let Some((request, attempt)) = inner.registry.begin_attempt(&fingerprint) else {
        debug!(fingerprint = %fingerprint, "skipping dispatch of unclaimed fingerprint");
        return;
    };
    let abort = tasks.spawn(fetch_and_publish(Arc::clone(inner), request, attempt));
    inner.in_flight.insert(fingerprint, abort);
}
