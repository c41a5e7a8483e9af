//! Contains the per-request fetch task of the pulling engine.
//!
//! Each dispatched fingerprint runs through this pipeline exactly once per
//! attempt: acquire a rate-limit token for its priority class, issue the GET
//! through the transport seam, then settle the registry entry and publish the
//! response. Failures are routed through the retry policy; the resulting
//! cooldown is what the engine's ticker later picks up for re-dispatch.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tracing::{debug, error, warn};

use super::core::EngineInner;
use crate::error::FetchError;
use crate::registry::{FailureDisposition, SuccessDisposition};
use crate::request::FeedRequest;
use crate::response::FeedResponse;
use crate::retry::RetryDecision;

pub(crate) async fn fetch_and_publish(inner: Arc<EngineInner>, request: FeedRequest, attempt: u32) {
    let fingerprint = request.fingerprint().clone();

    let mut token = match inner.limiter.acquire(request.priority()).await {
        Ok(token) => token,
        Err(_) => {
            // Limiter closed: the engine is shutting down.
            inner.in_flight.remove(&fingerprint);
            return;
        }
    };

    inner.stats.increment_dispatched();
    let started = Instant::now();
    let result = inner.client.get_async(&request).await;

    if let Err(violation) = inner.limiter.release(&mut token) {
        error!(fingerprint = %fingerprint, "rate-limit token release failed: {violation}");
    }
    inner.in_flight.remove(&fingerprint);

    match result {
        Ok(body) => {
            inner.stats.increment_succeeded();
            inner.stats.record_status(body.status);
            inner.stats.add_bytes_pulled(body.bytes.len() as u64);

            let response = FeedResponse {
                fingerprint: fingerprint.clone(),
                status: body.status,
                body: body.bytes,
                received_at: SystemTime::now(),
                elapsed: started.elapsed(),
            };

            match inner.registry.complete_success(&fingerprint) {
                None => {
                    debug!(
                        fingerprint = %fingerprint,
                        "request cancelled mid-flight; response suppressed"
                    );
                }
                Some(disposition) => {
                    inner.stats.increment_responses_emitted();
                    // Consumers receive on their own tasks; send never blocks
                    // and an absent consumer is not an error.
                    let _ = inner.responses_tx.send(response);
                    if let SuccessDisposition::Rescheduled(_) = disposition {
                        debug!(
                            fingerprint = %fingerprint,
                            "periodic pull completed, waiting for next tick"
                        );
                    }
                }
            }
        }
        Err(FetchError::Shutdown) => {
            debug!(fingerprint = %fingerprint, "pull abandoned by shutdown");
        }
        Err(error) => {
            inner.stats.increment_failed();
            match error {
                FetchError::ClientStatus(status) | FetchError::ServerStatus(status) => {
                    inner.stats.record_status(status);
                }
                _ => {}
            }
            if inner.is_shutting_down.load(Ordering::SeqCst) {
                debug!(fingerprint = %fingerprint, "pull failed during shutdown, not retried");
                return;
            }

            let policy = request
                .retry_policy()
                .cloned()
                .unwrap_or_else(|| Arc::clone(&inner.retry_policy));
            let decision = policy.decide(attempt, &error, &request);
            match decision {
                RetryDecision::RetryAfter(_) => inner.stats.increment_retried(),
                RetryDecision::GiveUp => inner.stats.increment_gave_up(),
            }

            match inner.registry.complete_failure(&fingerprint, decision) {
                FailureDisposition::Cancelled => {
                    debug!(fingerprint = %fingerprint, "failed pull was already cancelled");
                }
                FailureDisposition::GaveUp => {
                    warn!(
                        fingerprint = %fingerprint,
                        attempt,
                        error = %error,
                        "pull gave up; no response emitted"
                    );
                }
                FailureDisposition::RetryScheduled(_) => {
                    debug!(
                        fingerprint = %fingerprint,
                        attempt,
                        error = %error,
                        "pull failed, retry scheduled"
                    );
                }
                FailureDisposition::PeriodicRescheduled(_) => {
                    warn!(
                        fingerprint = %fingerprint,
                        attempt,
                        error = %error,
                        "periodic pull failed this cycle; schedule kept"
                    );
                }
            }
        }
    }
}
