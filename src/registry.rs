//! # Registry Module
//!
//! Tracks every known request by fingerprint and is the single source of
//! truth for request identity. The registry MUST be consulted before any HTTP
//! work is scheduled: a fingerprint that is pending or in flight is dropped as
//! a duplicate, one in cooldown is deferred until it becomes eligible again.
//!
//! The same cooldown mechanism drives retry backoff and periodic re-pulls;
//! the engine's ticker asks for [`due_requests`](RequestRegistry::due_requests)
//! and re-dispatches whatever has become eligible.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;

use crate::request::{FeedRequest, Fingerprint, Schedule};
use crate::retry::RetryDecision;

/// Lifecycle state of a registered fingerprint. Cancelled entries are removed
/// from the registry immediately, so they never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    InFlight,
    Cooldown,
}

/// Result of consulting the registry before scheduling HTTP work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// Unseen fingerprint; the caller may dispatch it.
    Admitted,
    /// The fingerprint is already pending or in flight.
    DuplicateDrop,
    /// The fingerprint is cooling down and will be re-dispatched at the given
    /// instant without any action from the caller.
    CooldownDefer(Instant),
}

/// How a successful pull left its registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SuccessDisposition {
    /// One-shot request (or exhausted periodic schedule); entry removed.
    Removed,
    /// Periodic request parked until its next tick.
    Rescheduled(Instant),
}

/// How a failed pull left its registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureDisposition {
    /// The entry was cancelled while the pull was in flight.
    Cancelled,
    /// Retries exhausted on a one-shot request; entry removed.
    GaveUp,
    /// Cooling down until the retry delay elapses.
    RetryScheduled(Instant),
    /// Periodic request that gave up this cycle but stays on its schedule.
    PeriodicRescheduled(Instant),
}

#[derive(Debug)]
struct ScheduledEntry {
    request: FeedRequest,
    state: RequestState,
    /// Attempts made in the current pull cycle, reset on success.
    attempts: u32,
    /// Completed pulls, counted against `Schedule::max_pulls`.
    pulls_done: u32,
    last_attempt: Option<Instant>,
    next_eligible: Option<Instant>,
}

/// Fingerprint-keyed request book-keeping.
///
/// One mutex over one map; every operation is a short O(1) critical section
/// apart from the due-scan, which is linear in the number of entries.
pub struct RequestRegistry {
    entries: Mutex<HashMap<Fingerprint, ScheduledEntry>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Admits an unseen fingerprint as `Pending`, or reports why it cannot be
    /// dispatched right now.
    pub fn admit(&self, request: &FeedRequest) -> AdmitOutcome {
        let mut entries = self.entries.lock();
        match entries.get(request.fingerprint()) {
            Some(entry) => match entry.state {
                RequestState::Pending | RequestState::InFlight => AdmitOutcome::DuplicateDrop,
                RequestState::Cooldown => {
                    let eligible = entry.next_eligible.unwrap_or_else(Instant::now);
                    AdmitOutcome::CooldownDefer(eligible)
                }
            },
            None => {
                entries.insert(
                    request.fingerprint().clone(),
                    ScheduledEntry {
                        request: request.clone(),
                        state: RequestState::Pending,
                        attempts: 0,
                        pulls_done: 0,
                        last_attempt: None,
                        next_eligible: None,
                    },
                );
                AdmitOutcome::Admitted
            }
        }
    }

    /// Claims a pending entry for dispatch, moving it to `InFlight` and
    /// counting the attempt. Returns the request and the attempt number, or
    /// `None` when the entry is gone or already claimed.
    pub(crate) fn begin_attempt(&self, fingerprint: &Fingerprint) -> Option<(FeedRequest, u32)> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(fingerprint)?;
        if entry.state != RequestState::Pending {
            return None;
        }
        entry.state = RequestState::InFlight;
        entry.attempts += 1;
        entry.last_attempt = Some(Instant::now());
        Some((entry.request.clone(), entry.attempts))
    }

    /// Settles an in-flight entry after a successful pull. Returns `None` when
    /// the entry was cancelled mid-flight, in which case the response must be
    /// suppressed.
    pub(crate) fn complete_success(&self, fingerprint: &Fingerprint) -> Option<SuccessDisposition> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(fingerprint)?;
        entry.attempts = 0;
        entry.pulls_done += 1;
        match entry.request.schedule().copied() {
            Some(schedule) if !schedule_exhausted(&schedule, entry.pulls_done) => {
                let next = Instant::now() + jittered_interval(&schedule);
                entry.state = RequestState::Cooldown;
                entry.next_eligible = Some(next);
                Some(SuccessDisposition::Rescheduled(next))
            }
            _ => {
                entries.remove(fingerprint);
                Some(SuccessDisposition::Removed)
            }
        }
    }

    /// Settles an in-flight entry after a failed pull, applying the retry
    /// decision the engine obtained from its policy.
    pub(crate) fn complete_failure(
        &self,
        fingerprint: &Fingerprint,
        decision: RetryDecision,
    ) -> FailureDisposition {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(fingerprint) else {
            return FailureDisposition::Cancelled;
        };
        match decision {
            RetryDecision::RetryAfter(delay) => {
                let next = Instant::now() + delay;
                entry.state = RequestState::Cooldown;
                entry.next_eligible = Some(next);
                FailureDisposition::RetryScheduled(next)
            }
            RetryDecision::GiveUp => match entry.request.schedule().copied() {
                // Failed periodic pulls remain scheduled; the cycle restarts
                // fresh at the next tick.
                Some(schedule) => {
                    let next = Instant::now() + jittered_interval(&schedule);
                    entry.attempts = 0;
                    entry.state = RequestState::Cooldown;
                    entry.next_eligible = Some(next);
                    FailureDisposition::PeriodicRescheduled(next)
                }
                None => {
                    entries.remove(fingerprint);
                    FailureDisposition::GaveUp
                }
            },
        }
    }

    /// Removes the fingerprint entirely. Returns whether it was known.
    pub fn cancel(&self, fingerprint: &Fingerprint) -> bool {
        let removed = self.entries.lock().remove(fingerprint).is_some();
        if removed {
            debug!(fingerprint = %fingerprint, "registry entry cancelled");
        }
        removed
    }

    /// Moves every cooldown entry whose eligibility has passed back to
    /// `Pending` and returns their fingerprints for dispatch.
    pub fn due_requests(&self, now: Instant) -> Vec<Fingerprint> {
        let mut entries = self.entries.lock();
        let mut due = Vec::new();
        for (fingerprint, entry) in entries.iter_mut() {
            if entry.state == RequestState::Cooldown
                && entry.next_eligible.is_some_and(|at| at <= now)
            {
                entry.state = RequestState::Pending;
                entry.next_eligible = None;
                due.push(fingerprint.clone());
            }
        }
        due
    }

    /// Current state of a fingerprint, if registered.
    pub fn state_of(&self, fingerprint: &Fingerprint) -> Option<RequestState> {
        self.entries.lock().get(fingerprint).map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn schedule_exhausted(schedule: &Schedule, pulls_done: u32) -> bool {
    schedule.max_pulls.is_some_and(|max| pulls_done >= max)
}

fn jittered_interval(schedule: &Schedule) -> Duration {
    if schedule.jitter.is_zero() {
        schedule.interval
    } else {
        schedule.interval + rand::thread_rng().gen_range(Duration::ZERO..=schedule.jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::FeedRequest;

    fn one_shot(url: &str) -> FeedRequest {
        FeedRequest::builder(url).build().unwrap()
    }

    fn periodic(url: &str, interval_ms: u64) -> FeedRequest {
        FeedRequest::builder(url)
            .schedule(Schedule::every(Duration::from_millis(interval_ms)))
            .build()
            .unwrap()
    }

    #[test]
    fn pending_and_in_flight_reject_duplicates() {
        let registry = RequestRegistry::new();
        let request = one_shot("https://feeds.example.com/a");

        assert_eq!(registry.admit(&request), AdmitOutcome::Admitted);
        assert_eq!(registry.admit(&request), AdmitOutcome::DuplicateDrop);

        registry.begin_attempt(request.fingerprint()).unwrap();
        assert_eq!(registry.admit(&request), AdmitOutcome::DuplicateDrop);
    }

    #[test]
    fn cooldown_defers_with_eligibility_instant() {
        let registry = RequestRegistry::new();
        let request = one_shot("https://feeds.example.com/a");
        registry.admit(&request);
        registry.begin_attempt(request.fingerprint()).unwrap();
        registry.complete_failure(
            request.fingerprint(),
            RetryDecision::RetryAfter(Duration::from_secs(5)),
        );

        match registry.admit(&request) {
            AdmitOutcome::CooldownDefer(at) => assert!(at > Instant::now()),
            other => panic!("expected CooldownDefer, got {other:?}"),
        }
    }

    #[test]
    fn begin_attempt_claims_exactly_once() {
        let registry = RequestRegistry::new();
        let request = one_shot("https://feeds.example.com/a");
        registry.admit(&request);

        let (_, attempt) = registry.begin_attempt(request.fingerprint()).unwrap();
        assert_eq!(attempt, 1);
        assert!(registry.begin_attempt(request.fingerprint()).is_none());
    }

    #[test]
    fn one_shot_success_removes_entry() {
        let registry = RequestRegistry::new();
        let request = one_shot("https://feeds.example.com/a");
        registry.admit(&request);
        registry.begin_attempt(request.fingerprint()).unwrap();

        assert_eq!(
            registry.complete_success(request.fingerprint()),
            Some(SuccessDisposition::Removed)
        );
        assert!(registry.is_empty());
        // The same fingerprint may be submitted again afterwards.
        assert_eq!(registry.admit(&request), AdmitOutcome::Admitted);
    }

    #[test]
    fn periodic_success_reschedules() {
        let registry = RequestRegistry::new();
        let request = periodic("https://feeds.example.com/live", 100);
        registry.admit(&request);
        registry.begin_attempt(request.fingerprint()).unwrap();

        match registry.complete_success(request.fingerprint()) {
            Some(SuccessDisposition::Rescheduled(_)) => {}
            other => panic!("expected Rescheduled, got {other:?}"),
        }
        assert_eq!(
            registry.state_of(request.fingerprint()),
            Some(RequestState::Cooldown)
        );
    }

    #[test]
    fn periodic_schedule_exhausts_after_max_pulls() {
        let registry = RequestRegistry::new();
        let request = FeedRequest::builder("https://feeds.example.com/live")
            .schedule(Schedule::every(Duration::from_millis(10)).with_max_pulls(2))
            .build()
            .unwrap();
        registry.admit(&request);

        registry.begin_attempt(request.fingerprint()).unwrap();
        assert!(matches!(
            registry.complete_success(request.fingerprint()),
            Some(SuccessDisposition::Rescheduled(_))
        ));
        // Second pull hits the cap and removes the entry.
        let due = registry.due_requests(Instant::now() + Duration::from_secs(1));
        assert_eq!(due.len(), 1);
        registry.begin_attempt(request.fingerprint()).unwrap();
        assert_eq!(
            registry.complete_success(request.fingerprint()),
            Some(SuccessDisposition::Removed)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn failed_periodic_pull_remains_scheduled() {
        let registry = RequestRegistry::new();
        let request = periodic("https://feeds.example.com/live", 50);
        registry.admit(&request);
        registry.begin_attempt(request.fingerprint()).unwrap();

        match registry.complete_failure(request.fingerprint(), RetryDecision::GiveUp) {
            FailureDisposition::PeriodicRescheduled(_) => {}
            other => panic!("expected PeriodicRescheduled, got {other:?}"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn exhausted_one_shot_is_removed() {
        let registry = RequestRegistry::new();
        let request = one_shot("https://feeds.example.com/a");
        registry.admit(&request);
        registry.begin_attempt(request.fingerprint()).unwrap();

        assert_eq!(
            registry.complete_failure(request.fingerprint(), RetryDecision::GiveUp),
            FailureDisposition::GaveUp
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn due_requests_transition_back_to_pending() {
        let registry = RequestRegistry::new();
        let request = one_shot("https://feeds.example.com/a");
        registry.admit(&request);
        registry.begin_attempt(request.fingerprint()).unwrap();
        registry.complete_failure(
            request.fingerprint(),
            RetryDecision::RetryAfter(Duration::from_millis(10)),
        );

        assert!(registry.due_requests(Instant::now()).is_empty());
        let later = Instant::now() + Duration::from_millis(20);
        let due = registry.due_requests(later);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0], *request.fingerprint());
        assert_eq!(
            registry.state_of(request.fingerprint()),
            Some(RequestState::Pending)
        );
        // A second scan at the same instant returns nothing.
        assert!(registry.due_requests(later).is_empty());
    }

    #[test]
    fn cancelled_entry_suppresses_completion() {
        let registry = RequestRegistry::new();
        let request = one_shot("https://feeds.example.com/a");
        registry.admit(&request);
        registry.begin_attempt(request.fingerprint()).unwrap();

        assert!(registry.cancel(request.fingerprint()));
        assert!(registry.complete_success(request.fingerprint()).is_none());
        assert_eq!(
            registry.complete_failure(
                request.fingerprint(),
                RetryDecision::RetryAfter(Duration::from_secs(1))
            ),
            FailureDisposition::Cancelled
        );
    }
}
