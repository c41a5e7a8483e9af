//! Error types shared across the pulling engine and the sequential processor.

use std::time::Duration;

use thiserror::Error;

/// Categorised transport failure, consulted by [`crate::retry::RetryPolicy`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// DNS, connection or TLS level failure before an HTTP status was seen.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request exceeded the configured read timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-retryable status (4xx and friends).
    #[error("client error status {0}")]
    ClientStatus(u16),

    /// The server answered with a 5xx status.
    #[error("server error status {0}")]
    ServerStatus(u16),

    /// The engine or transport was shut down while the request was pending.
    #[error("shut down while request was pending")]
    Shutdown,
}

impl FetchError {
    /// Maps a non-2xx HTTP status to its error category.
    pub fn from_status(status: u16) -> Self {
        if (500..600).contains(&status) {
            FetchError::ServerStatus(status)
        } else {
            FetchError::ClientStatus(status)
        }
    }

    /// Whether the default policy considers this failure worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Transport(_) | FetchError::Timeout | FetchError::ServerStatus(_)
        )
    }
}

/// Synchronous rejection returned from [`crate::PullingEngine::submit`].
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The same fingerprint is already pending or in flight.
    #[error("duplicate request dropped: fingerprint already pending or in flight")]
    Duplicate,

    /// The fingerprint is cooling down; it will be re-dispatched automatically
    /// once the remaining duration elapses.
    #[error("request in cooldown for another {0:?}")]
    CooldownDefer(Duration),

    /// The engine no longer accepts submissions.
    #[error("engine is shutting down")]
    ShuttingDown,
}

/// Failure signalled by a subscriber's async computation.
///
/// The sequential processor never inspects or transforms this; it only hands
/// it to the caller's failure hook and advances the shard queue.
#[derive(Debug, Error)]
#[error("subscriber failed: {message}")]
pub struct SubscriberError {
    message: String,
}

impl SubscriberError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A contract violation by the caller (double token release, out-of-range
/// queue resolver, invalid configuration). Never recovered, always logged.
#[derive(Debug, Error)]
#[error("contract violation: {0}")]
pub struct ProgrammingError(String);

impl ProgrammingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_categorisation() {
        assert!(matches!(
            FetchError::from_status(503),
            FetchError::ServerStatus(503)
        ));
        assert!(matches!(
            FetchError::from_status(404),
            FetchError::ClientStatus(404)
        ));
        assert!(matches!(
            FetchError::from_status(301),
            FetchError::ClientStatus(301)
        ));
    }

    #[test]
    fn retryability() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::Transport("connection refused".into()).is_retryable());
        assert!(FetchError::ServerStatus(500).is_retryable());
        assert!(!FetchError::ClientStatus(404).is_retryable());
        assert!(!FetchError::Shutdown.is_retryable());
    }
}
