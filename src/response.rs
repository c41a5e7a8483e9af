//! The immutable [`FeedResponse`] published on the engine's output stream.

use std::time::{Duration, SystemTime};

use bytes::Bytes;

use crate::request::Fingerprint;

/// One successfully pulled feed payload.
///
/// Cloned into every subscriber of [`crate::PullingEngine::responses`]; the
/// body is reference-counted so cloning is cheap.
#[derive(Debug, Clone)]
pub struct FeedResponse {
    /// Identity of the request this response answers.
    pub fingerprint: Fingerprint,
    /// The 2xx status the transport observed.
    pub status: u16,
    /// Raw body bytes; decoding is the caller's concern.
    pub body: Bytes,
    /// Wall-clock time the response completed.
    pub received_at: SystemTime,
    /// Time from dispatch to completion.
    pub elapsed: Duration,
}
