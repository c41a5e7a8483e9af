//! # Request Module
//!
//! Defines the immutable [`FeedRequest`] value describing a single pull, its
//! [`FeedPriority`] class, the de-duplication [`Fingerprint`] and the optional
//! periodic [`Schedule`].
//!
//! ## Overview
//!
//! A `FeedRequest` is built once and never mutated. Its fingerprint is derived
//! deterministically from the URL, the ordered header sequence and an optional
//! caller-supplied tag; two requests with equal fingerprints are treated as
//! the same request by the [`crate::registry::RequestRegistry`].

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::ProgrammingError;
use crate::retry::RetryPolicy;

/// Priority class of a feed pull.
///
/// Each class gets its own transport client and its own rate-limit pool, so
/// contention on a lower class never delays a higher one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeedPriority {
    Highest,
    High,
    Medium,
    Low,
    Lowest,
}

impl FeedPriority {
    pub const COUNT: usize = 5;

    pub const ALL: [FeedPriority; FeedPriority::COUNT] = [
        FeedPriority::Highest,
        FeedPriority::High,
        FeedPriority::Medium,
        FeedPriority::Low,
        FeedPriority::Lowest,
    ];

    /// Discriminant used to index per-priority arrays.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FeedPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeedPriority::Highest => "highest",
            FeedPriority::High => "high",
            FeedPriority::Medium => "medium",
            FeedPriority::Low => "low",
            FeedPriority::Lowest => "lowest",
        };
        f.write_str(name)
    }
}

/// Deterministic identity of a [`FeedRequest`], used for de-duplication.
///
/// Derived from URL + headers + caller tag. Stable for the lifetime of the
/// process, which is all the in-memory registry needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Arc<str>);

impl Fingerprint {
    fn derive(url: &str, headers: &[FeedHeader], tag: Option<&str>) -> Self {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        for header in headers {
            header.name.hash(&mut hasher);
            header.value.hash(&mut hasher);
        }
        if let Some(tag) = tag {
            tag.hash(&mut hasher);
        }
        let digest = hasher.finish();
        let rendered = match tag {
            Some(tag) => format!("{tag}-{digest:016x}"),
            None => format!("{digest:016x}"),
        };
        Fingerprint(rendered.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One HTTP header pair. Order is preserved and duplicates are allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedHeader {
    pub name: String,
    pub value: String,
}

impl FeedHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Self-repeating pull schedule: interval between pulls, random jitter added
/// on top of each interval, and an optional cap on the number of pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    pub jitter: Duration,
    pub max_pulls: Option<u32>,
}

impl Schedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            jitter: Duration::ZERO,
            max_pulls: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_pulls(mut self, max_pulls: u32) -> Self {
        self.max_pulls = Some(max_pulls);
        self
    }
}

/// Immutable description of one feed pull.
#[derive(Clone)]
pub struct FeedRequest {
    url: String,
    host: String,
    port: u16,
    headers: Vec<FeedHeader>,
    priority: FeedPriority,
    fingerprint: Fingerprint,
    schedule: Option<Schedule>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl FeedRequest {
    pub fn builder(url: impl Into<String>) -> FeedRequestBuilder {
        FeedRequestBuilder::new(url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn headers(&self) -> &[FeedHeader] {
        &self.headers
    }

    pub fn priority(&self) -> FeedPriority {
        self.priority
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    /// Per-request override for the engine-wide retry policy.
    pub fn retry_policy(&self) -> Option<&Arc<dyn RetryPolicy>> {
        self.retry_policy.as_ref()
    }

    /// Returns a copy of this request with a periodic schedule attached.
    /// The fingerprint is unaffected; identity does not depend on timing.
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Short one-line description used in log lines.
    pub fn basic_info(&self) -> String {
        format!("[{} {} {}]", self.priority, self.fingerprint, self.url)
    }
}

impl fmt::Debug for FeedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedRequest")
            .field("url", &self.url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("priority", &self.priority)
            .field("fingerprint", &self.fingerprint)
            .field("headers", &self.headers.len())
            .field("schedule", &self.schedule)
            .finish()
    }
}

/// Fluent constructor for [`FeedRequest`].
pub struct FeedRequestBuilder {
    url: String,
    host: Option<String>,
    port: Option<u16>,
    headers: Vec<FeedHeader>,
    priority: FeedPriority,
    tag: Option<String>,
    schedule: Option<Schedule>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl FeedRequestBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            host: None,
            port: None,
            headers: Vec::new(),
            priority: FeedPriority::Medium,
            tag: None,
            schedule: None,
            retry_policy: None,
        }
    }

    /// Overrides the host resolved from the URL.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Overrides the port resolved from the URL.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Appends one header. May be called repeatedly; duplicates are kept.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(FeedHeader::new(name, value));
        self
    }

    pub fn priority(mut self, priority: FeedPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Caller-supplied tag mixed into the fingerprint, so the same URL can be
    /// tracked as distinct requests by different consumers.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Finalises the request, resolving host and port from the URL when they
    /// were not set explicitly.
    pub fn build(self) -> Result<FeedRequest, ProgrammingError> {
        let (host, port) = match (self.host, self.port) {
            (Some(host), Some(port)) => (host, port),
            (host, port) => {
                let parsed = Url::parse(&self.url).map_err(|e| {
                    ProgrammingError::new(format!(
                        "request url {:?} is not absolute and no host/port were given: {e}",
                        self.url
                    ))
                })?;
                let resolved_host = match host.or_else(|| parsed.host_str().map(str::to_owned)) {
                    Some(h) => h,
                    None => {
                        return Err(ProgrammingError::new(format!(
                            "request url {:?} has no host",
                            self.url
                        )))
                    }
                };
                let resolved_port = port
                    .or_else(|| parsed.port_or_known_default())
                    .unwrap_or(80);
                (resolved_host, resolved_port)
            }
        };

        let fingerprint = Fingerprint::derive(&self.url, &self.headers, self.tag.as_deref());
        Ok(FeedRequest {
            url: self.url,
            host,
            port,
            headers: self.headers,
            priority: self.priority,
            fingerprint,
            schedule: self.schedule,
            retry_policy: self.retry_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> FeedRequest {
        FeedRequest::builder(url).build().unwrap()
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = request("https://feeds.example.com/match/42");
        let b = request("https://feeds.example.com/match/42");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_depends_on_url_headers_and_tag() {
        let base = request("https://feeds.example.com/match/42");
        let other_url = request("https://feeds.example.com/match/43");
        assert_ne!(base.fingerprint(), other_url.fingerprint());

        let with_header = FeedRequest::builder("https://feeds.example.com/match/42")
            .header("X-Auth", "secret")
            .build()
            .unwrap();
        assert_ne!(base.fingerprint(), with_header.fingerprint());

        let tagged = FeedRequest::builder("https://feeds.example.com/match/42")
            .tag("results")
            .build()
            .unwrap();
        assert_ne!(base.fingerprint(), tagged.fingerprint());
        assert!(tagged.fingerprint().as_str().starts_with("results-"));
    }

    #[test]
    fn host_and_port_resolved_from_url() {
        let req = request("https://feeds.example.com/match/42");
        assert_eq!(req.host(), "feeds.example.com");
        assert_eq!(req.port(), 443);

        let explicit = FeedRequest::builder("/match/42")
            .host("10.0.0.7")
            .port(8081)
            .build()
            .unwrap();
        assert_eq!(explicit.host(), "10.0.0.7");
        assert_eq!(explicit.port(), 8081);
    }

    #[test]
    fn relative_url_without_host_is_rejected() {
        assert!(FeedRequest::builder("/match/42").build().is_err());
    }

    #[test]
    fn schedule_does_not_change_identity() {
        let base = request("https://feeds.example.com/match/42");
        let periodic = base
            .clone()
            .with_schedule(Schedule::every(Duration::from_millis(100)));
        assert_eq!(base.fingerprint(), periodic.fingerprint());
        assert!(periodic.schedule().is_some());
    }

    #[test]
    fn duplicate_headers_are_kept_in_order() {
        let req = FeedRequest::builder("https://feeds.example.com/live")
            .header("Accept", "application/xml")
            .header("Accept", "text/xml")
            .build()
            .unwrap();
        assert_eq!(req.headers().len(), 2);
        assert_eq!(req.headers()[0].value, "application/xml");
        assert_eq!(req.headers()[1].value, "text/xml");
    }
}
