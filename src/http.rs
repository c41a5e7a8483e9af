//! # HTTP Module
//!
//! The transport seam of the pulling engine and its bundled `reqwest`
//! implementation.
//!
//! ## Overview
//!
//! The engine talks to the network exclusively through the [`HttpClient`]
//! trait: one async GET per call, resolving with the body on 2xx and a
//! categorised [`FetchError`] otherwise. The bundled [`ReqwestHttpClient`]
//! keeps one `reqwest::Client` per priority class in a fixed array indexed by
//! the priority discriminant, so connection-pool contention on a low class
//! never blocks a higher one.
//!
//! Results are awaited on the tokio runtime, never on transport-internal
//! worker threads, so downstream processing cannot starve HTTP reception.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{info, warn};

use crate::error::{FetchError, ProgrammingError};
use crate::request::{FeedPriority, FeedRequest};

/// Successful transport result: the 2xx status actually observed plus the
/// raw body bytes.
#[derive(Debug, Clone)]
pub struct HttpBody {
    pub status: u16,
    pub bytes: Bytes,
}

/// Asynchronous GET transport used by the engine.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Issues one GET for the request. Resolves with the body on 2xx and a
    /// categorised error otherwise.
    async fn get_async(&self, request: &FeedRequest) -> Result<HttpBody, FetchError>;

    /// Closes the transport. Idempotent; in-flight and subsequent calls fail
    /// with [`FetchError::Shutdown`].
    fn shutdown(&self);
}

/// Transport-level settings shared by all per-priority clients.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Total per-request deadline enforced by the transport.
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("feedpull/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Bundled [`HttpClient`] backed by `reqwest`, one client per priority class.
pub struct ReqwestHttpClient {
    clients: [reqwest::Client; FeedPriority::COUNT],
    closed: AtomicBool,
}

impl ReqwestHttpClient {
    pub fn new(config: &HttpClientConfig) -> Result<Self, ProgrammingError> {
        let build = || -> Result<reqwest::Client, ProgrammingError> {
            reqwest::Client::builder()
                .timeout(config.read_timeout)
                .connect_timeout(config.connect_timeout)
                .user_agent(config.user_agent.clone())
                .build()
                .map_err(|e| ProgrammingError::new(format!("failed to build http client: {e}")))
        };
        // One eagerly-built client per priority class.
        let clients = [build()?, build()?, build()?, build()?, build()?];
        Ok(Self {
            clients,
            closed: AtomicBool::new(false),
        })
    }

    fn resolve_url(request: &FeedRequest) -> String {
        if request.url().starts_with("http://") || request.url().starts_with("https://") {
            request.url().to_string()
        } else {
            format!("http://{}:{}{}", request.host(), request.port(), request.url())
        }
    }

    fn header_map(request: &FeedRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for header in request.headers() {
            match (
                HeaderName::from_str(&header.name),
                HeaderValue::from_str(&header.value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(
                    header = %header.name,
                    request = %request.basic_info(),
                    "skipping malformed http header"
                ),
            }
        }
        headers
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get_async(&self, request: &FeedRequest) -> Result<HttpBody, FetchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FetchError::Shutdown);
        }
        let client = &self.clients[request.priority().index()];
        let url = Self::resolve_url(request);

        info!(
            analytics_id = "http_client_got_accepted_rq",
            request = %request.basic_info(),
            "http client accepted new request"
        );

        let response = client
            .get(&url)
            .headers(Self::header_map(request))
            .send()
            .await
            .map_err(categorise)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(FetchError::from_status(status));
        }
        let bytes = response.bytes().await.map_err(categorise)?;
        Ok(HttpBody { status, bytes })
    }

    fn shutdown(&self) {
        // Connection pools are torn down when the clients drop with the
        // engine; marking closed is enough to fail fast meanwhile.
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn categorise(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_urls_resolve_against_host_and_port() {
        let request = FeedRequest::builder("/feeds/live.xml")
            .host("10.0.0.7")
            .port(8081)
            .build()
            .unwrap();
        assert_eq!(
            ReqwestHttpClient::resolve_url(&request),
            "http://10.0.0.7:8081/feeds/live.xml"
        );

        let absolute = FeedRequest::builder("https://feeds.example.com/live.xml")
            .build()
            .unwrap();
        assert_eq!(
            ReqwestHttpClient::resolve_url(&absolute),
            "https://feeds.example.com/live.xml"
        );
    }

    #[test]
    fn malformed_headers_are_skipped() {
        let request = FeedRequest::builder("https://feeds.example.com/live.xml")
            .header("Accept", "application/xml")
            .header("Bad Name", "value")
            .build()
            .unwrap();
        let map = ReqwestHttpClient::header_map(&request);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("accept"));
    }

    #[tokio::test]
    async fn shutdown_fails_fast() {
        let client = ReqwestHttpClient::new(&HttpClientConfig::default()).unwrap();
        client.shutdown();
        client.shutdown(); // idempotent
        let request = FeedRequest::builder("https://feeds.example.com/live.xml")
            .build()
            .unwrap();
        assert!(matches!(
            client.get_async(&request).await,
            Err(FetchError::Shutdown)
        ));
    }
}
