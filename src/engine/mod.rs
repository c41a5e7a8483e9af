//! # Engine Module
//!
//! Implements the priority-aware pulling engine that drives feed ingestion.
//!
//! ## Overview
//!
//! The engine accepts [`crate::request::FeedRequest`]s, consults the request
//! registry to drop duplicates, gates dispatch through per-priority rate
//! limits, fetches over the [`crate::http::HttpClient`] seam with retries,
//! and emits [`crate::response::FeedResponse`]s on a hot multicast stream.
//!
//! ## Key Components
//!
//! - **PullingEngine**: the long-lived orchestrator and its command loop
//! - **Fetch Task**: the per-attempt pipeline from rate-limit token to
//!   published response
//!
//! ## Internal Components
//!
//! These are implementation details and are not typically used directly:
//! - `fetch_and_publish`: runs one dispatch attempt end to end

mod core;
mod fetch;

pub use self::core::{PullHandle, PullingEngine};
