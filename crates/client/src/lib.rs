//! Client-side collaborators for pagelift.
//!
//! This crate provides the concrete Fetcher (conditional HTTP requests) and
//! Splitter (marker-based template division) implementations consumed by
//! the cache core's revalidation coordinator, plus session key helpers.

pub mod fetch;
pub mod session;
pub mod split;

pub use fetch::{ConditionalResponse, FetchClient, FetchConfig, FetchResponse, UrlResolver, retain_cache_headers};
pub use session::derive_session_id;
pub use split::{MarkerSplitter, assemble, split_markers};
