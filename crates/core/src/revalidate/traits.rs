//! Collaborator seams consumed by the revalidation coordinator.
//!
//! The coordinator only ever talks to the network, the HTML splitter, and
//! the durable store through these traits, so implementations can be
//! swapped without touching the cache core (and mocked in tests).

use crate::Error;
use crate::cache::{ConfigMap, DynamicData, HeaderMap};
use async_trait::async_trait;

/// Result of a conditional fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The server confirmed the cached content is still valid. Some servers
    /// refresh validator headers on a 304, so they are passed along.
    NotModified { headers: Option<HeaderMap> },
    /// A fresh full payload, with the cache-relevant response headers.
    Fresh { payload: Vec<u8>, headers: HeaderMap },
}

/// Network transport for page payloads.
///
/// `validators` carries the entry's cached response headers (entity tag,
/// last-modified marker) so the server can answer "not modified" without
/// resending the payload. Must be safe to call concurrently for different
/// session ids.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, session_id: &str, validators: &HeaderMap) -> Result<FetchOutcome, Error>;
}

/// Template and dynamic data derived from one full payload.
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub template: String,
    pub dynamic_data: DynamicData,
}

/// Divides a full HTML payload into a static template and the dynamic
/// fields inside it. Pure with respect to the core: no shared state.
pub trait Splitter: Send + Sync {
    fn split(&self, payload: &[u8]) -> Result<SplitOutcome, Error>;
}

/// A session's durably persisted pieces.
#[derive(Debug, Clone)]
pub struct PersistedSession {
    pub template: String,
    pub headers: HeaderMap,
    pub config: ConfigMap,
}

/// Durable storage for templates and their metadata.
///
/// The coordinator persists after a successful commit and treats success as
/// the trigger for the entry's `has_local_cache` flag; `load` only ever
/// seeds a fresh entry, never overrides a live one.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn persist(
        &self, session_id: &str, template: &str, headers: &HeaderMap, config: &ConfigMap,
    ) -> Result<(), Error>;

    async fn load(&self, session_id: &str) -> Result<Option<PersistedSession>, Error>;

    /// Drop the durable copy. Removing an absent session is a no-op.
    async fn remove(&self, session_id: &str) -> Result<(), Error>;
}
