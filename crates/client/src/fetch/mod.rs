//! HTTP fetch pipeline with conditional-request support.
//!
//! ### Conditional Requests
//! - Sends `If-None-Match` from a cached entity tag and `If-Modified-Since`
//!   from a cached last-modified marker.
//! - Maps HTTP 304 to [`FetchOutcome::NotModified`] so the cache core can
//!   refresh validators without reprocessing the payload.
//!
//! ### Safety Gates
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable), enforced before and after the read
//!
//! ### Header Filtering
//! - Only cache-relevant response headers are kept: validators,
//!   cache-control metadata, content type, and `x-pagelift-*` control
//!   headers that carry template/config metadata.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url, header};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pagelift_core::Error;
use pagelift_core::cache::HeaderMap;
use pagelift_core::config::AppConfig;
use pagelift_core::revalidate::{FetchOutcome, Fetcher};

/// Response headers worth caching for revalidation and rendering.
const CACHE_HEADERS: &[&str] = &["etag", "last-modified", "cache-control", "expires", "content-type"];

/// Prefix for origin-controlled cache directives.
const CONTROL_HEADER_PREFIX: &str = "x-pagelift-";

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "pagelift/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,

    /// Whether to send cached validators with each request (default: true)
    pub send_validators: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "pagelift/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
            send_validators: true,
        }
    }
}

impl FetchConfig {
    /// Derive a fetch configuration from the application config.
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            send_validators: config.respect_cache_headers,
            ..Default::default()
        }
    }
}

/// A full (200) response from a conditional fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The original URL requested
    pub url: Url,
    /// The final URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status: StatusCode,
    /// Response body bytes
    pub bytes: Bytes,
    /// Cache-relevant response headers (see [`retain_cache_headers`])
    pub cache_headers: HeaderMap,
    /// When the response was received
    pub fetched_at: DateTime<Utc>,
    /// Time taken to fetch in milliseconds
    pub fetch_ms: u64,
}

/// Result of one conditional request.
#[derive(Debug, Clone)]
pub enum ConditionalResponse {
    /// HTTP 304; the cached copy stands. Carries any refreshed validators.
    NotModified { headers: HeaderMap },
    /// A full response body.
    Full(FetchResponse),
}

/// Maps a session id to the URL it caches. Session naming policy lives with
/// the caller, not the cache core.
pub type UrlResolver = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// HTTP fetch client with conditional-request support.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
    resolve_url: UrlResolver,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig, resolve_url: UrlResolver) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::FetchFailed(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config, resolve_url })
    }

    /// Issue one conditional GET.
    ///
    /// `validators` carries previously cached response headers; when
    /// `send_validators` is on, the entity tag and last-modified marker are
    /// forwarded so the origin can answer 304.
    pub async fn fetch_url(&self, url_str: &str, validators: &HeaderMap) -> Result<ConditionalResponse, Error> {
        let start = Instant::now();
        let url = Url::parse(url_str).map_err(|e| Error::InvalidInput(format!("invalid url {}: {}", url_str, e)))?;

        let mut request = self.http.get(url.as_str()).header(
            header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        );

        if self.config.send_validators {
            if let Some(etag) = validators.get("etag") {
                request = request.header(header::IF_NONE_MATCH, etag.as_str());
            }
            if let Some(modified) = validators.get("last-modified") {
                request = request.header(header::IF_MODIFIED_SINCE, modified.as_str());
            }
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::FetchTimeout(format!("{}: {}", url, e))
            } else {
                Error::FetchFailed(format!("network error: {}", e))
            }
        })?;

        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            let headers = retain_cache_headers(response.headers());
            tracing::debug!("{} not modified in {}ms", url, start.elapsed().as_millis());
            return Ok(ConditionalResponse::NotModified { headers });
        }

        if !status.is_success() {
            return Err(Error::FetchFailed(format!("status {}", status.as_u16())));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let final_url = response.url().clone();
        let cache_headers = retain_cache_headers(response.headers());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::FetchFailed(format!("failed to read response: {}", e)))?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::FetchTooLarge(format!(
                "{} bytes exceeds {}",
                bytes.len(),
                self.config.max_bytes
            )));
        }

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!("fetched {} -> {} in {}ms ({} bytes)", url, final_url, fetch_ms, bytes.len());

        Ok(ConditionalResponse::Full(FetchResponse {
            url,
            final_url,
            status,
            bytes,
            cache_headers,
            fetched_at: Utc::now(),
            fetch_ms,
        }))
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl Fetcher for FetchClient {
    async fn fetch(&self, session_id: &str, validators: &HeaderMap) -> Result<FetchOutcome, Error> {
        let url = (self.resolve_url)(session_id)
            .ok_or_else(|| Error::InvalidInput(format!("no URL registered for session {}", session_id)))?;

        match self.fetch_url(&url, validators).await? {
            ConditionalResponse::NotModified { headers } => Ok(FetchOutcome::NotModified { headers: Some(headers) }),
            ConditionalResponse::Full(response) => Ok(FetchOutcome::Fresh {
                payload: response.bytes.to_vec(),
                headers: response.cache_headers,
            }),
        }
    }
}

/// Filter a response header map down to the cache-relevant set.
///
/// Keeps validators and cache metadata plus any `x-pagelift-*` control
/// headers; names are lowercased for stable lookups.
pub fn retain_cache_headers(headers: &header::HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let name = name.as_str().to_ascii_lowercase();
        if !CACHE_HEADERS.contains(&name.as_str()) && !name.starts_with(CONTROL_HEADER_PREFIX) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            out.insert(name, value.to_string());
        }
    }
    out
}
