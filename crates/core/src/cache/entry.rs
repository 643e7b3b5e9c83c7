//! Versioned per-session cache state.
//!
//! A [`CacheEntry`] holds everything the cache knows about one session: the
//! last full HTML payload, the static template, the server-confirmed dynamic
//! fields, the diff against the previous confirmed version, cached response
//! headers used as revalidation validators, and pass-through config.
//!
//! The entry is pure data plus invariant enforcement; it does no I/O. All
//! mutation funnels through [`CacheEntry::apply_update`] (full refresh),
//! [`CacheEntry::touch_refreshed`] (not-modified refresh),
//! [`CacheEntry::seed`] (load a persisted copy into a fresh entry), and
//! [`CacheEntry::mark_persisted`] (persistence-commit path).

use super::diff::{self, DiffData, DynamicData};
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Config key under which the template digest is stored.
pub const TEMPLATE_TAG_KEY: &str = "template-tag";

/// Selected HTTP headers cached for conditional revalidation, name → value.
pub type HeaderMap = BTreeMap<String, String>;

/// Opaque cache/control directives carried alongside the entry.
pub type ConfigMap = BTreeMap<String, String>;

/// Digest identifying a template version.
pub fn template_tag(template: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(template.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fields proposed by one revalidation refresh.
///
/// Optional fields left as `None` keep the entry's current value;
/// `dynamic_data` is always replaced wholesale so the diff is recomputed,
/// never incrementally patched.
#[derive(Debug, Clone, Default)]
pub struct UpdatePayload {
    /// Session the update was produced for. Must match the entry.
    pub session_id: String,
    /// Full HTML response body, when the fetch returned one.
    pub raw_payload: Option<Vec<u8>>,
    /// New template, when the splitter produced one.
    pub template: Option<String>,
    /// New server-confirmed dynamic fields.
    pub dynamic_data: DynamicData,
    /// Refreshed response headers.
    pub response_headers: Option<HeaderMap>,
    /// Refreshed config directives.
    pub config: Option<ConfigMap>,
    /// True when the persistent store already durably holds this update.
    pub persisted: bool,
}

/// Result of an accepted commit.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    /// The entry's new `last_refresh_time`.
    pub committed_at: DateTime<Utc>,
    /// Diff against the previously confirmed dynamic data.
    pub diff: DiffData,
}

/// Immutable copy of an entry's fields for read-only consumers.
///
/// Renderers take snapshots instead of live entries so concurrent commits
/// can never tear a read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub session_id: String,
    pub raw_payload: Option<Vec<u8>>,
    pub template: Option<String>,
    pub dynamic_data: DynamicData,
    pub diff_data: DiffData,
    pub has_local_cache: bool,
    pub last_refresh_time: Option<DateTime<Utc>>,
    pub response_headers: HeaderMap,
    pub config: ConfigMap,
}

/// Versioned state for one session.
#[derive(Debug)]
pub struct CacheEntry {
    session_id: String,
    raw_payload: Option<Vec<u8>>,
    template: Option<String>,
    dynamic_data: DynamicData,
    diff_data: DiffData,
    has_local_cache: bool,
    last_refresh_time: Option<DateTime<Utc>>,
    response_headers: HeaderMap,
    config: ConfigMap,
}

impl CacheEntry {
    /// Create an empty entry for a session id.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            raw_payload: None,
            template: None,
            dynamic_data: DynamicData::new(),
            diff_data: DiffData::new(),
            has_local_cache: false,
            last_refresh_time: None,
            response_headers: HeaderMap::new(),
            config: ConfigMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub fn dynamic_data(&self) -> &DynamicData {
        &self.dynamic_data
    }

    pub fn diff_data(&self) -> &DiffData {
        &self.diff_data
    }

    pub fn has_local_cache(&self) -> bool {
        self.has_local_cache
    }

    pub fn last_refresh_time(&self) -> Option<DateTime<Utc>> {
        self.last_refresh_time
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    /// True once at least one update has been committed.
    pub fn has_committed(&self) -> bool {
        self.last_refresh_time.is_some()
    }

    /// Atomically replace the mutable fields with a refresh result.
    ///
    /// Recomputes `diff_data` against the entry's prior dynamic data. The
    /// commit is all-or-nothing: a rejected update leaves every field
    /// untouched.
    ///
    /// # Errors
    ///
    /// - `InvariantViolation` when the update names a different session.
    /// - `StaleUpdate` when `started_at` is not strictly newer than the
    ///   entry's `last_refresh_time` (an out-of-order slow response must not
    ///   clobber a newer concurrent refresh).
    pub fn apply_update(&mut self, update: UpdatePayload, started_at: DateTime<Utc>) -> Result<CommitReceipt, Error> {
        if update.session_id != self.session_id {
            return Err(Error::InvariantViolation(format!(
                "update for session {} applied to entry {}",
                update.session_id, self.session_id
            )));
        }

        let committed_at = self.next_refresh_time(started_at)?;
        let diff = diff::diff(&self.dynamic_data, &update.dynamic_data);

        // All preconditions passed; mutate below this line only.
        if let Some(raw) = update.raw_payload {
            self.raw_payload = Some(raw);
        }
        if let Some(headers) = update.response_headers {
            self.response_headers = headers;
        }
        if let Some(config) = update.config {
            let tag = self.config.remove(TEMPLATE_TAG_KEY);
            self.config = config;
            if let Some(tag) = tag {
                self.config.entry(TEMPLATE_TAG_KEY.to_string()).or_insert(tag);
            }
        }
        if let Some(template) = update.template {
            self.config
                .insert(TEMPLATE_TAG_KEY.to_string(), template_tag(&template));
            self.template = Some(template);
        }
        self.dynamic_data = update.dynamic_data;
        self.diff_data = diff.clone();
        self.last_refresh_time = Some(committed_at);
        if update.persisted {
            self.has_local_cache = true;
        }

        Ok(CommitReceipt { committed_at, diff })
    }

    /// Commit a not-modified revalidation: refresh validators and the
    /// timestamp, leave template and dynamic data untouched. The diff is
    /// cleared since nothing changed this cycle.
    ///
    /// # Errors
    ///
    /// Returns `StaleUpdate` under the same ordering rule as
    /// [`CacheEntry::apply_update`].
    pub fn touch_refreshed(
        &mut self, started_at: DateTime<Utc>, refreshed_headers: Option<HeaderMap>,
    ) -> Result<DateTime<Utc>, Error> {
        let committed_at = self.next_refresh_time(started_at)?;
        if let Some(headers) = refreshed_headers {
            self.response_headers.extend(headers);
        }
        self.diff_data.clear();
        self.last_refresh_time = Some(committed_at);
        Ok(committed_at)
    }

    /// Load a previously persisted template into a fresh entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the entry already committed an update or
    /// carries a template; seeding never overrides live state.
    pub fn seed(&mut self, template: String, headers: HeaderMap, config: ConfigMap) -> Result<(), Error> {
        if self.has_committed() || self.template.is_some() {
            return Err(Error::InvalidInput(format!(
                "session {} already holds live state",
                self.session_id
            )));
        }
        self.template = Some(template);
        self.response_headers = headers;
        self.config = config;
        self.has_local_cache = true;
        Ok(())
    }

    /// Record that the persistent store durably wrote this entry's template.
    /// One-way transition; the flag only resets by evicting the entry.
    pub fn mark_persisted(&mut self) {
        self.has_local_cache = true;
    }

    /// Immutable copy of all fields.
    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            session_id: self.session_id.clone(),
            raw_payload: self.raw_payload.clone(),
            template: self.template.clone(),
            dynamic_data: self.dynamic_data.clone(),
            diff_data: self.diff_data.clone(),
            has_local_cache: self.has_local_cache,
            last_refresh_time: self.last_refresh_time,
            response_headers: self.response_headers.clone(),
            config: self.config.clone(),
        }
    }

    /// Validate the ordering rule and pick the commit timestamp.
    ///
    /// `last_refresh_time` must strictly increase across commits; two
    /// commits can land inside one clock tick, so the new time is bumped
    /// past the previous one when the clock has not advanced.
    fn next_refresh_time(&self, started_at: DateTime<Utc>) -> Result<DateTime<Utc>, Error> {
        let now = Utc::now();
        match self.last_refresh_time {
            Some(last) if started_at <= last => Err(Error::StaleUpdate(format!(
                "session {}: refresh started at {} but entry committed at {}",
                self.session_id, started_at, last
            ))),
            Some(last) if now <= last => Ok(last + chrono::Duration::microseconds(1)),
            _ => Ok(now),
        }
    }
}
