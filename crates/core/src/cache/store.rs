//! Session-id → entry map with per-session serialization.
//!
//! The store is the only component that creates, replaces, or evicts
//! entries, so exactly one live [`CacheEntry`] exists per session id at any
//! time. The map itself is sharded (dashmap), keeping `get_or_create` and
//! `evict` atomic without a global lock; each entry sits behind its own
//! async mutex so commits for one session are mutually exclusive while
//! unrelated sessions proceed in parallel.

use super::entry::{CacheEntry, EntrySnapshot};
use crate::Error;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to one session's live entry.
pub type EntryHandle = Arc<Mutex<CacheEntry>>;

/// Owns the session-id → [`CacheEntry`] mapping.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: DashMap<String, EntryHandle>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Return the existing entry for a session or atomically create one.
    ///
    /// Concurrent callers always receive handles to the same single entry;
    /// the read-modify-insert happens under the map's shard lock.
    pub fn get_or_create(&self, session_id: &str) -> EntryHandle {
        self.entries
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CacheEntry::new(session_id))))
            .clone()
    }

    /// Remove and discard a session's entry. Evicting an absent id is a
    /// no-op; returns whether an entry was actually removed.
    pub fn evict(&self, session_id: &str) -> bool {
        let removed = self.entries.remove(session_id).is_some();
        if removed {
            tracing::debug!("evicted cache entry for session {}", session_id);
        }
        removed
    }

    /// Immutable copy of a session's fields for read-only consumers.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no entry exists for the session id.
    pub async fn snapshot(&self, session_id: &str) -> Result<EntrySnapshot, Error> {
        let handle = self
            .entries
            .get(session_id)
            .map(|e| e.clone())
            .ok_or_else(|| Error::NotFound(session_id.to_string()))?;
        let entry = handle.lock().await;
        Ok(entry.snapshot())
    }

    /// Persistence-commit path: record that the session's template now has
    /// a durable local copy.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no entry exists for the session id.
    pub async fn mark_persisted(&self, session_id: &str) -> Result<(), Error> {
        let handle = self
            .entries
            .get(session_id)
            .map(|e| e.clone())
            .ok_or_else(|| Error::NotFound(session_id.to_string()))?;
        handle.lock().await.mark_persisted();
        Ok(())
    }

    /// Evict least-recently-refreshed entries until at most `max_entries`
    /// remain. Entries that never committed count as coldest. Returns the
    /// number of evicted sessions.
    pub async fn trim_to(&self, max_entries: usize) -> usize {
        if self.entries.len() <= max_entries {
            return 0;
        }

        // Collect handles first; locking entries while holding dashmap
        // shard guards would risk deadlock against concurrent commits.
        let handles: Vec<(String, EntryHandle)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut by_age = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let last = handle.lock().await.last_refresh_time();
            by_age.push((last, id));
        }
        by_age.sort();

        let excess = by_age.len().saturating_sub(max_entries);
        let mut evicted = 0;
        for (_, id) in by_age.into_iter().take(excess) {
            if self.evict(&id) {
                evicted += 1;
            }
        }
        tracing::debug!("trimmed {} cache entries to cap {}", evicted, max_entries);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of all live sessions, in no particular order.
    pub fn session_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}
