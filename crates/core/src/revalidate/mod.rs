//! Revalidation orchestration.
//!
//! One revalidation attempt runs the cycle
//! `Requesting → (NotModified | Refreshing) → Committing → Done`: a
//! conditional fetch with the entry's cached validators, an optional
//! template/dynamic-data split, a diff-producing commit, and a persistence
//! write. Failures leave the entry at its last good, fully-committed state.
//!
//! Concurrency: a per-session gate disallows redundant concurrent fetches
//! for one session. A second caller queues on the gate and, once through,
//! returns [`RevalidationOutcome::Coalesced`] when the in-flight attempt
//! already refreshed the entry past the caller's start time. Commits obey
//! the ordering rule enforced by the entry itself: an attempt that started
//! at or before the entry's `last_refresh_time` is rejected and surfaces as
//! [`RevalidationOutcome::Superseded`].
//!
//! Cancellation: dropping the `revalidate` future before the commit section
//! leaves the entry untouched; the commit runs under the entry lock without
//! awaiting collaborators, so once entered it completes.

pub mod traits;

use crate::Error;
use crate::cache::{CacheStore, DiffData, EntrySnapshot, UpdatePayload};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use traits::{FetchOutcome, Fetcher, PersistedSession, PersistentStore, SplitOutcome, Splitter};

/// Terminal result of one revalidation attempt.
#[derive(Debug, Clone)]
pub enum RevalidationOutcome {
    /// Server confirmed the cached content; only validators and the
    /// refresh timestamp moved.
    NotModified,
    /// A fresh payload was committed; `diff` holds the changed fields.
    Refreshed { diff: DiffData },
    /// A concurrent attempt for the same session refreshed the entry while
    /// this one waited; no fetch was issued.
    Coalesced,
    /// The commit lost the ordering race to a newer refresh and was
    /// discarded.
    Superseded,
    /// Fetch or split failed; the last good cached state stands.
    FellBack { reason: String },
}

/// Outcome plus the entry's post-attempt state.
#[derive(Debug, Clone)]
pub struct RevalidationReport {
    pub session_id: String,
    pub outcome: RevalidationOutcome,
    pub snapshot: EntrySnapshot,
}

/// Drives refresh cycles against a [`CacheStore`] through the collaborator
/// seams in [`traits`].
pub struct RevalidationCoordinator {
    store: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    splitter: Arc<dyn Splitter>,
    persistence: Arc<dyn PersistentStore>,
    gates: DashMap<String, Arc<Mutex<()>>>,
}

impl RevalidationCoordinator {
    pub fn new(
        store: Arc<CacheStore>, fetcher: Arc<dyn Fetcher>, splitter: Arc<dyn Splitter>,
        persistence: Arc<dyn PersistentStore>,
    ) -> Self {
        Self { store, fetcher, splitter, persistence, gates: DashMap::new() }
    }

    /// The store this coordinator commits into.
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Ensure a session has a live entry, seeding it from the persistent
    /// store when one exists and the entry is brand new.
    ///
    /// A load failure only logs: a missing or unreadable durable copy means
    /// starting cold, not failing the session.
    pub async fn prepare(&self, session_id: &str) -> Result<EntrySnapshot, Error> {
        let handle = self.store.get_or_create(session_id);
        let mut entry = handle.lock().await;

        if !entry.has_committed() && entry.template().is_none() && !entry.has_local_cache() {
            match self.persistence.load(session_id).await {
                Ok(Some(persisted)) => {
                    entry.seed(persisted.template, persisted.headers, persisted.config)?;
                    tracing::debug!("seeded session {} from persisted copy", session_id);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("failed to load persisted copy for {}: {}", session_id, e);
                }
            }
        }

        Ok(entry.snapshot())
    }

    /// Run one revalidation attempt for a session.
    ///
    /// # Errors
    ///
    /// Collaborator failures propagate only when the entry holds no
    /// committed or seeded state to fall back on; otherwise the report
    /// carries [`RevalidationOutcome::FellBack`] with the last good
    /// snapshot.
    pub async fn revalidate(&self, session_id: &str) -> Result<RevalidationReport, Error> {
        let started_at = Utc::now();

        let gate = self
            .gates
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _in_flight = gate.lock().await;

        let before = self.prepare(session_id).await?;

        // An attempt that finished while we queued on the gate already
        // refreshed the entry; don't fetch again.
        if before.last_refresh_time.is_some_and(|t| t > started_at) {
            tracing::debug!("revalidation for {} coalesced into an earlier attempt", session_id);
            return Ok(RevalidationReport {
                session_id: session_id.to_string(),
                outcome: RevalidationOutcome::Coalesced,
                snapshot: before,
            });
        }

        let fetched = match self.fetcher.fetch(session_id, &before.response_headers).await {
            Ok(outcome) => outcome,
            Err(e) => return self.fall_back(session_id, &before, e).await,
        };

        let handle = self.store.get_or_create(session_id);
        match fetched {
            FetchOutcome::NotModified { headers } => {
                let mut entry = handle.lock().await;
                match entry.touch_refreshed(started_at, headers) {
                    Ok(_) => {
                        tracing::debug!("session {} not modified", session_id);
                        Ok(self.report(session_id, RevalidationOutcome::NotModified, entry.snapshot()))
                    }
                    Err(Error::StaleUpdate(reason)) => {
                        tracing::debug!("discarding stale refresh for {}: {}", session_id, reason);
                        Ok(self.report(session_id, RevalidationOutcome::Superseded, entry.snapshot()))
                    }
                    Err(e) => Err(e),
                }
            }
            FetchOutcome::Fresh { payload, headers } => {
                let split = match self.splitter.split(&payload) {
                    Ok(split) => split,
                    Err(e) => return self.fall_back(session_id, &before, e).await,
                };

                let update = UpdatePayload {
                    session_id: session_id.to_string(),
                    raw_payload: Some(payload),
                    template: Some(split.template),
                    dynamic_data: split.dynamic_data,
                    response_headers: Some(headers),
                    config: None,
                    persisted: false,
                };

                let (receipt, committed) = {
                    let mut entry = handle.lock().await;
                    match entry.apply_update(update, started_at) {
                        Ok(receipt) => (receipt, entry.snapshot()),
                        Err(Error::StaleUpdate(reason)) => {
                            tracing::debug!("discarding stale refresh for {}: {}", session_id, reason);
                            return Ok(self.report(session_id, RevalidationOutcome::Superseded, entry.snapshot()));
                        }
                        Err(e) => return Err(e),
                    }
                };

                self.persist_committed(session_id, &committed).await;

                let snapshot = self.store.snapshot(session_id).await?;
                tracing::info!(
                    "session {} refreshed, {} field(s) changed",
                    session_id,
                    receipt.diff.len()
                );
                Ok(self.report(session_id, RevalidationOutcome::Refreshed { diff: receipt.diff }, snapshot))
            }
        }
    }

    /// Full eviction: drop the live entry, its gate, and the durable copy.
    pub async fn evict(&self, session_id: &str) -> Result<(), Error> {
        self.store.evict(session_id);
        self.gates.remove(session_id);
        self.persistence.remove(session_id).await
    }

    /// Durably write a committed template, then flip the entry's
    /// `has_local_cache` flag. Persistence failure keeps the in-memory
    /// commit and leaves the flag unset for a later attempt.
    async fn persist_committed(&self, session_id: &str, committed: &EntrySnapshot) {
        let Some(template) = committed.template.as_deref() else {
            return;
        };
        match self
            .persistence
            .persist(session_id, template, &committed.response_headers, &committed.config)
            .await
        {
            Ok(()) => {
                if let Err(e) = self.store.mark_persisted(session_id).await {
                    tracing::debug!("entry for {} evicted before persist completed: {}", session_id, e);
                }
            }
            Err(e) => {
                tracing::warn!("failed to persist template for {}: {}", session_id, e);
            }
        }
    }

    async fn fall_back(
        &self, session_id: &str, before: &EntrySnapshot, error: Error,
    ) -> Result<RevalidationReport, Error> {
        if before.last_refresh_time.is_none() && before.template.is_none() {
            return Err(error);
        }
        tracing::warn!("revalidation for {} failed, serving cached state: {}", session_id, error);
        Ok(self.report(
            session_id,
            RevalidationOutcome::FellBack { reason: error.to_string() },
            before.clone(),
        ))
    }

    fn report(&self, session_id: &str, outcome: RevalidationOutcome, snapshot: EntrySnapshot) -> RevalidationReport {
        RevalidationReport { session_id: session_id.to_string(), outcome, snapshot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ConfigMap, DynamicData, HeaderMap};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Scripted fetcher: pops outcomes front-to-back and can sleep to keep
    /// a fetch in flight.
    struct ScriptedFetcher {
        outcomes: std::sync::Mutex<Vec<Result<FetchOutcome, Error>>>,
        delay: Duration,
    }

    impl ScriptedFetcher {
        fn new(outcomes: Vec<Result<FetchOutcome, Error>>) -> Self {
            Self { outcomes: std::sync::Mutex::new(outcomes), delay: Duration::ZERO }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, _session_id: &str, _validators: &HeaderMap) -> Result<FetchOutcome, Error> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                return Err(Error::FetchFailed("script exhausted".into()));
            }
            outcomes.remove(0)
        }
    }

    /// Splitter for payloads that are JSON maps of dynamic fields.
    struct JsonSplitter;

    impl Splitter for JsonSplitter {
        fn split(&self, payload: &[u8]) -> Result<SplitOutcome, Error> {
            let dynamic_data: DynamicData =
                serde_json::from_slice(payload).map_err(|e| Error::SplitFailed(e.to_string()))?;
            Ok(SplitOutcome { template: "<html>{title}</html>".to_string(), dynamic_data })
        }
    }

    #[derive(Default)]
    struct MemoryPersistence {
        sessions: tokio::sync::Mutex<HashMap<String, PersistedSession>>,
    }

    #[async_trait]
    impl PersistentStore for MemoryPersistence {
        async fn persist(
            &self, session_id: &str, template: &str, headers: &HeaderMap, config: &ConfigMap,
        ) -> Result<(), Error> {
            self.sessions.lock().await.insert(
                session_id.to_string(),
                PersistedSession {
                    template: template.to_string(),
                    headers: headers.clone(),
                    config: config.clone(),
                },
            );
            Ok(())
        }

        async fn load(&self, session_id: &str) -> Result<Option<PersistedSession>, Error> {
            Ok(self.sessions.lock().await.get(session_id).cloned())
        }

        async fn remove(&self, session_id: &str) -> Result<(), Error> {
            self.sessions.lock().await.remove(session_id);
            Ok(())
        }
    }

    fn fresh(fields: &[(&str, &str)]) -> Result<FetchOutcome, Error> {
        let map: DynamicData = fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Ok(FetchOutcome::Fresh {
            payload: serde_json::to_vec(&map).unwrap(),
            headers: HeaderMap::from([("etag".to_string(), "\"v1\"".to_string())]),
        })
    }

    fn coordinator(fetcher: ScriptedFetcher) -> RevalidationCoordinator {
        RevalidationCoordinator::new(
            Arc::new(CacheStore::new()),
            Arc::new(fetcher),
            Arc::new(JsonSplitter),
            Arc::new(MemoryPersistence::default()),
        )
    }

    #[tokio::test]
    async fn test_fresh_fetch_commits_and_persists() {
        let coord = coordinator(ScriptedFetcher::new(vec![fresh(&[("title", "A")])]));
        let report = coord.revalidate("s1").await.unwrap();

        let RevalidationOutcome::Refreshed { diff } = &report.outcome else {
            panic!("expected Refreshed, got {:?}", report.outcome);
        };
        assert_eq!(diff.len(), 1);
        assert_eq!(report.snapshot.dynamic_data.get("title").unwrap(), "A");
        assert!(report.snapshot.has_local_cache);
        assert_eq!(report.snapshot.response_headers.get("etag").unwrap(), "\"v1\"");
    }

    #[tokio::test]
    async fn test_not_modified_touches_timestamp_only() {
        let coord = coordinator(ScriptedFetcher::new(vec![
            fresh(&[("title", "A")]),
            Ok(FetchOutcome::NotModified { headers: None }),
        ]));

        coord.revalidate("s1").await.unwrap();
        let first = coord.store().snapshot("s1").await.unwrap();

        let report = coord.revalidate("s1").await.unwrap();
        assert!(matches!(report.outcome, RevalidationOutcome::NotModified));
        assert!(report.snapshot.diff_data.is_empty());
        assert_eq!(report.snapshot.dynamic_data, first.dynamic_data);
        assert!(report.snapshot.last_refresh_time > first.last_refresh_time);
    }

    #[tokio::test]
    async fn test_fetch_error_with_no_cached_state_propagates() {
        let coord = coordinator(ScriptedFetcher::new(vec![Err(Error::FetchTimeout("slow origin".into()))]));
        let err = coord.revalidate("s1").await.unwrap_err();
        assert!(matches!(err, Error::FetchTimeout(_)));
    }

    #[tokio::test]
    async fn test_fetch_error_falls_back_to_cached_state() {
        let coord = coordinator(ScriptedFetcher::new(vec![
            fresh(&[("title", "A")]),
            Err(Error::FetchFailed("origin down".into())),
        ]));

        coord.revalidate("s1").await.unwrap();
        let report = coord.revalidate("s1").await.unwrap();

        let RevalidationOutcome::FellBack { reason } = &report.outcome else {
            panic!("expected FellBack, got {:?}", report.outcome);
        };
        assert!(reason.contains("origin down"));
        assert_eq!(report.snapshot.dynamic_data.get("title").unwrap(), "A");
    }

    #[tokio::test]
    async fn test_split_error_falls_back_to_cached_state() {
        let bad_payload = Ok(FetchOutcome::Fresh { payload: b"not json".to_vec(), headers: HeaderMap::new() });
        let coord = coordinator(ScriptedFetcher::new(vec![fresh(&[("title", "A")]), bad_payload]));

        coord.revalidate("s1").await.unwrap();
        let report = coord.revalidate("s1").await.unwrap();
        assert!(matches!(report.outcome, RevalidationOutcome::FellBack { .. }));
        assert_eq!(report.snapshot.dynamic_data.get("title").unwrap(), "A");
    }

    #[tokio::test]
    async fn test_concurrent_revalidations_coalesce_into_one_fetch() {
        let fetcher = ScriptedFetcher::new(vec![fresh(&[("title", "A")]), fresh(&[("title", "B")])])
            .with_delay(Duration::from_millis(50));
        let coord = Arc::new(coordinator(fetcher));

        let a = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.revalidate("s1").await.unwrap() })
        };
        let b = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.revalidate("s1").await.unwrap() })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        let outcomes = [&a.outcome, &b.outcome];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, RevalidationOutcome::Refreshed { .. }))
                .count(),
            1
        );
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, RevalidationOutcome::Coalesced))
                .count(),
            1
        );
        assert_eq!(a.snapshot.dynamic_data, b.snapshot.dynamic_data);
    }

    #[tokio::test]
    async fn test_out_of_order_commit_is_superseded() {
        let fetcher =
            ScriptedFetcher::new(vec![fresh(&[("title", "slow")])]).with_delay(Duration::from_millis(50));
        let coord = Arc::new(coordinator(fetcher));

        let slow = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.revalidate("s1").await.unwrap() })
        };

        // While the slow fetch is in flight, a newer refresh commits
        // directly against the entry.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let handle = coord.store().get_or_create("s1");
        {
            let mut entry = handle.lock().await;
            let update = UpdatePayload {
                session_id: "s1".to_string(),
                dynamic_data: DynamicData::from([("title".to_string(), "newer".to_string())]),
                ..Default::default()
            };
            entry.apply_update(update, Utc::now()).unwrap();
        }

        let report = slow.await.unwrap();
        assert!(matches!(report.outcome, RevalidationOutcome::Superseded));
        assert_eq!(report.snapshot.dynamic_data.get("title").unwrap(), "newer");
    }

    #[tokio::test]
    async fn test_prepare_seeds_fresh_entry_from_persistence() {
        let persistence = Arc::new(MemoryPersistence::default());
        persistence
            .persist(
                "s1",
                "<html>{title}</html>",
                &HeaderMap::from([("etag".to_string(), "\"v7\"".to_string())]),
                &ConfigMap::new(),
            )
            .await
            .unwrap();

        let coord = RevalidationCoordinator::new(
            Arc::new(CacheStore::new()),
            Arc::new(ScriptedFetcher::new(vec![])),
            Arc::new(JsonSplitter),
            persistence,
        );

        let snap = coord.prepare("s1").await.unwrap();
        assert_eq!(snap.template.as_deref(), Some("<html>{title}</html>"));
        assert!(snap.has_local_cache);
        assert_eq!(snap.response_headers.get("etag").unwrap(), "\"v7\"");

        // A second prepare must not reload over the live entry.
        let again = coord.prepare("s1").await.unwrap();
        assert_eq!(again.template, snap.template);
    }

    #[tokio::test]
    async fn test_seeded_validators_reach_the_fetcher() {
        struct ValidatorAssertingFetcher;

        #[async_trait]
        impl Fetcher for ValidatorAssertingFetcher {
            async fn fetch(&self, _session_id: &str, validators: &HeaderMap) -> Result<FetchOutcome, Error> {
                assert_eq!(validators.get("etag").map(String::as_str), Some("\"v7\""));
                Ok(FetchOutcome::NotModified { headers: None })
            }
        }

        let persistence = Arc::new(MemoryPersistence::default());
        persistence
            .persist(
                "s1",
                "<html>{title}</html>",
                &HeaderMap::from([("etag".to_string(), "\"v7\"".to_string())]),
                &ConfigMap::new(),
            )
            .await
            .unwrap();

        let coord = RevalidationCoordinator::new(
            Arc::new(CacheStore::new()),
            Arc::new(ValidatorAssertingFetcher),
            Arc::new(JsonSplitter),
            persistence,
        );

        let report = coord.revalidate("s1").await.unwrap();
        assert!(matches!(report.outcome, RevalidationOutcome::NotModified));
        assert_eq!(report.snapshot.template.as_deref(), Some("<html>{title}</html>"));
    }

    #[tokio::test]
    async fn test_evict_drops_live_entry_and_durable_copy() {
        let coord = coordinator(ScriptedFetcher::new(vec![fresh(&[("title", "A")])]));
        coord.revalidate("s1").await.unwrap();
        assert!(coord.store().snapshot("s1").await.is_ok());

        coord.evict("s1").await.unwrap();
        assert!(matches!(coord.store().snapshot("s1").await, Err(Error::NotFound(_))));

        // The persisted copy is gone too: a fresh prepare starts cold.
        let snap = coord.prepare("s1").await.unwrap();
        assert!(snap.template.is_none());
        assert!(!snap.has_local_cache);
    }

    #[tokio::test]
    async fn test_sequential_revalidations_fetch_each_time() {
        let fetcher = ScriptedFetcher::new(vec![fresh(&[("title", "A")]), fresh(&[("title", "B")])]);
        let coord = coordinator(fetcher);

        coord.revalidate("s1").await.unwrap();
        let report = coord.revalidate("s1").await.unwrap();

        let RevalidationOutcome::Refreshed { diff } = &report.outcome else {
            panic!("expected Refreshed, got {:?}", report.outcome);
        };
        assert_eq!(
            diff.get("title"),
            Some(&crate::cache::FieldChange::Set("B".to_string()))
        );
    }
}
