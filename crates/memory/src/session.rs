//! Optimistic-locking session store over a [`VersionedKv`].

use async_trait::async_trait;
use agentgraph_core::error::SessionError;
use agentgraph_core::session::{SessionMutation, SessionRecord, SessionStore};
use chrono::Utc;
use tracing::{debug, warn};

use crate::versioned::VersionedKv;

/// Default number of attempts per operation.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Session store that retries version conflicts a bounded number of times.
pub struct OptimisticSessionStore<K> {
    kv: K,
    max_retry_attempts: u32,
}

impl<K: VersionedKv> OptimisticSessionStore<K> {
    pub fn new(kv: K) -> Self {
        Self {
            kv,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
        }
    }

    /// Set the attempt budget. Values below 1 are treated as 1.
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts.max(1);
        self
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    fn exhausted(&self, key: &str) -> SessionError {
        warn!(key, attempts = self.max_retry_attempts, "Session store retries exhausted");
        SessionError::RetriesExhausted {
            key: key.to_string(),
            attempts: self.max_retry_attempts,
        }
    }
}

/// The key tried on `attempt` (0-based) when saving under `base`.
fn derived_key(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{base}-{attempt}")
    }
}

#[async_trait]
impl<K: VersionedKv> SessionStore for OptimisticSessionStore<K> {
    fn name(&self) -> &str {
        self.kv.name()
    }

    async fn save(
        &self,
        key: &str,
        user_id: &str,
        payload: serde_json::Value,
    ) -> Result<SessionRecord, SessionError> {
        for attempt in 0..self.max_retry_attempts {
            let candidate = derived_key(key, attempt);
            if self.kv.watch(&candidate).await?.is_some() {
                debug!(key = %candidate, "Session key taken, deriving a new one");
                continue;
            }
            let now = Utc::now();
            let record = SessionRecord {
                key: candidate.clone(),
                user_id: user_id.to_string(),
                payload: payload.clone(),
                version: 0,
                created_at: now,
                updated_at: now,
            };
            match self.kv.compare_and_write(None, record).await {
                Ok(saved) => return Ok(saved),
                Err(SessionError::Conflict { .. }) => {
                    debug!(key = %candidate, "Lost create race, deriving a new key");
                }
                Err(e) => return Err(e),
            }
        }
        Err(self.exhausted(key))
    }

    async fn get(&self, key: &str) -> Result<Option<SessionRecord>, SessionError> {
        self.kv.watch(key).await
    }

    async fn update(
        &self,
        key: &str,
        mutate: SessionMutation<'_>,
    ) -> Result<SessionRecord, SessionError> {
        for attempt in 0..self.max_retry_attempts {
            let Some(current) = self.kv.watch(key).await? else {
                return Err(SessionError::NotFound(key.to_string()));
            };
            let expected = current.version;
            let mut next = current;
            mutate(&mut next.payload);
            next.updated_at = Utc::now();
            match self.kv.compare_and_write(Some(expected), next).await {
                Ok(saved) => return Ok(saved),
                Err(SessionError::Conflict { .. }) => {
                    debug!(key, attempt, "Version conflict on update, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
        Err(self.exhausted(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, SessionError> {
        for attempt in 0..self.max_retry_attempts {
            let Some(current) = self.kv.watch(key).await? else {
                return Ok(false);
            };
            match self.kv.compare_and_delete(key, current.version).await {
                Ok(()) => return Ok(true),
                Err(SessionError::Conflict { .. }) => {
                    debug!(key, attempt, "Version conflict on delete, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
        Err(self.exhausted(key))
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>, SessionError> {
        self.kv.list(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versioned::InMemoryVersionedKv;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn store() -> OptimisticSessionStore<InMemoryVersionedKv> {
        OptimisticSessionStore::new(InMemoryVersionedKv::new())
    }

    #[tokio::test]
    async fn save_get_list() {
        let store = store();
        let saved = store.save("agent:alpha", "u1", json!({"name": "alpha"})).await.unwrap();
        assert_eq!(saved.key, "agent:alpha");
        assert_eq!(saved.version, 1);

        let fetched = store.get("agent:alpha").await.unwrap().unwrap();
        assert_eq!(fetched.payload["name"], "alpha");
        assert_eq!(store.list("u1").await.unwrap().len(), 1);
        assert!(store.list("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_saves_land_under_distinct_keys() {
        let store = store();
        let (a, b) = tokio::join!(
            store.save("agent", "u1", json!({"who": "a"})),
            store.save("agent", "u1", json!({"who": "b"})),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.key, b.key);
        let mut keys = vec![a.key, b.key];
        keys.sort();
        assert_eq!(keys, vec!["agent".to_string(), "agent-1".to_string()]);
    }

    #[tokio::test]
    async fn save_with_single_attempt_on_taken_key_exhausts() {
        let store = store().with_max_retry_attempts(1);
        store.save("agent", "u1", json!(1)).await.unwrap();
        let err = store.save("agent", "u1", json!(2)).await.unwrap_err();
        assert!(matches!(err, SessionError::RetriesExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn update_applies_mutation_and_bumps_version() {
        let store = store();
        store.save("s", "u1", json!({"count": 0})).await.unwrap();
        let updated = store
            .update("s", &|payload: &mut serde_json::Value| {
                payload["count"] = json!(payload["count"].as_i64().unwrap_or(0) + 1);
            })
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.payload["count"], 1);
    }

    #[tokio::test]
    async fn update_missing_key_is_not_found() {
        let store = store();
        let err = store.update("missing", &|_: &mut serde_json::Value| {}).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = store();
        store.save("s", "u1", json!(null)).await.unwrap();
        assert!(store.delete("s").await.unwrap());
        assert!(!store.delete("s").await.unwrap());
    }

    /// Lets a competing writer bump the version before each of our first
    /// `races` conditional updates, and create the key before each of our
    /// first `create_races` conditional inserts.
    struct RacingKv {
        inner: InMemoryVersionedKv,
        races: AtomicU32,
        create_races: AtomicU32,
    }

    impl RacingKv {
        fn new(races: u32, create_races: u32) -> Self {
            Self {
                inner: InMemoryVersionedKv::new(),
                races: AtomicU32::new(races),
                create_races: AtomicU32::new(create_races),
            }
        }
    }

    #[async_trait]
    impl VersionedKv for RacingKv {
        fn name(&self) -> &str { "racing" }

        async fn watch(&self, key: &str) -> Result<Option<SessionRecord>, SessionError> {
            self.inner.watch(key).await
        }

        async fn compare_and_write(
            &self,
            expected: Option<u64>,
            record: SessionRecord,
        ) -> Result<SessionRecord, SessionError> {
            if expected.is_none() && self.create_races.load(Ordering::SeqCst) > 0 {
                self.create_races.fetch_sub(1, Ordering::SeqCst);
                let mut theirs = record.clone();
                theirs.user_id = "competitor".into();
                self.inner.compare_and_write(None, theirs).await?;
            }
            if expected.is_some() && self.races.load(Ordering::SeqCst) > 0 {
                self.races.fetch_sub(1, Ordering::SeqCst);
                if let Some(mut theirs) = self.inner.watch(&record.key).await? {
                    let seen = theirs.version;
                    theirs.payload["competing"] = json!(true);
                    self.inner.compare_and_write(Some(seen), theirs).await?;
                }
            }
            self.inner.compare_and_write(expected, record).await
        }

        async fn compare_and_delete(&self, key: &str, expected: u64) -> Result<(), SessionError> {
            self.inner.compare_and_delete(key, expected).await
        }

        async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>, SessionError> {
            self.inner.list(user_id).await
        }
    }

    #[tokio::test]
    async fn update_retries_after_conflict() {
        let store = OptimisticSessionStore::new(RacingKv::new(1, 0));
        store.save("s", "u1", json!({})).await.unwrap();
        let updated = store.update("s", &|p: &mut serde_json::Value| p["mine"] = json!(true)).await.unwrap();
        // One competing write, then ours on the re-read.
        assert_eq!(updated.version, 3);
        assert_eq!(updated.payload["mine"], true);
        assert_eq!(updated.payload["competing"], true);
    }

    #[tokio::test]
    async fn update_gives_up_when_every_attempt_races() {
        let store = OptimisticSessionStore::new(RacingKv::new(10, 0)).with_max_retry_attempts(2);
        store.save("s", "u1", json!({})).await.unwrap();
        let err = store.update("s", &|_: &mut serde_json::Value| {}).await.unwrap_err();
        assert!(matches!(err, SessionError::RetriesExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn save_moves_to_derived_key_after_losing_create_race() {
        let store = OptimisticSessionStore::new(RacingKv::new(0, 1));
        let saved = store.save("agent", "u1", json!({"who": "me"})).await.unwrap();
        assert_eq!(saved.key, "agent-1");
        assert_eq!(saved.version, 1);

        let theirs = store.get("agent").await.unwrap().unwrap();
        assert_eq!(theirs.user_id, "competitor");
        assert_eq!(store.list("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn save_with_single_attempt_exhausts_on_lost_create_race() {
        let store = OptimisticSessionStore::new(RacingKv::new(0, 1)).with_max_retry_attempts(1);
        let err = store.save("agent", "u1", json!({})).await.unwrap_err();
        assert!(matches!(err, SessionError::RetriesExhausted { attempts: 1, .. }));
        assert!(store.get("agent-1").await.unwrap().is_none());
    }
}
