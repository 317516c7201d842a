//! Versioned key-value primitive underneath the session stores.
//!
//! Every record carries a version. Writers observe it with `watch` and make
//! their write conditional on it; a mismatch is reported as
//! [`SessionError::Conflict`] and the caller decides whether to retry.

use async_trait::async_trait;
use agentgraph_core::error::SessionError;
use agentgraph_core::session::SessionRecord;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait VersionedKv: Send + Sync {
    fn name(&self) -> &str;

    /// Read the current record (and with it, its version).
    async fn watch(&self, key: &str) -> Result<Option<SessionRecord>, SessionError>;

    /// Write `record` under `record.key` if the stored version equals
    /// `expected` (`None`: the key must not exist). The stored version becomes
    /// `expected + 1`, or 1 for a new key.
    async fn compare_and_write(
        &self,
        expected: Option<u64>,
        record: SessionRecord,
    ) -> Result<SessionRecord, SessionError>;

    /// Delete `key` if its stored version equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: u64) -> Result<(), SessionError>;

    /// All records owned by `user_id`, ordered by key.
    async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>, SessionError>;
}

/// A versioned map behind a tokio `RwLock`.
#[derive(Clone, Default)]
pub struct InMemoryVersionedKv {
    entries: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl InMemoryVersionedKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionedKv for InMemoryVersionedKv {
    fn name(&self) -> &str { "in_memory" }

    async fn watch(&self, key: &str) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn compare_and_write(
        &self,
        expected: Option<u64>,
        mut record: SessionRecord,
    ) -> Result<SessionRecord, SessionError> {
        let mut entries = self.entries.write().await;
        let current = entries.get(&record.key).map(|r| r.version);
        if current != expected {
            return Err(SessionError::Conflict { key: record.key });
        }
        record.version = expected.map_or(1, |v| v + 1);
        entries.insert(record.key.clone(), record.clone());
        Ok(record)
    }

    async fn compare_and_delete(&self, key: &str, expected: u64) -> Result<(), SessionError> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(r) if r.version == expected => {
                entries.remove(key);
                Ok(())
            }
            _ => Err(SessionError::Conflict { key: key.to_string() }),
        }
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>, SessionError> {
        let entries = self.entries.read().await;
        let mut records: Vec<SessionRecord> = entries
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}
