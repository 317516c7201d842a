//! Session store capability — agent/session metadata with optimistic locking.
//!
//! Several writers may race to create, update or delete the same record, so
//! every write is conditional on the version observed when the key was read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::SessionError;

/// A stored session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The key the record was actually written under.
    pub key: String,

    /// Owner of the session
    pub user_id: String,

    /// Opaque session payload (agent profile, checkpoint pointer, ...)
    pub payload: serde_json::Value,

    /// Incremented on every successful write; starts at 1.
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A payload mutation applied under the optimistic lock; may run more than
/// once if the record changes between read and write.
pub type SessionMutation<'a> = &'a (dyn Fn(&mut serde_json::Value) + Send + Sync);

/// Session metadata store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "sqlite").
    fn name(&self) -> &str;

    /// Create a record. If `key` is taken (or gets taken concurrently) the
    /// store retries under a derived key; the returned record carries the key
    /// that won.
    async fn save(
        &self,
        key: &str,
        user_id: &str,
        payload: serde_json::Value,
    ) -> std::result::Result<SessionRecord, SessionError>;

    async fn get(&self, key: &str) -> std::result::Result<Option<SessionRecord>, SessionError>;

    /// Read-modify-write the payload under the optimistic lock.
    async fn update(
        &self,
        key: &str,
        mutate: SessionMutation<'_>,
    ) -> std::result::Result<SessionRecord, SessionError>;

    /// Delete a record. Returns `false` if it did not exist.
    async fn delete(&self, key: &str) -> std::result::Result<bool, SessionError>;

    /// All records owned by `user_id`, ordered by key.
    async fn list(&self, user_id: &str) -> std::result::Result<Vec<SessionRecord>, SessionError>;
}
