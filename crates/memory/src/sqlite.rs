//! SQLite-backed versioned key-value store for session records.
//!
//! One table, `sessions`, keyed by session key with an integer `version`
//! column. Conditional writes are single statements (`INSERT ... ON CONFLICT
//! DO NOTHING`, `UPDATE ... WHERE version = ?`), so the row count tells us
//! whether we won.

use crate::versioned::VersionedKv;
use async_trait::async_trait;
use agentgraph_core::error::SessionError;
use agentgraph_core::session::SessionRecord;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteVersionedKv {
    pool: SqlitePool,
}

impl SqliteVersionedKv {
    /// Open (or create) the database at `path`, e.g. `sqlite://sessions.db`.
    pub async fn new(path: &str) -> Result<Self, SessionError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| SessionError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to open SQLite: {e}")))?;

        let kv = Self { pool };
        kv.run_migrations().await?;
        info!("SQLite session store initialized at {path}");
        Ok(kv)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, SessionError> {
        let kv = Self { pool };
        kv.run_migrations().await?;
        Ok(kv)
    }

    async fn run_migrations(&self) -> Result<(), SessionError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                key         TEXT PRIMARY KEY NOT NULL,
                user_id     TEXT NOT NULL,
                payload     TEXT NOT NULL,
                version     INTEGER NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Storage(format!("sessions table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(format!("user_id index: {e}")))?;

        debug!("SQLite session migrations complete");
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord, SessionError> {
        let column = |name: &str, e: sqlx::Error| SessionError::Storage(format!("{name} column: {e}"));

        let key: String = row.try_get("key").map_err(|e| column("key", e))?;
        let user_id: String = row.try_get("user_id").map_err(|e| column("user_id", e))?;
        let payload_json: String = row.try_get("payload").map_err(|e| column("payload", e))?;
        let version: i64 = row.try_get("version").map_err(|e| column("version", e))?;
        let created_at_str: String = row.try_get("created_at").map_err(|e| column("created_at", e))?;
        let updated_at_str: String = row.try_get("updated_at").map_err(|e| column("updated_at", e))?;

        let payload = serde_json::from_str(&payload_json)
            .map_err(|e| SessionError::Storage(format!("payload for {key} is not JSON: {e}")))?;

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(SessionRecord {
            key,
            user_id,
            payload,
            version: version as u64,
            created_at,
            updated_at,
        })
    }
}

#[async_trait]
impl VersionedKv for SqliteVersionedKv {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn watch(&self, key: &str) -> Result<Option<SessionRecord>, SessionError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(format!("SELECT failed: {e}")))?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn compare_and_write(
        &self,
        expected: Option<u64>,
        mut record: SessionRecord,
    ) -> Result<SessionRecord, SessionError> {
        let payload_json = serde_json::to_string(&record.payload)
            .map_err(|e| SessionError::Storage(format!("Payload serialization: {e}")))?;
        record.version = expected.map_or(1, |v| v + 1);

        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO sessions (key, user_id, payload, version, created_at, updated_at)
                    VALUES (?1, ?2, ?3, 1, ?4, ?5)
                    ON CONFLICT(key) DO NOTHING
                    "#,
                )
                .bind(&record.key)
                .bind(&record.user_id)
                .bind(&payload_json)
                .bind(record.created_at.to_rfc3339())
                .bind(record.updated_at.to_rfc3339())
                .execute(&self.pool)
                .await
            }
            Some(seen) => {
                sqlx::query(
                    r#"
                    UPDATE sessions
                    SET user_id = ?1, payload = ?2, version = ?3, updated_at = ?4
                    WHERE key = ?5 AND version = ?6
                    "#,
                )
                .bind(&record.user_id)
                .bind(&payload_json)
                .bind(record.version as i64)
                .bind(record.updated_at.to_rfc3339())
                .bind(&record.key)
                .bind(seen as i64)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(|e| SessionError::Storage(format!("Conditional write failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(SessionError::Conflict { key: record.key });
        }
        Ok(record)
    }

    async fn compare_and_delete(&self, key: &str, expected: u64) -> Result<(), SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE key = ?1 AND version = ?2")
            .bind(key)
            .bind(expected as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(format!("DELETE failed: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(SessionError::Conflict { key: key.to_string() });
        }
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>, SessionError> {
        let rows = sqlx::query("SELECT * FROM sessions WHERE user_id = ?1 ORDER BY key")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(format!("List failed: {e}")))?;
        rows.iter().map(Self::row_to_record).collect()
    }
}
