//! # Message Store
//!
//! Durable, receiver-addressed FIFO queue backed by SQLite, mirroring the
//! original framework's `MessageDBManager` table shape exactly: a single
//! `messages` table keyed by a monotonic `AUTOINCREMENT` id, with
//! `pending`/`processed` status.
//!
//! At-least-once delivery: `get_pending` may return the same message more
//! than once if the receiver crashes before calling `mark_processed`;
//! agents are expected to be idempotent with respect to repeated delivery
//! of the same message id (see `spec.md` §4.1).

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use swarmcore_shared::types::{Message, MessageStatus, MessageType, NewMessage};
use swarmcore_shared::{SwarmError, SwarmResult};

/// Durable message store. Cheap to clone — the pool is reference counted
/// internally by `sqlx`.
#[derive(Debug, Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    /// Connect to (creating if absent) the SQLite database at `path`, or
    /// `:memory:` for an ephemeral store used in tests. Ensures the schema
    /// exists but does NOT clear existing data — call [`Self::clear`]
    /// explicitly at process start, per the design's "clean slate" policy.
    pub async fn connect(path: &str, pool_size: u32) -> SwarmResult<Self> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| SwarmError::fatal(format!("invalid sqlite options: {e}")))?
        } else {
            SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
                .map_err(|e| SwarmError::fatal(format!("invalid sqlite options: {e}")))?
                .create_if_missing(true)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size.max(1))
            .connect_with(options)
            .await
            .map_err(|e| SwarmError::fatal(format!("failed to open message store: {e}")))?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// In-memory store convenience constructor, mainly for tests.
    pub async fn in_memory() -> SwarmResult<Self> {
        Self::connect(":memory:", 1).await
    }

    async fn create_schema(&self) -> SwarmResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                type TEXT NOT NULL,
                content TEXT NOT NULL,
                request_id TEXT,
                timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                status TEXT NOT NULL DEFAULT 'pending'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SwarmError::fatal(format!("failed to create messages table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_receiver_status ON messages (receiver_id, status, id)")
            .execute(&self.pool)
            .await
            .map_err(|e| SwarmError::fatal(format!("failed to create messages index: {e}")))?;

        Ok(())
    }

    /// Atomically append a new message with `status = pending`. Returns
    /// the globally monotonic id assigned by `AUTOINCREMENT`.
    pub async fn insert(&self, message: NewMessage) -> SwarmResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (sender_id, receiver_id, type, content, request_id, status)
            VALUES (?1, ?2, ?3, ?4, ?5, 'pending')
            "#,
        )
        .bind(&message.sender_id)
        .bind(&message.receiver_id)
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(&message.request_id)
        .execute(&self.pool)
        .await
        .map_err(|e| SwarmError::fatal(format!("failed to insert message: {e}")))?;

        Ok(result.last_insert_rowid())
    }

    /// All pending messages for `receiver`, ordered by id ascending —
    /// strict FIFO per receiver.
    pub async fn get_pending(&self, receiver_id: &str) -> SwarmResult<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sender_id, receiver_id, type, content, request_id, timestamp, status
            FROM messages
            WHERE receiver_id = ?1 AND status = 'pending'
            ORDER BY id ASC
            "#,
        )
        .bind(receiver_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SwarmError::fatal(format!("failed to read pending messages: {e}")))?;

        rows.into_iter().map(row_to_message).collect()
    }

    /// Idempotent pending -> processed transition. A repeat call for an
    /// already-processed id is a no-op.
    pub async fn mark_processed(&self, id: i64) -> SwarmResult<()> {
        sqlx::query("UPDATE messages SET status = 'processed' WHERE id = ?1 AND status = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| SwarmError::fatal(format!("failed to mark message processed: {e}")))?;
        Ok(())
    }

    /// Remove all messages and reset the id counter. Used at process
    /// start to guarantee a clean slate (mirrors
    /// `MessageDBManager.clear_all_messages`).
    pub async fn clear(&self) -> SwarmResult<()> {
        sqlx::query("DELETE FROM messages")
            .execute(&self.pool)
            .await
            .map_err(|e| SwarmError::fatal(format!("failed to clear messages: {e}")))?;
        sqlx::query("DELETE FROM sqlite_sequence WHERE name = 'messages'")
            .execute(&self.pool)
            .await
            .map_err(|e| SwarmError::fatal(format!("failed to reset id counter: {e}")))?;
        tracing::info!("message store cleared for fresh start");
        Ok(())
    }

    /// Opportunistic compaction: remove already-processed messages. Not on
    /// the hot path of any invariant; safe to call between poll cycles.
    pub async fn delete_processed(&self) -> SwarmResult<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE status = 'processed'")
            .execute(&self.pool)
            .await
            .map_err(|e| SwarmError::fatal(format!("failed to delete processed messages: {e}")))?;
        Ok(result.rows_affected())
    }

    /// All messages, ordered by id ascending. Diagnostic/test use only.
    pub async fn all_messages(&self) -> SwarmResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, sender_id, receiver_id, type, content, request_id, timestamp, status FROM messages ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SwarmError::fatal(format!("failed to read messages: {e}")))?;

        rows.into_iter().map(row_to_message).collect()
    }

    /// Poll `get_pending` on an interval until at least one message
    /// arrives or `timeout` elapses. Used by tests and by agents that
    /// want a blocking wait instead of driving their own loop.
    pub async fn wait_for_pending(
        &self,
        receiver_id: &str,
        interval: Duration,
        timeout: Duration,
    ) -> SwarmResult<Vec<Message>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let pending = self.get_pending(receiver_id).await?;
            if !pending.is_empty() {
                return Ok(pending);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(interval).await;
        }
    }
}

fn row_to_message(row: sqlx::sqlite::SqliteRow) -> SwarmResult<Message> {
    let type_str: String = row.try_get("type").map_err(|e| SwarmError::fatal(e.to_string()))?;
    let message_type = MessageType::from_str(&type_str)
        .ok_or_else(|| SwarmError::fatal(format!("unknown message type in store: {type_str}")))?;
    let status_str: String = row.try_get("status").map_err(|e| SwarmError::fatal(e.to_string()))?;
    let status = match status_str.as_str() {
        "pending" => MessageStatus::Pending,
        "processed" => MessageStatus::Processed,
        other => return Err(SwarmError::fatal(format!("unknown message status in store: {other}"))),
    };
    let timestamp_str: String = row.try_get("timestamp").map_err(|e| SwarmError::fatal(e.to_string()))?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(Message {
        id: row.try_get("id").map_err(|e| SwarmError::fatal(e.to_string()))?,
        sender_id: row.try_get("sender_id").map_err(|e| SwarmError::fatal(e.to_string()))?,
        receiver_id: row.try_get("receiver_id").map_err(|e| SwarmError::fatal(e.to_string()))?,
        message_type,
        content: row.try_get("content").map_err(|e| SwarmError::fatal(e.to_string()))?,
        request_id: row.try_get("request_id").map_err(|e| SwarmError::fatal(e.to_string()))?,
        timestamp,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_get_pending_then_mark_processed_is_a_one_shot() {
        let store = MessageStore::in_memory().await.unwrap();
        let id = store
            .insert(NewMessage::new("a", "b", MessageType::Task, "hello").with_request_id("req-1"))
            .await
            .unwrap();

        let pending = store.get_pending("b").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);

        store.mark_processed(id).await.unwrap();
        let pending_after = store.get_pending("b").await.unwrap();
        assert!(pending_after.is_empty());
    }

    #[tokio::test]
    async fn mark_processed_is_idempotent() {
        let store = MessageStore::in_memory().await.unwrap();
        let id = store
            .insert(NewMessage::new("a", "b", MessageType::Task, "hi"))
            .await
            .unwrap();
        store.mark_processed(id).await.unwrap();
        store.mark_processed(id).await.unwrap(); // no-op, must not error
        assert!(store.get_pending("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_messages_are_ordered_by_id_ascending() {
        let store = MessageStore::in_memory().await.unwrap();
        for i in 0..16 {
            store
                .insert(NewMessage::new(format!("sender-{i}"), "b", MessageType::Task, "x"))
                .await
                .unwrap();
        }
        let pending = store.get_pending("b").await.unwrap();
        assert_eq!(pending.len(), 16);
        let ids: Vec<i64> = pending.iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn clear_removes_all_messages_and_resets_ids() {
        let store = MessageStore::in_memory().await.unwrap();
        store
            .insert(NewMessage::new("a", "b", MessageType::Task, "x"))
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert!(store.all_messages().await.unwrap().is_empty());

        let id = store
            .insert(NewMessage::new("a", "b", MessageType::Task, "y"))
            .await
            .unwrap();
        assert_eq!(id, 1, "id counter should restart from 1 after clear");
    }

    #[tokio::test]
    async fn sixteen_concurrent_inserts_all_land_distinctly() {
        let store = MessageStore::in_memory().await.unwrap();
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert(NewMessage::new(format!("sender-{i}"), "receiver", MessageType::Task, "x"))
                    .await
                    .unwrap()
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);

        let pending = store.get_pending("receiver").await.unwrap();
        assert_eq!(pending.len(), 16);
        let pending_ids: Vec<i64> = pending.iter().map(|m| m.id).collect();
        let mut sorted = pending_ids.clone();
        sorted.sort();
        assert_eq!(pending_ids, sorted);
    }

    #[tokio::test]
    async fn delete_processed_compacts_only_processed_rows() {
        let store = MessageStore::in_memory().await.unwrap();
        let id1 = store.insert(NewMessage::new("a", "b", MessageType::Task, "x")).await.unwrap();
        store.insert(NewMessage::new("a", "b", MessageType::Task, "y")).await.unwrap();
        store.mark_processed(id1).await.unwrap();

        let removed = store.delete_processed().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.all_messages().await.unwrap().len(), 1);
    }
}
