//! Chat message rows.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub message_text: String,
    /// Fixed-width UTC timestamp; text order is time order
    pub created_at: String,
    pub is_read: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub receiver_id: i64,
    pub message_text: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub status: String,
    pub id: i64,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub peer_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub status: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatMessage {
    /// Stores a message and returns its id and stored timestamp.
    ///
    /// `created_at` is raised to the newest stored timestamp when the
    /// clock lags, so timestamp order always follows commit order. The
    /// single INSERT takes SQLite's write lock before the subquery runs.
    pub async fn insert(
        db: &SqlitePool,
        sender_id: i64,
        receiver_id: i64,
        text: &str,
        created_at: &str,
    ) -> Result<(i64, String), sqlx::Error> {
        sqlx::query_as::<_, (i64, String)>(
            "INSERT INTO chat_messages (sender_id, receiver_id, message_text, created_at) \
             SELECT ?, ?, ?, MAX(?, COALESCE((SELECT MAX(created_at) FROM chat_messages), '')) \
             RETURNING id, created_at",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(text)
        .bind(created_at)
        .fetch_one(db)
        .await
    }

    /// Messages between `a` and `b` in either direction, oldest first.
    ///
    /// With `since` only rows strictly newer are returned; `after_id`
    /// additionally admits rows sharing that exact timestamp with a
    /// larger id.
    pub async fn list_between(
        db: &SqlitePool,
        a: i64,
        b: i64,
        since: Option<&str>,
        after_id: Option<i64>,
    ) -> Result<Vec<ChatMessage>, sqlx::Error> {
        let mut sql = String::from(
            "SELECT id, sender_id, receiver_id, message_text, created_at, is_read \
             FROM chat_messages \
             WHERE ((sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?))",
        );
        match (since, after_id) {
            (Some(_), Some(_)) => sql.push_str(" AND (created_at > ? OR (created_at = ? AND id > ?))"),
            (Some(_), None) => sql.push_str(" AND created_at > ?"),
            (None, _) => {}
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut query = sqlx::query_as::<_, ChatMessage>(&sql).bind(a).bind(b).bind(b).bind(a);
        if let Some(ts) = since {
            query = query.bind(ts);
            if let Some(id) = after_id {
                query = query.bind(ts).bind(id);
            }
        }
        query.fetch_all(db).await
    }

    /// Marks everything `peer` sent to `reader` as read.
    pub async fn mark_read(db: &SqlitePool, reader: i64, peer: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE chat_messages SET is_read = 1 \
             WHERE receiver_id = ? AND sender_id = ? AND is_read = 0",
        )
        .bind(reader)
        .bind(peer)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn unread_count(db: &SqlitePool, user_id: i64) -> Result<i64, sqlx::Error> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chat_messages WHERE receiver_id = ? AND is_read = 0")
                .bind(user_id)
                .fetch_one(db)
                .await?;
        Ok(count.0)
    }
}
