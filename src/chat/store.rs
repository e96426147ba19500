use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{ChatMessage, Contact, Role, StoreError};

/// Persisted chat messages, queried per unordered pair of users.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Stores a message; returns its id and the stored timestamp, which
    /// is never older than any message already stored.
    async fn append(
        &self,
        sender_id: i64,
        receiver_id: i64,
        text: &str,
        at: DateTime<Utc>,
    ) -> Result<(i64, String), StoreError>;

    /// Messages between the two users in either direction, ordered by
    /// timestamp then id. `since` excludes everything at or before that
    /// timestamp unless `after_id` admits later ids sharing it. With no
    /// `since` the whole history is returned.
    async fn list_since(
        &self,
        user_a: i64,
        user_b: i64,
        since: Option<&str>,
        after_id: Option<i64>,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    /// Marks messages from `peer_id` to `reader_id` as read.
    async fn mark_read(&self, reader_id: i64, peer_id: i64) -> Result<u64, StoreError>;

    async fn unread_count(&self, user_id: i64) -> Result<i64, StoreError>;

    /// Owners see non-owner users; everyone else sees owners.
    async fn contacts(&self, user_id: i64, role: Role) -> Result<Vec<Contact>, StoreError>;

    async fn user_exists(&self, user_id: i64) -> Result<bool, StoreError>;
}
