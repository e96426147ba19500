//! Polling chat between customers and venue owners.
//!
//! Server side, the functions here sit between the HTTP handlers and a
//! [`MessageStore`]. Client side, [`poller::ChatSession`] keeps one
//! conversation up to date against any [`poller::MessageSource`].

pub mod client;
pub mod poller;
pub mod store;

pub use client::HttpMessageSource;
pub use poller::{ChatEntry, ChatEvent, ChatSession, MessageSource, PollOptions, PollerState, StoreMessageSource};
pub use store::MessageStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::context::RequestContext;
use crate::db::{format_timestamp, parse_timestamp, ChatMessage, Contact, StoreError};
use crate::validation::{validate_message_text, FieldErrors};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(FieldErrors),
    #[error("{0} not found")]
    NotFound(String),
    #[error("sign in to use chat")]
    Unauthorized,
    #[error("no conversation is open")]
    NoConversation,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.add(field, message);
        ChatError::Validation(errors)
    }

    /// Worth trying again on the next cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChatError::Transport(_) | ChatError::Store(_) => true,
            ChatError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Position of the newest message seen: timestamp, then id for ties.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    pub timestamp: String,
    pub id: i64,
}

impl Watermark {
    pub fn of(message: &ChatMessage) -> Self {
        Self {
            timestamp: message.created_at.clone(),
            id: message.id,
        }
    }

    /// Never moves backwards.
    pub fn advance(current: Option<Watermark>, messages: &[ChatMessage]) -> Option<Watermark> {
        messages.iter().map(Watermark::of).fold(current, |acc, next| match acc {
            Some(acc) if acc >= next => Some(acc),
            _ => Some(next),
        })
    }
}

/// Server acknowledgement of a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: i64,
    pub timestamp: String,
}

fn require_user(ctx: &RequestContext) -> Result<i64, ChatError> {
    ctx.user_id.ok_or(ChatError::Unauthorized)
}

pub async fn send_message<S>(
    store: &S,
    ctx: &RequestContext,
    receiver_id: i64,
    text: &str,
) -> Result<SentMessage, ChatError>
where
    S: MessageStore + ?Sized,
{
    let sender_id = require_user(ctx)?;

    let mut errors = FieldErrors::new();
    errors.check("message_text", validate_message_text(text));
    if receiver_id == sender_id {
        errors.add("receiver_id", "You cannot message yourself");
    }
    errors.finish().map_err(ChatError::Validation)?;

    if !store.user_exists(receiver_id).await? {
        return Err(ChatError::NotFound(format!("user {}", receiver_id)));
    }

    let (id, timestamp) = store.append(sender_id, receiver_id, text, ctx.now()).await?;
    info!(message_id = id, sender_id, receiver_id, "Chat message stored");
    Ok(SentMessage { id, timestamp })
}

/// Conversation with `peer_id`, optionally only past a watermark.
pub async fn fetch_messages<S>(
    store: &S,
    ctx: &RequestContext,
    peer_id: i64,
    since: Option<&str>,
    after_id: Option<i64>,
) -> Result<Vec<ChatMessage>, ChatError>
where
    S: MessageStore + ?Sized,
{
    let user_id = require_user(ctx)?;

    // Stored timestamps are fixed-width; compare against the same shape
    let since = match since.filter(|s| !s.is_empty()) {
        Some(raw) => Some(format_timestamp(parse_timestamp(raw).ok_or_else(|| {
            ChatError::field("since", "Invalid timestamp. Use RFC 3339")
        })?)),
        None => None,
    };

    Ok(store
        .list_since(user_id, peer_id, since.as_deref(), after_id)
        .await?)
}

pub async fn mark_conversation_read<S>(
    store: &S,
    ctx: &RequestContext,
    peer_id: i64,
) -> Result<u64, ChatError>
where
    S: MessageStore + ?Sized,
{
    let user_id = require_user(ctx)?;
    Ok(store.mark_read(user_id, peer_id).await?)
}

pub async fn unread_count<S>(store: &S, ctx: &RequestContext) -> Result<i64, ChatError>
where
    S: MessageStore + ?Sized,
{
    let user_id = require_user(ctx)?;
    Ok(store.unread_count(user_id).await?)
}

pub async fn contacts<S>(store: &S, ctx: &RequestContext) -> Result<Vec<Contact>, ChatError>
where
    S: MessageStore + ?Sized,
{
    let user_id = require_user(ctx)?;
    Ok(store.contacts(user_id, ctx.role).await?)
}
