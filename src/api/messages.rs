use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::CurrentUser;
use super::error::ApiError;
use crate::chat;
use crate::db::{MarkReadRequest, MessagesResponse, SendMessageRequest, SendMessageResponse};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub peer_id: i64,
    pub since: Option<String>,
    pub after_id: Option<i64>,
}

/// Conversation with `peer_id`, optionally only past a watermark
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let messages = chat::fetch_messages(
        &state.storage,
        &current.ctx,
        query.peer_id,
        query.since.as_deref(),
        query.after_id,
    )
    .await?;

    Ok(Json(MessagesResponse {
        status: "success".to_string(),
        messages,
    }))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), ApiError> {
    let sent = chat::send_message(
        &state.storage,
        &current.ctx,
        request.receiver_id,
        &request.message_text,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            status: "success".to_string(),
            id: sent.id,
            timestamp: sent.timestamp,
            correlation_id: request.correlation_id,
        }),
    ))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(request): Json<MarkReadRequest>,
) -> Result<Json<Value>, ApiError> {
    let updated = chat::mark_conversation_read(&state.storage, &current.ctx, request.peer_id).await?;
    Ok(Json(json!({ "status": "success", "updated": updated })))
}

pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let unread = chat::unread_count(&state.storage, &current.ctx).await?;
    Ok(Json(json!({ "status": "success", "unread": unread })))
}

/// People the current user can chat with
pub async fn contacts(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let contacts = chat::contacts(&state.storage, &current.ctx).await?;
    Ok(Json(json!({ "status": "success", "contacts": contacts })))
}
