use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::CurrentUser;
use super::error::ApiError;
use crate::AppState;

/// Site-wide totals for the admin dashboard
pub async fn summary(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    current.require_admin()?;
    let summary = state.storage.dashboard_summary().await?;
    Ok(Json(json!({ "status": "success", "summary": summary })))
}
