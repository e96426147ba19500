use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::{CurrentUser, MaybeUser};
use super::error::ApiError;
use crate::booking::{cancel_reservation, submit_reservation};
use crate::db::{ReservationCreated, ReservationInput};
use crate::AppState;

/// Submit a reservation request. Anonymous visitors may book too.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    maybe_user: MaybeUser,
    Json(input): Json<ReservationInput>,
) -> Result<(StatusCode, Json<ReservationCreated>), ApiError> {
    let ctx = maybe_user.context(&state);
    let created = submit_reservation(&state.storage, &state.policy, &ctx, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    cancel_reservation(&state.storage, &current.ctx, id).await?;
    Ok(Json(json!({
        "status": "success",
        "reservation_id": id,
        "reservation_status": "cancelled",
    })))
}
