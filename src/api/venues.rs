use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::auth::{CurrentUser, MaybeUser};
use super::error::ApiError;
use crate::booking::{month_view, venue_summary, AvailabilityStore, MonthAvailability};
use crate::db::{
    format_date, CreateVenueRequest, HeaderMedia, Role, UpdateVenueStatusRequest, User, Venue,
    VenueDetail, VenueMedia, VenueStatus,
};
use crate::validation::{non_blank, parse_date, FieldErrors};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub year: Option<i32>,
    pub month: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ReservationFormQuery {
    pub event_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlockDateRequest {
    pub date: String,
}

#[derive(Debug, Serialize)]
pub struct CalendarResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub view: MonthAvailability,
}

/// Values the reservation form starts with.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct FormPrefill {
    pub event_date: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub mobile_number: Option<String>,
    pub address: Option<String>,
}

impl FormPrefill {
    fn from_user(user: &User) -> Self {
        let (first_name, last_name) = match user.client_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => match name.split_once(char::is_whitespace) {
                Some((first, last)) => (Some(first.to_string()), Some(last.trim().to_string())),
                None => (Some(name.to_string()), None),
            },
            _ => (None, None),
        };
        Self {
            event_date: None,
            first_name,
            last_name,
            email: Some(user.email.clone()),
            mobile_number: user.contact_number.clone(),
            address: user.client_address.clone(),
        }
    }
}

async fn load_venue(state: &AppState, id: i64) -> Result<Venue, ApiError> {
    state
        .storage
        .run(Venue::find_by_id(&state.db, id))
        .await?
        .ok_or_else(|| ApiError::not_found("Venue not found"))
}

/// List open venues
pub async fn list_venues(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let venues = state.storage.run(Venue::list_open(&state.db)).await?;
    Ok(Json(json!({ "status": "success", "venues": venues })))
}

pub async fn get_venue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<VenueDetail>, ApiError> {
    let venue = load_venue(&state, id).await?;
    let media = state
        .storage
        .run(VenueMedia::list_for_venue(&state.db, id))
        .await?;
    let owner_username = state
        .storage
        .run(Venue::owner_username(&state.db, venue.owner_id))
        .await?;

    Ok(Json(VenueDetail {
        header: HeaderMedia::pick(&venue, &media),
        bookable: venue.is_bookable(),
        owner_username,
        media,
        venue,
    }))
}

pub async fn create_venue(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(request): Json<CreateVenueRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if !matches!(current.ctx.role, Role::Owner | Role::Admin) {
        return Err(ApiError::forbidden("Only venue owners can list venues"));
    }

    let mut errors = FieldErrors::new();
    if request.title.trim().is_empty() {
        errors.add("title", "Title is required");
    }
    if !request.price_per_hour.is_finite() || request.price_per_hour < 0.0 {
        errors.add("price_per_hour", "Price per hour cannot be negative");
    }
    if request.capacity < 0 {
        errors.add("capacity", "Capacity cannot be negative");
    }
    for item in &request.media {
        if !matches!(item.media_type.as_str(), "image" | "video") {
            errors.add("media", format!("Unsupported media type: {}", item.media_type));
        }
        if item.media_url.trim().is_empty() {
            errors.add("media", "Media URL is required");
        }
    }
    errors.finish()?;

    let venue_id = state
        .storage
        .run(Venue::insert(&state.db, current.id(), &request))
        .await?;
    info!(venue_id, owner_id = current.id(), "Venue created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "venue_id": venue_id })),
    ))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Json(request): Json<UpdateVenueStatusRequest>,
) -> Result<Json<Value>, ApiError> {
    let venue = load_venue(&state, id).await?;
    current.require_owner_of(venue.owner_id)?;

    let status = VenueStatus::parse(&request.status)
        .ok_or_else(|| ApiError::validation_field("status", "Status must be open or closed"))?;
    state
        .storage
        .run(Venue::update_status(&state.db, id, status))
        .await?;
    info!(venue_id = id, status = status.as_str(), "Venue status changed");

    Ok(Json(json!({ "status": "success", "venue_status": status })))
}

/// Month grid for the availability calendar; defaults to the current month
pub async fn calendar(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<CalendarResponse>, ApiError> {
    let today = state.clock.today();
    let year = query.year.unwrap_or_else(|| today.year());
    let month = query.month.unwrap_or_else(|| today.month() as i32);

    load_venue(&state, id).await?;
    let view = month_view(&state.storage, id, year, month, today).await?;

    Ok(Json(CalendarResponse {
        status: "success",
        view,
    }))
}

pub async fn block_date(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Json(request): Json<BlockDateRequest>,
) -> Result<Json<Value>, ApiError> {
    let venue = load_venue(&state, id).await?;
    current.require_owner_of(venue.owner_id)?;

    let date = parse_date(request.date.trim()).map_err(|e| ApiError::validation_field("date", e))?;
    let changed = state.storage.block_date(id, date).await?;
    info!(venue_id = id, date = %date, changed, "Date blocked");

    Ok(Json(json!({ "status": "success", "date": format_date(date), "changed": changed })))
}

pub async fn unblock_date(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path((id, date)): Path<(i64, String)>,
) -> Result<Json<Value>, ApiError> {
    let venue = load_venue(&state, id).await?;
    current.require_owner_of(venue.owner_id)?;

    let date = parse_date(date.trim()).map_err(|e| ApiError::validation_field("date", e))?;
    let changed = state.storage.unblock_date(id, date).await?;
    info!(venue_id = id, date = %date, changed, "Date unblocked");

    Ok(Json(json!({ "status": "success", "date": format_date(date), "changed": changed })))
}

/// Venue summary and prefilled values for the reservation form. A bad
/// `event_date` is dropped and explained in `notices`.
pub async fn reservation_form(
    State(state): State<Arc<AppState>>,
    maybe_user: MaybeUser,
    Path(id): Path<i64>,
    Query(query): Query<ReservationFormQuery>,
) -> Result<Json<Value>, ApiError> {
    let venue = load_venue(&state, id).await?;
    let ctx = maybe_user.context(&state);

    let mut prefill = match &maybe_user.0 {
        Some(current) if current.ctx.role != Role::Guest => FormPrefill::from_user(&current.user),
        _ => FormPrefill::default(),
    };

    let mut notices = Vec::new();
    if let Some(raw) = non_blank(&query.event_date) {
        match parse_date(raw) {
            Err(_) => notices.push("The selected date is not valid and was cleared".to_string()),
            Ok(date) if date < ctx.today() => {
                notices.push("The selected date is in the past and was cleared".to_string())
            }
            Ok(date) => {
                let next = date.succ_opt().unwrap_or(date);
                let blocked = state.storage.blocked_dates(id, date, next).await?;
                if blocked.contains(&date) {
                    notices.push("The selected date is unavailable and was cleared".to_string());
                } else {
                    prefill.event_date = Some(format_date(date));
                }
            }
        }
    }

    if !venue.is_bookable() {
        notices.push("This venue is not accepting reservations".to_string());
    }

    Ok(Json(json!({
        "status": "success",
        "venue": {
            "id": venue.id,
            "title": venue.title,
            "price_per_hour": venue.price_per_hour,
            "capacity": venue.capacity,
            "bookable": venue.is_bookable(),
        },
        "prefill": prefill,
        "notices": notices,
    })))
}

/// Reservation counts per status, for the owner dashboard
pub async fn reservations_summary(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let venue = load_venue(&state, id).await?;
    current.require_owner_of(venue.owner_id)?;

    let counts = venue_summary(&state.storage, id).await?;
    Ok(Json(json!({ "status": "success", "venue_id": id, "counts": counts })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(client_name: Option<&str>) -> User {
        User {
            id: 4,
            username: "ana".into(),
            email: "ana@example.com".into(),
            password_hash: String::new(),
            role: "user".into(),
            client_name: client_name.map(str::to_string),
            contact_number: Some("9171234567".into()),
            client_address: None,
            email_verified_at: None,
            email_verification_token: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_prefill_splits_profile_name() {
        let prefill = FormPrefill::from_user(&user(Some("Ana Maria Reyes")));
        assert_eq!(prefill.first_name.as_deref(), Some("Ana"));
        assert_eq!(prefill.last_name.as_deref(), Some("Maria Reyes"));
        assert_eq!(prefill.email.as_deref(), Some("ana@example.com"));
        assert_eq!(prefill.mobile_number.as_deref(), Some("9171234567"));

        let prefill = FormPrefill::from_user(&user(Some("Ana")));
        assert_eq!(prefill.first_name.as_deref(), Some("Ana"));
        assert_eq!(prefill.last_name, None);

        assert_eq!(FormPrefill::from_user(&user(None)).first_name, None);
    }
}
