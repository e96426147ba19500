mod admin;
pub mod auth;
pub mod error;
mod messages;
mod reservations;
mod venues;

use axum::{
    http::StatusCode,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public apart from /me and /logout)
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/guest", post(auth::login_as_guest))
        .route("/logout", post(auth::logout))
        .route("/verify", get(auth::verify_email))
        .route("/resend-verification", post(auth::resend_verification))
        .route("/me", get(auth::me));

    let api_routes = Router::new()
        // Venues
        .route("/venues", get(venues::list_venues))
        .route("/venues", post(venues::create_venue))
        .route("/venues/:id", get(venues::get_venue))
        .route("/venues/:id/status", put(venues::update_status))
        .route("/venues/:id/calendar", get(venues::calendar))
        .route("/venues/:id/unavailable-dates", post(venues::block_date))
        .route("/venues/:id/unavailable-dates/:date", delete(venues::unblock_date))
        .route("/venues/:id/reservation-form", get(venues::reservation_form))
        .route("/venues/:id/reservations/summary", get(venues::reservations_summary))
        // Reservations
        .route("/reservations", post(reservations::submit))
        .route("/reservations/:id/cancel", post(reservations::cancel))
        // Chat
        .route("/messages", get(messages::list_messages))
        .route("/messages", post(messages::send_message))
        .route("/messages/read", post(messages::mark_read))
        .route("/messages/unread-count", get(messages::unread_count))
        .route("/messages/contacts", get(messages::contacts))
        // Admin
        .route("/admin/summary", get(admin::summary));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.server.request_timeout(),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
