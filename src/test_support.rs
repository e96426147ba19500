//! Fixtures shared by unit tests.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;

use crate::api::auth::hash_password;
use crate::config::Config;
use crate::context::FixedClock;
use crate::db::{
    self, format_timestamp, CreateVenueRequest, NewUser, ReservationInput, Role, Storage, User,
    Venue, VenueStatus,
};
use crate::AppState;

pub const TEST_PASSWORD: &str = "correct-horse";

pub async fn memory_storage() -> Storage {
    let pool = db::init_in_memory().await.unwrap();
    Storage::new(pool, Duration::from_secs(10))
}

/// Verified account with email `{username}@example.com`.
pub async fn create_user(storage: &Storage, username: &str, role: Role) -> i64 {
    let email = format!("{username}@example.com");
    let hash = hash_password(TEST_PASSWORD).unwrap();
    let verified_at = format_timestamp(chrono::Utc::now());
    User::insert(
        storage.pool(),
        &NewUser {
            username,
            email: &email,
            password_hash: &hash,
            role,
            client_name: None,
            contact_number: None,
            client_address: None,
            email_verified_at: Some(&verified_at),
            email_verification_token: None,
        },
    )
    .await
    .unwrap()
}

pub async fn create_venue(storage: &Storage, owner_id: i64, price: f64, status: &str) -> i64 {
    let request = CreateVenueRequest {
        title: format!("Hall {owner_id}"),
        description: None,
        price_per_hour: price,
        capacity: 120,
        location: Some("Makati".into()),
        latitude: None,
        longitude: None,
        virtual_tour_url: None,
        media: Vec::new(),
    };
    let id = Venue::insert(storage.pool(), owner_id, &request).await.unwrap();
    if let Some(status) = VenueStatus::parse(status).filter(|s| *s != VenueStatus::Open) {
        Venue::update_status(storage.pool(), id, status).await.unwrap();
    }
    id
}

pub fn reservation_input(venue_id: i64, date: &str, start: &str, end: &str) -> ReservationInput {
    ReservationInput {
        venue_id,
        event_date: Some(date.into()),
        start_time: Some(start.into()),
        end_time: Some(end.into()),
        first_name: Some("Ana".into()),
        last_name: Some("Reyes".into()),
        email: Some("ana@example.com".into()),
        ..Default::default()
    }
}

/// Application state over an in-memory database, with "today" pinned.
pub async fn test_state(today: &str) -> Arc<AppState> {
    let storage = memory_storage().await;
    let today = NaiveDate::parse_from_str(today, "%Y-%m-%d").unwrap();
    Arc::new(AppState::new(Config::default(), storage).with_clock(Arc::new(FixedClock::on(today))))
}
