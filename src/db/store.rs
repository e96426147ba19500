//! SQLite-backed implementation of the store traits.
//!
//! Every call runs under the configured request timeout.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use super::models::{
    format_date, format_timestamp, parse_date, ChatMessage, Contact, DashboardSummary,
    NewReservation, Reservation, ReservationStatus, Role, UnavailableDate, User, Venue,
};
use super::{timed, DbPool, StoreError};
use crate::booking::{AvailabilityStore, ReservationRepository, VenueCatalog};
use crate::chat::MessageStore;

#[derive(Clone)]
pub struct Storage {
    db: DbPool,
    timeout: Duration,
}

impl Storage {
    pub fn new(db: DbPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    pub fn pool(&self) -> &DbPool {
        &self.db
    }

    /// Run one store future under the request timeout, logging failures.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        let result = timed(self.timeout, fut).await;
        if let Err(err) = &result {
            if !err.is_unique_violation() {
                error!(error = %err, "Store call failed");
            }
        }
        result
    }

    pub async fn dashboard_summary(&self) -> Result<DashboardSummary, StoreError> {
        Ok(DashboardSummary {
            total_users: self.run(User::count_all(&self.db)).await?,
            total_venues: self.run(Venue::count_all(&self.db)).await?,
            total_reservations: self.run(Reservation::count_all(&self.db)).await?,
            pending_reservations: self
                .run(Reservation::count_by_status(&self.db, ReservationStatus::Pending))
                .await?,
        })
    }
}

#[async_trait]
impl VenueCatalog for Storage {
    async fn find_venue(&self, venue_id: i64) -> Result<Option<Venue>, StoreError> {
        self.run(Venue::find_by_id(&self.db, venue_id)).await
    }
}

#[async_trait]
impl AvailabilityStore for Storage {
    async fn blocked_dates(
        &self,
        venue_id: i64,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let from = format_date(from);
        let until = format_date(until);
        let rows = self
            .run(UnavailableDate::list_between(&self.db, venue_id, &from, &until))
            .await?;

        Ok(rows
            .iter()
            .filter_map(|raw| {
                let parsed = parse_date(raw);
                if parsed.is_none() {
                    warn!(venue_id, value = %raw, "Skipping malformed unavailable date");
                }
                parsed
            })
            .collect())
    }

    async fn block_date(&self, venue_id: i64, date: NaiveDate) -> Result<bool, StoreError> {
        self.run(UnavailableDate::insert(&self.db, venue_id, &format_date(date)))
            .await
    }

    async fn unblock_date(&self, venue_id: i64, date: NaiveDate) -> Result<bool, StoreError> {
        self.run(UnavailableDate::delete(&self.db, venue_id, &format_date(date)))
            .await
    }
}

#[async_trait]
impl ReservationRepository for Storage {
    async fn create(&self, reservation: &NewReservation) -> Result<i64, StoreError> {
        self.run(Reservation::insert_pending(&self.db, reservation))
            .await
    }

    async fn find_pending_by_user_and_venue(
        &self,
        user_id: i64,
        venue_id: i64,
    ) -> Result<Option<Reservation>, StoreError> {
        self.run(Reservation::find_pending_by_user_and_venue(
            &self.db, user_id, venue_id,
        ))
        .await
    }

    async fn count_by_venue_and_status(
        &self,
        venue_id: i64,
        status: ReservationStatus,
    ) -> Result<i64, StoreError> {
        self.run(Reservation::count_by_venue_and_status(
            &self.db, venue_id, status,
        ))
        .await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Reservation>, StoreError> {
        self.run(Reservation::find_by_id(&self.db, id)).await
    }

    async fn transition_from_pending(
        &self,
        id: i64,
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let at = format_timestamp(at);
        self.run(Reservation::transition_from_pending(&self.db, id, status, &at))
            .await
    }
}

#[async_trait]
impl MessageStore for Storage {
    async fn append(
        &self,
        sender_id: i64,
        receiver_id: i64,
        text: &str,
        at: DateTime<Utc>,
    ) -> Result<(i64, String), StoreError> {
        let timestamp = format_timestamp(at);
        self.run(ChatMessage::insert(&self.db, sender_id, receiver_id, text, &timestamp))
            .await
    }

    async fn list_since(
        &self,
        user_a: i64,
        user_b: i64,
        since: Option<&str>,
        after_id: Option<i64>,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.run(ChatMessage::list_between(&self.db, user_a, user_b, since, after_id))
            .await
    }

    async fn mark_read(&self, reader_id: i64, peer_id: i64) -> Result<u64, StoreError> {
        self.run(ChatMessage::mark_read(&self.db, reader_id, peer_id))
            .await
    }

    async fn unread_count(&self, user_id: i64) -> Result<i64, StoreError> {
        self.run(ChatMessage::unread_count(&self.db, user_id)).await
    }

    async fn contacts(&self, user_id: i64, role: Role) -> Result<Vec<Contact>, StoreError> {
        self.run(User::contacts_for(&self.db, user_id, role)).await
    }

    async fn user_exists(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.run(User::find_by_id(&self.db, user_id)).await?.is_some())
    }
}
