use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{NewReservation, Reservation, ReservationStatus, StoreError};

/// Persistence for reservation requests and their status lifecycle.
///
/// `create` must refuse a second pending row for the same (user, venue);
/// the SQLite implementation relies on a partial unique index, so the
/// refusal surfaces as a unique violation.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn create(&self, reservation: &NewReservation) -> Result<i64, StoreError>;

    async fn find_pending_by_user_and_venue(
        &self,
        user_id: i64,
        venue_id: i64,
    ) -> Result<Option<Reservation>, StoreError>;

    async fn count_by_venue_and_status(
        &self,
        venue_id: i64,
        status: ReservationStatus,
    ) -> Result<i64, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Reservation>, StoreError>;

    /// Moves a pending reservation to `status`; false if it was no longer pending.
    async fn transition_from_pending(
        &self,
        id: i64,
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
