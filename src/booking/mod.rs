//! Availability and reservation logic.
//!
//! The calendar generator is pure. Everything else talks to storage
//! through the [`AvailabilityStore`], [`VenueCatalog`] and
//! [`ReservationRepository`] traits, with "who" and "today" supplied by
//! a [`RequestContext`].

pub mod availability;
pub mod calendar;
pub mod repository;
pub mod validator;

pub use availability::{blocked_dates_in_month, month_view, AvailabilityStore, MonthAvailability, VenueCatalog};
pub use calendar::{generate_month, normalize_month, CalendarError, CalendarMonth, DayCell, DayState};
pub use repository::ReservationRepository;
pub use validator::ReservationValidator;

use chrono::{Duration, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::BookingConfig;
use crate::context::RequestContext;
use crate::db::{ReservationCreated, ReservationInput, ReservationStatus, StatusCounts, StoreError};
use crate::validation::FieldErrors;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(FieldErrors),
    #[error("a pending reservation for this venue already exists")]
    DuplicatePending { existing_id: Option<i64> },
    #[error("venue {0} not found")]
    VenueNotFound(i64),
    #[error("reservation {0} not found")]
    ReservationNotFound(i64),
    #[error("sign in to manage reservations")]
    Unauthorized,
    #[error("reservation {0} belongs to another user")]
    Forbidden(i64),
    #[error("reservation {id} is {status}, only pending requests can change")]
    NotPending { id: i64, status: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<FieldErrors> for BookingError {
    fn from(errors: FieldErrors) -> Self {
        BookingError::Validation(errors)
    }
}

/// Tunable booking rules.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    /// None disables the minimum length check
    pub min_duration: Option<Duration>,
}

impl BookingPolicy {
    pub fn from_minutes(minutes: u32) -> Self {
        Self {
            min_duration: (minutes > 0).then(|| Duration::minutes(i64::from(minutes))),
        }
    }
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self::from_minutes(60)
    }
}

impl From<&BookingConfig> for BookingPolicy {
    fn from(config: &BookingConfig) -> Self {
        Self::from_minutes(config.min_duration_minutes)
    }
}

/// Fractional hours between two times of day.
pub fn duration_hours(start: NaiveTime, end: NaiveTime) -> f64 {
    (end - start).num_minutes() as f64 / 60.0
}

/// Half-up rounding to cents, applied to the shortest decimal form of
/// `amount` so that 1.005 becomes 1.01.
pub fn round_currency(amount: f64) -> f64 {
    amount
        .to_string()
        .parse::<Decimal>()
        .ok()
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(amount)
}

/// Load the venue, validate the request and store it as pending.
pub async fn submit_reservation<S>(
    store: &S,
    policy: &BookingPolicy,
    ctx: &RequestContext,
    input: ReservationInput,
) -> Result<ReservationCreated, BookingError>
where
    S: VenueCatalog + ReservationRepository + ?Sized,
{
    let venue = store
        .find_venue(input.venue_id)
        .await?
        .ok_or(BookingError::VenueNotFound(input.venue_id))?;

    let reservation = ReservationValidator::new(store, policy)
        .validate(ctx, &venue, &input)
        .await?;

    let id = match store.create(&reservation).await {
        Ok(id) => id,
        Err(err) if err.is_unique_violation() => {
            // Lost the race against a concurrent submission
            let existing = match ctx.user_id {
                Some(user_id) => store.find_pending_by_user_and_venue(user_id, venue.id).await?,
                None => None,
            };
            warn!(venue_id = venue.id, user_id = ?ctx.user_id, "Concurrent duplicate reservation refused");
            return Err(BookingError::DuplicatePending {
                existing_id: existing.map(|r| r.id),
            });
        }
        Err(err) => return Err(err.into()),
    };

    info!(
        reservation_id = id,
        venue_id = venue.id,
        user_id = ?ctx.user_id,
        event_date = %reservation.event_date,
        "Reservation request created"
    );

    Ok(ReservationCreated {
        status: "success",
        reservation_id: id,
        reservation_status: ReservationStatus::Pending,
        duration_hours: reservation.duration_hours,
        total_cost: round_currency(reservation.total_cost),
    })
}

/// Requester withdraws their own pending request. Admins may cancel any.
pub async fn cancel_reservation<S>(
    store: &S,
    ctx: &RequestContext,
    reservation_id: i64,
) -> Result<(), BookingError>
where
    S: ReservationRepository + ?Sized,
{
    let user_id = ctx.user_id.ok_or(BookingError::Unauthorized)?;
    let reservation = store
        .find_by_id(reservation_id)
        .await?
        .ok_or(BookingError::ReservationNotFound(reservation_id))?;

    if reservation.user_id != Some(user_id) && !ctx.is_admin() {
        return Err(BookingError::Forbidden(reservation_id));
    }

    let changed = store
        .transition_from_pending(reservation_id, ReservationStatus::Cancelled, ctx.now())
        .await?;
    if !changed {
        return Err(BookingError::NotPending {
            id: reservation_id,
            status: reservation.status,
        });
    }

    info!(reservation_id, user_id, "Reservation cancelled");
    Ok(())
}

/// Reservation counts per status for one venue.
pub async fn venue_summary<S>(store: &S, venue_id: i64) -> Result<StatusCounts, BookingError>
where
    S: ReservationRepository + ?Sized,
{
    let mut counts = StatusCounts::default();
    for status in ReservationStatus::ALL {
        counts.set(status, store.count_by_venue_and_status(venue_id, status).await?);
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FixedClock;
    use crate::db::{Reservation, Role, Storage};
    use crate::test_support::{create_user, create_venue, memory_storage, reservation_input};
    use crate::validation::parse_date;
    use std::sync::Arc;

    fn user_ctx(user_id: i64, role: Role) -> RequestContext {
        let clock = Arc::new(FixedClock::on(parse_date("2025-06-10").unwrap()));
        RequestContext::for_user(user_id, role, clock)
    }

    async fn fixture(storage: &Storage) -> (i64, i64) {
        let owner = create_user(storage, "owner", Role::Owner).await;
        let user = create_user(storage, "customer", Role::User).await;
        let venue = create_venue(storage, owner, 500.0, "open").await;
        (user, venue)
    }

    #[test]
    fn test_duration_and_cost() {
        let start = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(16, 30, 0).unwrap();
        let hours = duration_hours(start, end);
        assert_eq!(hours, 2.5);
        assert_eq!(round_currency(hours * 500.0), 1250.0);
    }

    #[test]
    fn test_round_currency_half_up() {
        assert_eq!(round_currency(10.125), 10.13);
        assert_eq!(round_currency(333.3333), 333.33);
        assert_eq!(round_currency(0.5), 0.5);
        assert_eq!(round_currency(1.005), 1.01);
        assert_eq!(round_currency(2.675), 2.68);

        let half_hour = duration_hours(
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
        );
        assert_eq!(round_currency(half_hour * 2.01), 1.01);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = BookingPolicy::from(&BookingConfig {
            min_duration_minutes: 0,
        });
        assert!(policy.min_duration.is_none());
        assert_eq!(
            BookingPolicy::default().min_duration,
            Some(Duration::minutes(60))
        );
    }

    #[tokio::test]
    async fn test_submit_creates_pending_reservation() {
        let storage = memory_storage().await;
        let (user, venue) = fixture(&storage).await;
        let ctx = user_ctx(user, Role::User);

        let created = submit_reservation(
            &storage,
            &BookingPolicy::default(),
            &ctx,
            reservation_input(venue, "2025-06-15", "14:00", "16:30"),
        )
        .await
        .unwrap();

        assert_eq!(created.status, "success");
        assert_eq!(created.reservation_status, ReservationStatus::Pending);
        assert_eq!(created.total_cost, 1250.0);

        let stored: Reservation = storage.find_by_id(created.reservation_id).await.unwrap().unwrap();
        assert_eq!(stored.event_date, "2025-06-15");
        assert_eq!(stored.status, "pending");
        assert_eq!(stored.total_cost, 1250.0);
    }

    #[tokio::test]
    async fn test_submit_unknown_venue() {
        let storage = memory_storage().await;
        let (user, _) = fixture(&storage).await;
        let err = submit_reservation(
            &storage,
            &BookingPolicy::default(),
            &user_ctx(user, Role::User),
            reservation_input(999, "2025-06-15", "14:00", "16:00"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BookingError::VenueNotFound(999)));
    }

    #[tokio::test]
    async fn test_second_submission_conflicts() {
        let storage = memory_storage().await;
        let (user, venue) = fixture(&storage).await;
        let ctx = user_ctx(user, Role::User);
        let policy = BookingPolicy::default();

        let first = submit_reservation(&storage, &policy, &ctx, reservation_input(venue, "2025-06-15", "14:00", "16:00"))
            .await
            .unwrap();
        let err = submit_reservation(&storage, &policy, &ctx, reservation_input(venue, "2025-06-20", "10:00", "12:00"))
            .await
            .unwrap_err();

        match err {
            BookingError::DuplicatePending { existing_id } => {
                assert_eq!(existing_id, Some(first.reservation_id))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            storage
                .count_by_venue_and_status(venue, ReservationStatus::Pending)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_store_one_pending_row() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init(dir.path(), std::time::Duration::from_secs(10))
            .await
            .unwrap();
        let storage = Storage::new(pool, std::time::Duration::from_secs(10));
        let (user, venue) = fixture(&storage).await;
        let policy = BookingPolicy::default();

        let attempts = (0..4).map(|_| {
            let storage = storage.clone();
            let policy = policy.clone();
            let ctx = user_ctx(user, Role::User);
            tokio::spawn(async move {
                submit_reservation(
                    &storage,
                    &policy,
                    &ctx,
                    reservation_input(venue, "2025-06-15", "14:00", "16:00"),
                )
                .await
            })
        });
        let mut results = Vec::new();
        for handle in attempts.collect::<Vec<_>>() {
            results.push(handle.await.unwrap());
        }

        let created = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(BookingError::DuplicatePending { .. })))
            .count();
        assert_eq!(created, 1);
        assert_eq!(conflicts, 3);
        assert_eq!(
            storage
                .count_by_venue_and_status(venue, ReservationStatus::Pending)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_cancel_then_resubmit() {
        let storage = memory_storage().await;
        let (user, venue) = fixture(&storage).await;
        let ctx = user_ctx(user, Role::User);
        let policy = BookingPolicy::default();

        let first = submit_reservation(&storage, &policy, &ctx, reservation_input(venue, "2025-06-15", "14:00", "16:00"))
            .await
            .unwrap();
        cancel_reservation(&storage, &ctx, first.reservation_id).await.unwrap();

        let err = cancel_reservation(&storage, &ctx, first.reservation_id).await.unwrap_err();
        assert!(matches!(err, BookingError::NotPending { ref status, .. } if status == "cancelled"));

        submit_reservation(&storage, &policy, &ctx, reservation_input(venue, "2025-06-15", "14:00", "16:00"))
            .await
            .unwrap();

        let summary = venue_summary(&storage, venue).await.unwrap();
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_requires_owner_of_request() {
        let storage = memory_storage().await;
        let (user, venue) = fixture(&storage).await;
        let other = create_user(&storage, "someone", Role::User).await;
        let policy = BookingPolicy::default();

        let created = submit_reservation(
            &storage,
            &policy,
            &user_ctx(user, Role::User),
            reservation_input(venue, "2025-06-15", "14:00", "16:00"),
        )
        .await
        .unwrap();

        let err = cancel_reservation(&storage, &user_ctx(other, Role::User), created.reservation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Forbidden(_)));

        let admin = create_user(&storage, "admin", Role::Admin).await;
        cancel_reservation(&storage, &user_ctx(admin, Role::Admin), created.reservation_id)
            .await
            .unwrap();
    }
}
