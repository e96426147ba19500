//! Blocked-date reads and writes, and the calendar view built on them.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

use super::calendar::{generate_month, month_bounds, CalendarMonth};
use super::BookingError;
use crate::db::{format_date, StoreError, Venue};
use crate::validation::FieldErrors;

/// Per-venue set of explicitly blocked dates.
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    /// Blocked dates inside the given (normalized) month. A storage failure
    /// is an error, never an empty set.
    async fn blocked_dates(
        &self,
        venue_id: i64,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>, StoreError>;

    /// Returns false when the date was already blocked.
    async fn block_date(&self, venue_id: i64, date: NaiveDate) -> Result<bool, StoreError>;

    /// Returns false when the date was not blocked.
    async fn unblock_date(&self, venue_id: i64, date: NaiveDate) -> Result<bool, StoreError>;
}

/// Read access to the venue catalog.
#[async_trait]
pub trait VenueCatalog: Send + Sync {
    async fn find_venue(&self, venue_id: i64) -> Result<Option<Venue>, StoreError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthAvailability {
    pub venue_id: i64,
    pub unavailable_dates: Vec<String>,
    pub month: CalendarMonth,
}

/// Blocked dates for one month of a venue.
pub async fn blocked_dates_in_month<S>(
    store: &S,
    venue_id: i64,
    year: i32,
    month: i32,
) -> Result<BTreeSet<NaiveDate>, BookingError>
where
    S: AvailabilityStore + ?Sized,
{
    let (from, until) = month_bounds(year, month).map_err(year_error)?;
    Ok(store.blocked_dates(venue_id, from, until).await?)
}

/// Month grid plus the raw blocked dates, as served to the calendar widget.
pub async fn month_view<S>(
    store: &S,
    venue_id: i64,
    year: i32,
    month: i32,
    today: NaiveDate,
) -> Result<MonthAvailability, BookingError>
where
    S: AvailabilityStore + ?Sized,
{
    let blocked = blocked_dates_in_month(store, venue_id, year, month).await?;
    let grid = generate_month(year, month, &blocked, today).map_err(year_error)?;

    Ok(MonthAvailability {
        venue_id,
        unavailable_dates: blocked.iter().copied().map(format_date).collect(),
        month: grid,
    })
}

fn year_error(err: super::calendar::CalendarError) -> BookingError {
    let mut errors = FieldErrors::new();
    errors.add("year", err.to_string());
    BookingError::Validation(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::calendar::DayState;
    use crate::test_support::{create_user, create_venue, memory_storage};
    use crate::db::Role;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_blocked_dates_filtered_to_month() {
        let storage = memory_storage().await;
        let owner = create_user(&storage, "owner", Role::Owner).await;
        let venue = create_venue(&storage, owner, 500.0, "open").await;

        for d in ["2025-05-31", "2025-06-01", "2025-06-30", "2025-07-01"] {
            assert!(storage.block_date(venue, date(d)).await.unwrap());
        }
        assert!(!storage.block_date(venue, date("2025-06-01")).await.unwrap());

        let june = blocked_dates_in_month(&storage, venue, 2025, 6).await.unwrap();
        assert_eq!(
            june.into_iter().collect::<Vec<_>>(),
            vec![date("2025-06-01"), date("2025-06-30")]
        );
    }

    #[tokio::test]
    async fn test_month_view_marks_blocked_days() {
        let storage = memory_storage().await;
        let owner = create_user(&storage, "owner", Role::Owner).await;
        let venue = create_venue(&storage, owner, 500.0, "open").await;
        storage.block_date(venue, date("2025-06-20")).await.unwrap();

        let view = month_view(&storage, venue, 2025, 6, date("2025-06-10")).await.unwrap();
        assert_eq!(view.unavailable_dates, vec!["2025-06-20".to_string()]);
        let cell = view
            .month
            .cells
            .iter()
            .find(|c| c.date == Some(date("2025-06-20")))
            .unwrap();
        assert_eq!(cell.state, DayState::Unavailable);

        assert!(storage.unblock_date(venue, date("2025-06-20")).await.unwrap());
        let view = month_view(&storage, venue, 2025, 6, date("2025-06-10")).await.unwrap();
        assert!(view.unavailable_dates.is_empty());
    }

    #[tokio::test]
    async fn test_month_view_rejects_year_out_of_range() {
        let storage = memory_storage().await;
        let err = month_view(&storage, 1, 2200, 1, date("2025-06-10")).await.unwrap_err();
        match err {
            BookingError::Validation(errors) => assert!(errors.contains("year")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_storage_failure_is_not_an_empty_set() {
        let storage = memory_storage().await;
        storage.pool().close().await;
        let result = blocked_dates_in_month(&storage, 1, 2025, 6).await;
        assert!(matches!(result, Err(BookingError::Store(_))));
    }
}
