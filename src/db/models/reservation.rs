//! Reservation request models.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 4] = [
        ReservationStatus::Pending,
        ReservationStatus::Approved,
        ReservationStatus::Rejected,
        ReservationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(ReservationStatus::Pending),
            "approved" | "accepted" | "confirmed" => Some(ReservationStatus::Approved),
            "rejected" => Some(ReservationStatus::Rejected),
            "cancelled" | "canceled" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: i64,
    pub venue_id: i64,
    pub user_id: Option<i64>,
    pub event_date: String,
    pub start_time: String,
    pub end_time: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub mobile_country_code: Option<String>,
    pub mobile_number: Option<String>,
    pub address: Option<String>,
    pub country: Option<String>,
    pub notes: Option<String>,
    pub voucher_code: Option<String>,
    pub price_per_hour: f64,
    pub total_cost: f64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Reservation {
    pub fn status(&self) -> Option<ReservationStatus> {
        ReservationStatus::parse(&self.status)
    }
}

/// Raw reservation form as submitted. Everything is optional text so
/// that missing and malformed fields can be reported together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReservationInput {
    pub venue_id: i64,
    pub event_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub mobile_country_code: Option<String>,
    pub mobile_number: Option<String>,
    pub address: Option<String>,
    pub country: Option<String>,
    pub notes: Option<String>,
    pub voucher_code: Option<String>,
}

/// A validated request ready to insert as `pending`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewReservation {
    pub venue_id: i64,
    pub user_id: Option<i64>,
    pub event_date: String,
    pub start_time: String,
    pub end_time: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub mobile_country_code: Option<String>,
    pub mobile_number: Option<String>,
    pub address: Option<String>,
    pub country: Option<String>,
    pub notes: Option<String>,
    pub voucher_code: Option<String>,
    pub price_per_hour: f64,
    pub duration_hours: f64,
    /// Full precision; round only for display
    pub total_cost: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationCreated {
    pub status: &'static str,
    pub reservation_id: i64,
    pub reservation_status: ReservationStatus,
    pub duration_hours: f64,
    pub total_cost: f64,
}

/// Count of reservations per status for one venue.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub cancelled: i64,
}

impl StatusCounts {
    pub fn set(&mut self, status: ReservationStatus, count: i64) {
        match status {
            ReservationStatus::Pending => self.pending = count,
            ReservationStatus::Approved => self.approved = count,
            ReservationStatus::Rejected => self.rejected = count,
            ReservationStatus::Cancelled => self.cancelled = count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub total_users: i64,
    pub total_venues: i64,
    pub total_reservations: i64,
    pub pending_reservations: i64,
}

const RESERVATION_COLUMNS: &str = "id, venue_id, user_id, event_date, start_time, end_time, \
     first_name, last_name, email, mobile_country_code, mobile_number, address, country, notes, \
     voucher_code, price_per_hour, total_cost, status, created_at, updated_at";

impl Reservation {
    /// Inserts as `pending`. Fails with a UNIQUE violation when the user
    /// already holds a pending request for the venue.
    pub async fn insert_pending(db: &SqlitePool, new: &NewReservation) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO reservations (venue_id, user_id, event_date, start_time, end_time,
                first_name, last_name, email, mobile_country_code, mobile_number, address,
                country, notes, voucher_code, price_per_hour, total_cost, status,
                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(new.venue_id)
        .bind(new.user_id)
        .bind(&new.event_date)
        .bind(&new.start_time)
        .bind(&new.end_time)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(&new.mobile_country_code)
        .bind(&new.mobile_number)
        .bind(&new.address)
        .bind(&new.country)
        .bind(&new.notes)
        .bind(&new.voucher_code)
        .bind(new.price_per_hour)
        .bind(new.total_cost)
        .bind(&new.created_at)
        .bind(&new.created_at)
        .execute(db)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn find_by_id(db: &SqlitePool, id: i64) -> Result<Option<Reservation>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_pending_by_user_and_venue(
        db: &SqlitePool,
        user_id: i64,
        venue_id: i64,
    ) -> Result<Option<Reservation>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE user_id = ? AND venue_id = ? AND status = 'pending' LIMIT 1"
        ))
        .bind(user_id)
        .bind(venue_id)
        .fetch_optional(db)
        .await
    }

    pub async fn count_by_venue_and_status(
        db: &SqlitePool,
        venue_id: i64,
        status: ReservationStatus,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM reservations WHERE venue_id = ? AND status = ?")
                .bind(venue_id)
                .bind(status.as_str())
                .fetch_one(db)
                .await?;
        Ok(count.0)
    }

    pub async fn count_all(db: &SqlitePool) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reservations")
            .fetch_one(db)
            .await?;
        Ok(count.0)
    }

    pub async fn count_by_status(
        db: &SqlitePool,
        status: ReservationStatus,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reservations WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(db)
            .await?;
        Ok(count.0)
    }

    /// Moves a pending reservation to `status`. Returns false if it was not pending.
    pub async fn transition_from_pending(
        db: &SqlitePool,
        id: i64,
        status: ReservationStatus,
        at: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE reservations SET status = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(at)
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
