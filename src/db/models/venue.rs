//! Venue catalog models.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueStatus {
    Open,
    Closed,
}

impl VenueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueStatus::Open => "open",
            VenueStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Some(VenueStatus::Open),
            "closed" => Some(VenueStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Venue {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub price_per_hour: f64,
    pub capacity: i64,
    pub status: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub virtual_tour_url: Option<String>,
    pub created_at: String,
}

impl Venue {
    pub fn status(&self) -> VenueStatus {
        VenueStatus::parse(&self.status).unwrap_or(VenueStatus::Closed)
    }

    /// Open and priced; a free or closed venue takes no requests.
    pub fn is_bookable(&self) -> bool {
        self.status() == VenueStatus::Open && self.price_per_hour > 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VenueMedia {
    pub id: i64,
    pub venue_id: i64,
    pub media_type: String,
    pub media_url: String,
    pub created_at: String,
}

/// What the venue page shows in its header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeaderMedia {
    VirtualTour { url: String },
    Video { url: String },
    Image { url: String },
}

impl HeaderMedia {
    /// Virtual tour wins, then the first gallery item.
    pub fn pick(venue: &Venue, media: &[VenueMedia]) -> Option<Self> {
        if let Some(url) = venue.virtual_tour_url.as_deref().filter(|u| !u.is_empty()) {
            return Some(HeaderMedia::VirtualTour {
                url: url.to_string(),
            });
        }
        media.iter().find_map(|item| match item.media_type.as_str() {
            "video" => Some(HeaderMedia::Video {
                url: item.media_url.clone(),
            }),
            "image" => Some(HeaderMedia::Image {
                url: item.media_url.clone(),
            }),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VenueDetail {
    #[serde(flatten)]
    pub venue: Venue,
    pub owner_username: Option<String>,
    pub bookable: bool,
    pub header: Option<HeaderMedia>,
    pub media: Vec<VenueMedia>,
}

#[derive(Debug, Deserialize)]
pub struct CreateVenueRequest {
    pub title: String,
    pub description: Option<String>,
    pub price_per_hour: f64,
    #[serde(default)]
    pub capacity: i64,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub virtual_tour_url: Option<String>,
    #[serde(default)]
    pub media: Vec<NewMedia>,
}

#[derive(Debug, Deserialize)]
pub struct NewMedia {
    pub media_type: String,
    pub media_url: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateVenueStatusRequest {
    pub status: String,
}

const VENUE_COLUMNS: &str = "id, owner_id, title, description, price_per_hour, capacity, status, \
     location, latitude, longitude, virtual_tour_url, created_at";

impl Venue {
    pub async fn find_by_id(db: &SqlitePool, id: i64) -> Result<Option<Venue>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {VENUE_COLUMNS} FROM venues WHERE id = ?"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn list_open(db: &SqlitePool) -> Result<Vec<Venue>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {VENUE_COLUMNS} FROM venues WHERE status = 'open' ORDER BY title ASC"
        ))
        .fetch_all(db)
        .await
    }

    pub async fn insert(
        db: &SqlitePool,
        owner_id: i64,
        req: &CreateVenueRequest,
    ) -> Result<i64, sqlx::Error> {
        let mut tx = db.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO venues (owner_id, title, description, price_per_hour, capacity, status,
                                location, latitude, longitude, virtual_tour_url)
            VALUES (?, ?, ?, ?, ?, 'open', ?, ?, ?, ?)
            "#,
        )
        .bind(owner_id)
        .bind(req.title.trim())
        .bind(&req.description)
        .bind(req.price_per_hour)
        .bind(req.capacity)
        .bind(&req.location)
        .bind(req.latitude)
        .bind(req.longitude)
        .bind(&req.virtual_tour_url)
        .execute(&mut *tx)
        .await?;
        let venue_id = result.last_insert_rowid();

        for item in &req.media {
            sqlx::query("INSERT INTO venue_media (venue_id, media_type, media_url) VALUES (?, ?, ?)")
                .bind(venue_id)
                .bind(&item.media_type)
                .bind(&item.media_url)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(venue_id)
    }

    pub async fn update_status(
        db: &SqlitePool,
        id: i64,
        status: VenueStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE venues SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn owner_username(db: &SqlitePool, owner_id: i64) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as("SELECT username FROM users WHERE id = ?")
            .bind(owner_id)
            .fetch_optional(db)
            .await?;
        Ok(row.map(|r| r.0))
    }

    pub async fn count_all(db: &SqlitePool) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM venues")
            .fetch_one(db)
            .await?;
        Ok(count.0)
    }
}

impl VenueMedia {
    /// Images before videos, oldest first.
    pub async fn list_for_venue(db: &SqlitePool, venue_id: i64) -> Result<Vec<VenueMedia>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT id, venue_id, media_type, media_url, created_at
            FROM venue_media
            WHERE venue_id = ?
            ORDER BY CASE media_type WHEN 'image' THEN 0 WHEN 'video' THEN 1 ELSE 2 END,
                     created_at ASC, id ASC
            "#,
        )
        .bind(venue_id)
        .fetch_all(db)
        .await
    }
}

/// Explicit per-day blocks, independent of reservations.
pub struct UnavailableDate;

impl UnavailableDate {
    /// Dates in `[from, until)`, both `YYYY-MM-DD`.
    pub async fn list_between(
        db: &SqlitePool,
        venue_id: i64,
        from: &str,
        until: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT unavailable_date FROM unavailable_dates
            WHERE venue_id = ? AND unavailable_date >= ? AND unavailable_date < ?
            ORDER BY unavailable_date ASC
            "#,
        )
        .bind(venue_id)
        .bind(from)
        .bind(until)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Returns false when the date was already blocked.
    pub async fn insert(db: &SqlitePool, venue_id: i64, date: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO unavailable_dates (venue_id, unavailable_date) VALUES (?, ?)",
        )
        .bind(venue_id)
        .bind(date)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns false when the date was not blocked.
    pub async fn delete(db: &SqlitePool, venue_id: i64, date: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM unavailable_dates WHERE venue_id = ? AND unavailable_date = ?")
                .bind(venue_id)
                .bind(date)
                .execute(db)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
