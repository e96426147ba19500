mod models;
mod store;

pub use models::*;
pub use store::Storage;

use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub type DbPool = SqlitePool;

/// Failure talking to the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store call exceeded {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// True when the error came from a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

/// Run a store future under the request timeout.
pub async fn timed<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path, acquire_timeout: Duration) -> Result<DbPool> {
    let db_path = data_dir.join("ventech.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(acquire_timeout)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Single-connection in-memory database with the full schema.
pub async fn init_in_memory() -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let found: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Users and sessions
    if !table_exists(pool, "users").await? {
        execute_sql(pool, include_str!("../../migrations/001_users.sql")).await?;
    }

    // Migration 002: Venues, media and unavailable dates
    if !table_exists(pool, "venues").await? {
        execute_sql(pool, include_str!("../../migrations/002_venues.sql")).await?;
    }

    // Migration 003: Reservations with the one-pending-per-user index
    if !table_exists(pool, "reservations").await? {
        execute_sql(pool, include_str!("../../migrations/003_reservations.sql")).await?;
    }

    // Migration 004: Chat messages
    if !table_exists(pool, "chat_messages").await? {
        execute_sql(pool, include_str!("../../migrations/004_chat.sql")).await?;
    }

    info!("Migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        for table in ["users", "sessions", "venues", "venue_media", "unavailable_dates", "reservations", "chat_messages"] {
            assert!(table_exists(&pool, table).await.unwrap(), "missing {table}");
        }
    }

    #[tokio::test]
    async fn test_file_database_created_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init(dir.path(), Duration::from_secs(5)).await.unwrap();
        assert!(dir.path().join("ventech.db").exists());
        pool.close().await;
    }

    #[tokio::test]
    async fn test_timed_reports_timeout() {
        let result: Result<(), StoreError> = timed(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }
}
