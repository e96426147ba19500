//! User and session models.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Account role. Owners (called "clients" in older data) manage venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    User,
    Owner,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Owner => "owner",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "guest" => Some(Role::Guest),
            "user" => Some(Role::User),
            "owner" | "client" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub client_name: Option<String>,
    pub contact_number: Option<String>,
    pub client_address: Option<String>,
    pub email_verified_at: Option<String>,
    pub email_verification_token: Option<String>,
    pub created_at: String,
}

impl User {
    /// Unknown role strings are treated as the least privileged role.
    pub fn role(&self) -> Role {
        Role::parse(&self.role).unwrap_or(Role::Guest)
    }

    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            role: user.role(),
            email_verified: user.is_verified(),
            username: user.username,
            email: user.email,
        }
    }
}

/// Someone the current user can open a conversation with.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Contact {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email_or_username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<String>,
    pub client_name: Option<String>,
    pub contact_number: Option<String>,
    pub client_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResendVerificationRequest {
    pub email_or_username: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub status: &'static str,
    pub token: String,
    pub user: UserResponse,
}

/// Fields of a new account row.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
    pub client_name: Option<&'a str>,
    pub contact_number: Option<&'a str>,
    pub client_address: Option<&'a str>,
    pub email_verified_at: Option<&'a str>,
    pub email_verification_token: Option<&'a str>,
}

const USER_COLUMNS: &str = "id, username, email, password_hash, role, client_name, contact_number, \
     client_address, email_verified_at, email_verification_token, created_at";

impl User {
    pub async fn find_by_id(db: &SqlitePool, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Look up by email first, then by username.
    pub async fn find_by_login(db: &SqlitePool, login: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ? OR username = ? \
             ORDER BY CASE WHEN email = ? THEN 0 ELSE 1 END LIMIT 1"
        ))
        .bind(login)
        .bind(login)
        .bind(login)
        .fetch_optional(db)
        .await
    }

    /// Unverified account holding this verification token.
    pub async fn find_by_verification_token(
        db: &SqlitePool,
        token: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE email_verification_token = ? AND email_verified_at IS NULL LIMIT 1"
        ))
        .bind(token)
        .fetch_optional(db)
        .await
    }

    pub async fn find_guest(db: &SqlitePool) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = 'guest' ORDER BY id ASC LIMIT 1"
        ))
        .fetch_optional(db)
        .await
    }

    pub async fn insert(db: &SqlitePool, user: &NewUser<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (username, email, password_hash, role, client_name, contact_number,
                               client_address, email_verified_at, email_verification_token)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.role.as_str())
        .bind(user.client_name)
        .bind(user.contact_number)
        .bind(user.client_address)
        .bind(user.email_verified_at)
        .bind(user.email_verification_token)
        .execute(db)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn set_verification_token(
        db: &SqlitePool,
        id: i64,
        token: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET email_verification_token = ? WHERE id = ?")
            .bind(token)
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Returns false when the account was already verified.
    pub async fn mark_verified(db: &SqlitePool, id: i64, at: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET email_verified_at = ?, email_verification_token = NULL \
             WHERE id = ? AND email_verified_at IS NULL",
        )
        .bind(at)
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_all(db: &SqlitePool) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(db)
            .await?;
        Ok(count.0)
    }

    /// Owners talk to everyone who is not an owner; everyone else talks to owners.
    pub async fn contacts_for(
        db: &SqlitePool,
        user_id: i64,
        role: Role,
    ) -> Result<Vec<Contact>, sqlx::Error> {
        let sql = if role == Role::Owner {
            "SELECT id, username FROM users WHERE role NOT IN ('owner', 'client') AND id != ? \
             ORDER BY username ASC"
        } else {
            "SELECT id, username FROM users WHERE role IN ('owner', 'client') AND id != ? \
             ORDER BY username ASC"
        };
        sqlx::query_as(sql).bind(user_id).fetch_all(db).await
    }
}

impl Session {
    pub async fn insert(
        db: &SqlitePool,
        id: &str,
        user_id: i64,
        token_hash: &str,
        expires_at: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Session for this token hash that has not expired at `now`.
    pub async fn find_valid(
        db: &SqlitePool,
        token_hash: &str,
        now: &str,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, user_id, token_hash, expires_at, created_at FROM sessions \
             WHERE token_hash = ? AND expires_at > ?",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(db)
        .await
    }

    pub async fn delete_by_token_hash(db: &SqlitePool, token_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(db)
            .await?;
        Ok(())
    }
}
