use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, ErrorCode};
use crate::context::RequestContext;
use crate::db::{
    format_timestamp, LoginRequest, LoginResponse, NewUser, RegisterRequest,
    ResendVerificationRequest, Role, Session, Storage, User, UserResponse,
};
use crate::validation::{non_blank, validate_email, validate_password, validate_username, FieldErrors};
use crate::AppState;

const GUEST_USERNAME: &str = "guest";
const GUEST_EMAIL: &str = "guest@ventech.local";

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub status: String,
    pub user_id: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: &'static str,
    pub message: String,
}

impl StatusMessage {
    fn success(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: "success",
            message: message.into(),
        })
    }
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// 32 random bytes, hex encoded
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn hash_or_internal(password: &str) -> Result<String, ApiError> {
    hash_password(password).map_err(|e| {
        tracing::error!(error = %e, "Failed to hash password");
        ApiError::internal("Failed to hash password")
    })
}

/// Open a session for `user_id` and return its bearer token.
async fn create_session(state: &AppState, user_id: i64) -> Result<String, ApiError> {
    let token = generate_token();
    let token_hash = hash_token(&token);
    let ttl = chrono::Duration::days(state.config.auth.session_ttl_days.max(1));
    let expires_at = format_timestamp(state.clock.now() + ttl);
    let session_id = uuid::Uuid::new_v4().to_string();

    state
        .storage
        .run(Session::insert(&state.db, &session_id, user_id, &token_hash, &expires_at))
        .await?;
    Ok(token)
}

async fn login_response(state: &AppState, user: User) -> Result<Json<LoginResponse>, ApiError> {
    let token = create_session(state, user.id).await?;
    info!(user_id = user.id, role = %user.role(), "User signed in");
    Ok(Json(LoginResponse {
        status: "success",
        token,
        user: UserResponse::from(user),
    }))
}

fn log_verification_link(user_id: i64, token: &str) {
    // Mail delivery is not wired up; the link is only logged
    info!(user_id, "Verification link: /api/auth/verify?token={}", token);
}

/// Register endpoint. New accounts start unverified.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let username = request.username.trim();
    let email = request.email.trim();

    let mut errors = FieldErrors::new();
    errors.check("username", validate_username(username));
    errors.check("email", validate_email(email));
    errors.check(
        "password",
        validate_password(&request.password, state.config.auth.min_password_length),
    );
    let role = match non_blank(&request.role) {
        None => Role::User,
        Some(raw) => match Role::parse(raw) {
            Some(role @ (Role::User | Role::Owner)) => role,
            _ => {
                errors.add("role", "Role must be user or owner");
                Role::User
            }
        },
    };
    errors.finish()?;

    let password_hash = hash_or_internal(&request.password)?;
    let token = generate_token();
    let new_user = NewUser {
        username,
        email,
        password_hash: &password_hash,
        role,
        client_name: non_blank(&request.client_name),
        contact_number: non_blank(&request.contact_number),
        client_address: non_blank(&request.client_address),
        email_verified_at: None,
        email_verification_token: Some(&token),
    };

    let user_id = match state.storage.run(User::insert(&state.db, &new_user)).await {
        Ok(id) => id,
        Err(err) if err.is_unique_violation() => {
            return Err(ApiError::conflict("Username or email is already registered"));
        }
        Err(err) => return Err(err.into()),
    };

    info!(user_id, username, role = %role, "Account registered");
    log_verification_link(user_id, &token);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            status: "success".to_string(),
            user_id,
            message: "Registration successful. Check your email to verify your account."
                .to_string(),
        }),
    ))
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let login = request.email_or_username.trim();
    let user = state
        .storage
        .run(User::find_by_login(&state.db, login))
        .await?
        .filter(|user| verify_password(&request.password, &user.password_hash))
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    if !user.is_verified() {
        return Err(ApiError::new(
            ErrorCode::EmailNotVerified,
            "Please verify your email before signing in",
        ));
    }

    login_response(&state, user).await
}

/// Sign in as the shared guest account, creating it on first use.
pub async fn login_as_guest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LoginResponse>, ApiError> {
    if let Some(guest) = state.storage.run(User::find_guest(&state.db)).await? {
        return login_response(&state, guest).await;
    }

    // Nobody can sign in with this password; guests only get sessions
    let password_hash = hash_or_internal(&generate_token())?;
    let verified_at = format_timestamp(state.clock.now());
    let new_guest = NewUser {
        username: GUEST_USERNAME,
        email: GUEST_EMAIL,
        password_hash: &password_hash,
        role: Role::Guest,
        client_name: None,
        contact_number: None,
        client_address: None,
        email_verified_at: Some(&verified_at),
        email_verification_token: None,
    };

    match state.storage.run(User::insert(&state.db, &new_guest)).await {
        Ok(id) => info!(user_id = id, "Guest account created"),
        // A concurrent request created it first
        Err(err) if err.is_unique_violation() => {}
        Err(err) => return Err(err.into()),
    }

    let guest = state
        .storage
        .run(User::find_guest(&state.db))
        .await?
        .ok_or_else(|| ApiError::internal("Guest account is missing"))?;
    login_response(&state, guest).await
}

pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<StatusMessage>, ApiError> {
    let invalid = || ApiError::new(ErrorCode::InvalidToken, "Invalid or expired verification link");

    let token = query.token.trim();
    if token.is_empty() {
        return Err(invalid());
    }

    let user = state
        .storage
        .run(User::find_by_verification_token(&state.db, token))
        .await?
        .ok_or_else(invalid)?;

    let at = format_timestamp(state.clock.now());
    if !state.storage.run(User::mark_verified(&state.db, user.id, &at)).await? {
        return Err(invalid());
    }

    info!(user_id = user.id, "Email verified");
    Ok(StatusMessage::success("Email verified. You can now sign in."))
}

pub async fn resend_verification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResendVerificationRequest>,
) -> Result<Json<StatusMessage>, ApiError> {
    let user = state
        .storage
        .run(User::find_by_login(&state.db, request.email_or_username.trim()))
        .await?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;

    if user.is_verified() {
        return Err(ApiError::conflict("Email is already verified"));
    }

    let token = generate_token();
    state
        .storage
        .run(User::set_verification_token(&state.db, user.id, &token))
        .await?;
    log_verification_link(user.id, &token);

    Ok(StatusMessage::success("A new verification link has been sent"))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusMessage>, ApiError> {
    let token = extract_token(&headers).ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
    state
        .storage
        .run(Session::delete_by_token_hash(&state.db, &hash_token(&token)))
        .await?;
    Ok(StatusMessage::success("Signed out"))
}

pub async fn me(current: CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::from(current.user))
}

/// Create the configured admin account when it does not exist yet.
pub async fn ensure_admin_user(
    storage: &Storage,
    email: &str,
    password: &str,
) -> anyhow::Result<()> {
    if storage.run(User::find_by_login(storage.pool(), email)).await?.is_some() {
        return Ok(());
    }

    let password_hash = hash_password(password)
        .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {}", e))?;
    let verified_at = format_timestamp(chrono::Utc::now());
    let id = storage
        .run(User::insert(
            storage.pool(),
            &NewUser {
                username: "admin",
                email,
                password_hash: &password_hash,
                role: Role::Admin,
                client_name: None,
                contact_number: None,
                client_address: None,
                email_verified_at: Some(&verified_at),
                email_verification_token: None,
            },
        ))
        .await?;

    info!(user_id = id, email, "Created admin user");
    Ok(())
}

/// Extract the bearer token from request headers
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("Authorization").and_then(|h| h.to_str().ok())?;
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Resolve a bearer token to its account.
pub async fn get_current_user(state: &AppState, token: &str) -> Result<User, ApiError> {
    let now = format_timestamp(state.clock.now());
    let session = state
        .storage
        .run(Session::find_valid(&state.db, &hash_token(token), &now))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Session expired or invalid"))?;

    state
        .storage
        .run(User::find_by_id(&state.db, session.user_id))
        .await?
        .ok_or_else(|| {
            warn!(user_id = session.user_id, "Session refers to a missing user");
            ApiError::unauthorized("Session expired or invalid")
        })
}

/// The signed-in account and the request context built from it.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub ctx: RequestContext,
}

impl CurrentUser {
    fn new(state: &AppState, user: User) -> Self {
        let ctx = RequestContext::for_user(user.id, user.role(), state.clock.clone());
        Self { user, ctx }
    }

    pub fn id(&self) -> i64 {
        self.user.id
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.ctx.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Admin access required"))
        }
    }

    /// The venue owner or an admin.
    pub fn require_owner_of(&self, owner_id: i64) -> Result<(), ApiError> {
        if self.ctx.is_admin() || (self.ctx.role == Role::Owner && self.user.id == owner_id) {
            Ok(())
        } else {
            Err(ApiError::forbidden("Only the venue owner can do this"))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        let user = get_current_user(state, &token).await?;
        Ok(CurrentUser::new(state, user))
    }
}

/// Context for endpoints that also serve anonymous visitors. A token that
/// is present but invalid is still rejected.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<CurrentUser>);

impl MaybeUser {
    pub fn context(&self, state: &AppState) -> RequestContext {
        match &self.0 {
            Some(current) => current.ctx.clone(),
            None => state.anonymous_context(),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match extract_token(&parts.headers) {
            None => Ok(MaybeUser(None)),
            Some(token) => {
                let user = get_current_user(state, &token).await?;
                Ok(MaybeUser(Some(CurrentUser::new(state, user))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret-pass", "not-a-hash"));
    }

    #[test]
    fn test_tokens_are_random_and_hashed() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), a);
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);

        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_token(&headers), None);

        headers.insert("Authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc123"));
    }
}
