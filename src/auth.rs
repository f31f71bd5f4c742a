use std::sync::Arc;

use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::accounts::{Account, AccountStore, NewAccount, Role};
use crate::error::{AppError, AppResult};
use crate::extractor::{AuthUser, Claims};

const MIN_PASSWORD_LEN: usize = 6;
const MAX_NAME_LEN: usize = 50;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub token: String,
}

pub fn routes() -> Router {
    Router::new()
        .route("/api/auth/register", post(register_user))
        .route("/api/auth/login", post(login_user))
        .route("/api/auth/logout", post(logout_user))
        .route("/api/auth/me", get(current_user))
}

pub async fn register_user(
    Extension(store): Extension<Arc<dyn AccountStore>>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Account>)> {
    let name = payload.name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::BadRequest(format!(
            "Name is required and at most {MAX_NAME_LEN} characters"
        )));
    }
    if !looks_like_email(&payload.email) {
        return Err(AppError::BadRequest("Please include a valid email".into()));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest("Password too short".into()));
    }
    let role = payload.role.unwrap_or(Role::Student);
    if role == Role::Admin {
        return Err(AppError::BadRequest("Please specify a valid role".into()));
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|e| AppError::Message(format!("Hashing failed: {}", e)))?;

    let account = store
        .create(NewAccount {
            email: payload.email,
            name: name.to_string(),
            password_hash: hash.to_string(),
            role,
            profile: json!({}),
        })
        .await?;
    info!(account_id = account.id, role = %account.role, "account registered");
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn login_user(
    Extension(store): Extension<Arc<dyn AccountStore>>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<TokenResponse>)> {
    let account = store
        .find_by_email(&payload.email)
        .await?
        .ok_or(AppError::Unauthorized)?;
    let parsed = PasswordHash::new(&account.password_hash).map_err(|e| {
        error!(?e, account_id = account.id, "Hash parse error");
        AppError::Message(format!("Hash error: {}", e))
    })?;
    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed)
        .is_err()
    {
        return Err(AppError::Unauthorized);
    }

    let token = issue_token(&account)?;
    let mut headers = HeaderMap::new();
    let cookie: axum::http::HeaderValue = format!("auth_token={token}; HttpOnly; Secure; SameSite=Strict; Path=/")
        .parse()
        .map_err(|_| AppError::Message("Token error".into()))?;
    headers.insert(axum::http::header::SET_COOKIE, cookie);
    Ok((headers, Json(TokenResponse { token })))
}

pub async fn logout_user() -> (HeaderMap, &'static str) {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        axum::http::HeaderValue::from_static("auth_token=deleted; HttpOnly; Path=/; Max-Age=0"),
    );
    (headers, "Logged out")
}

pub async fn current_user(
    Extension(store): Extension<Arc<dyn AccountStore>>,
    AuthUser { account_id, .. }: AuthUser,
) -> AppResult<Json<Account>> {
    Ok(Json(store.find_by_id(account_id).await?))
}

pub fn issue_token(account: &Account) -> AppResult<String> {
    let exp = Utc::now()
        .checked_add_signed(Duration::hours(*crate::config::JWT_TTL_HOURS))
        .ok_or_else(|| AppError::Message("Token error".into()))?
        .timestamp() as usize;
    let claims = Claims {
        sub: account.id,
        role: account.role.to_string(),
        exp,
    };
    let secret = crate::config::JWT_SECRET.as_str();
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!(?e, "Token encoding error");
        AppError::Message("Token error".into())
    })
}

fn looks_like_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}
