use crate::api::state::AppState;
use crate::api_response::ApiResponse;
use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::security::{hash_password, verify_password, TokenKind, TokenPair};
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Extracts and verifies the bearer access token, yielding the caller's
/// user id. Grounded in `restflow-server`'s `auth_middleware`, reshaped
/// as a per-handler extractor (axum 0.8's `FromRequestParts`) rather than
/// a global middleware so public routes (firewall intake) are unaffected.
pub struct AuthUser(pub Uuid);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::AuthRequired)?;
        let token = header.strip_prefix("Bearer ").ok_or(AppError::AuthRequired)?;
        let user_id = state.jwt.verify(token, TokenKind::Access)?;
        Ok(AuthUser(user_id))
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

fn auth_response(user: User, pair: TokenPair) -> AuthResponse {
    AuthResponse { access_token: pair.access_token, refresh_token: pair.refresh_token, user }
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<ApiResponse<AuthResponse>>> {
    if req.password.len() < 8 {
        return Err(AppError::InvalidInput("password must be at least 8 characters".to_string()));
    }
    let password_hash = hash_password(&req.password)?;
    let user = User::new(req.email, Some(password_hash), req.full_name);
    state.storage.users.insert(&user).map_err(|err| AppError::Conflict(err.to_string()))?;
    let pair = state.jwt.issue(user.id)?;
    Ok(ApiResponse::ok(auth_response(user, pair)))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<AuthResponse>>> {
    let mut user = state
        .storage
        .users
        .get_by_email(&req.email)
        .map_err(AppError::from)?
        .ok_or(AppError::AuthInvalid)?;
    let hash = user.password_hash.as_deref().ok_or(AppError::AuthInvalid)?;
    if !verify_password(&req.password, hash) {
        return Err(AppError::AuthInvalid);
    }
    if !user.active {
        return Err(AppError::Forbidden("account deactivated".to_string()));
    }
    user.last_login = Some(chrono::Utc::now());
    state.storage.users.update(&user).map_err(AppError::from)?;
    let pair = state.jwt.issue(user.id)?;
    Ok(ApiResponse::ok(auth_response(user, pair)))
}

async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Json<ApiResponse<TokenPair>>> {
    let pair = state.jwt.refresh(&req.refresh_token)?;
    Ok(ApiResponse::ok(pair))
}

async fn me(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> AppResult<Json<ApiResponse<User>>> {
    let user = state.storage.users.get(user_id).map_err(AppError::from)?.ok_or(AppError::NotFound("user".to_string()))?;
    Ok(ApiResponse::ok(user))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/me", get(me))
}
