use std::sync::Arc;

use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};

use parley_db::Database;
use parley_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::BadRequest(
            "username must be 3-32 characters".into(),
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }

    if state.db.get_user_by_username(&req.username)?.is_some() {
        return Err(ApiError::Conflict("username is taken".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = state.db.create_user(&req.username, &password_hash)?;

    let token = create_token(&state.jwt_secret, user_id, &req.username)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_username(&req.username)?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored password hash unreadable: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let token = create_token(&state.jwt_secret, user.id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

fn create_token(secret: &str, user_id: i64, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
