use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use parley_types::api::Claims;

use crate::error::ApiError;

/// Decode a bearer token into its claims.
pub fn decode_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?;
    Ok(token_data.claims)
}

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized)?;

    let secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());

    let claims = decode_token(&secret, token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
