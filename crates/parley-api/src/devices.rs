use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use parley_types::api::{Claims, RegisterDeviceRequest};

use crate::auth::AppState;
use crate::error::ApiError;

/// Register or replace the requester's push device token. One token per user;
/// the dispatcher looks it up when the recipient has no live connection.
pub async fn register_device(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterDeviceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.token.is_empty() {
        return Err(ApiError::BadRequest("token must not be empty".into()));
    }

    state.db.upsert_device_token(claims.sub, &req.token)?;
    info!("{} ({}) registered a push device", claims.username, claims.sub);

    Ok(StatusCode::NO_CONTENT)
}
