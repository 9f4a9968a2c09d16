use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;

use parley_db::history::Cursor;
use parley_types::api::{Claims, HistoryResponse, MarkReadRequest};
use parley_types::models::Message;

use crate::auth::AppState;
use crate::conversations::load_participant_conversation;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before_message_id: Option<i64>,
    pub after_message_id: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

fn cursor_from_query(query: &HistoryQuery) -> Result<Cursor, ApiError> {
    for id in [query.before_message_id, query.after_message_id].into_iter().flatten() {
        if id <= 0 {
            return Err(ApiError::InvalidCursor);
        }
    }

    Ok(match (query.after_message_id, query.before_message_id) {
        (None, None) => Cursor::Initial,
        (Some(after), None) => Cursor::After(after),
        (None, Some(before)) => Cursor::Before(before),
        // Both given: an exclusive bounded range
        (Some(after), Some(before)) => Cursor::Between { after, before },
    })
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    load_participant_conversation(&state.db, conversation_id, claims.sub)?;

    let cursor = cursor_from_query(&query)?;
    let limit = query.limit.min(100);
    let requester = claims.sub;

    // Run blocking DB queries off the async runtime
    let db = state.db.clone();
    let (rows, metadata) = tokio::task::spawn_blocking(move || {
        db.fetch_window(conversation_id, requester, cursor, limit)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Persistence(anyhow::anyhow!("history query join error: {}", e))
    })??;

    let messages: Vec<Message> = rows.into_iter().map(|row| row.into_model()).collect();

    Ok(Json(HistoryResponse { messages, metadata }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    load_participant_conversation(&state.db, conversation_id, claims.sub)?;

    if req.until_message_id <= 0 {
        return Err(ApiError::BadRequest(
            "until_message_id must be positive".into(),
        ));
    }

    let db = state.db.clone();
    let requester = claims.sub;
    tokio::task::spawn_blocking(move || {
        db.mark_read_until(conversation_id, requester, req.until_message_id)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Persistence(anyhow::anyhow!("read-state update join error: {}", e))
    })??;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(after: Option<i64>, before: Option<i64>) -> HistoryQuery {
        HistoryQuery {
            before_message_id: before,
            after_message_id: after,
            limit: default_limit(),
        }
    }

    #[test]
    fn cursor_variants_from_params() {
        assert_eq!(cursor_from_query(&query(None, None)).unwrap(), Cursor::Initial);
        assert_eq!(
            cursor_from_query(&query(Some(5), None)).unwrap(),
            Cursor::After(5)
        );
        assert_eq!(
            cursor_from_query(&query(None, Some(9))).unwrap(),
            Cursor::Before(9)
        );
        assert_eq!(
            cursor_from_query(&query(Some(2), Some(9))).unwrap(),
            Cursor::Between { after: 2, before: 9 }
        );
    }

    #[test]
    fn non_positive_cursor_ids_are_rejected() {
        assert!(matches!(
            cursor_from_query(&query(Some(0), None)),
            Err(ApiError::InvalidCursor)
        ));
        assert!(matches!(
            cursor_from_query(&query(None, Some(-3))),
            Err(ApiError::InvalidCursor)
        ));
    }
}
