use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use parley_db::Database;
use parley_db::models::ConversationRow;
use parley_types::api::{Claims, ConversationSummary, CreateConversationRequest};

use crate::auth::AppState;
use crate::error::ApiError;

/// Load a conversation and check the requester participates in it. A missing
/// conversation and a foreign one are indistinguishable to the caller.
pub fn load_participant_conversation(
    db: &Database,
    conversation_id: i64,
    user_id: i64,
) -> Result<ConversationRow, ApiError> {
    let conversation = db
        .get_conversation(conversation_id)?
        .ok_or(ApiError::ConversationNotFound)?;
    if !conversation.is_participant(user_id) {
        return Err(ApiError::ConversationNotFound);
    }
    Ok(conversation)
}

/// The Authorizing step for a live-channel upgrade: the conversation must
/// exist for the requesting participant and must not be blocked by either
/// side. Any error here rejects the upgrade before a socket opens.
pub fn authorize_live_channel(
    db: &Database,
    conversation_id: i64,
    user_id: i64,
) -> Result<ConversationRow, ApiError> {
    let conversation = load_participant_conversation(db, conversation_id, user_id)?;
    if conversation.blocked_by.is_some() {
        return Err(ApiError::ConversationBlocked);
    }
    Ok(conversation)
}

/// Create the conversation with a peer, or return the existing one for the
/// pair. Created once per unordered pair, never deleted.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let peer = state
        .db
        .get_user_by_username(&req.peer_username)?
        .ok_or_else(|| ApiError::BadRequest("no such user".into()))?;

    if peer.id == claims.sub {
        return Err(ApiError::BadRequest(
            "cannot start a conversation with yourself".into(),
        ));
    }

    let conversation = state.db.create_or_get_conversation(claims.sub, peer.id)?;
    info!(
        "{} ({}) opened conversation {} with {}",
        claims.username, claims.sub, conversation.id, peer.username
    );

    Ok((
        StatusCode::CREATED,
        Json(ConversationSummary {
            id: conversation.id,
            peer_id: peer.id,
            peer_username: peer.username,
            blocked_by: conversation.blocked_by,
            created_at: conversation.into_model().created_at,
        }),
    ))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.db.conversations_for_user(claims.sub)?;

    let summaries: Vec<ConversationSummary> = conversations
        .into_iter()
        .map(|(row, peer_username)| {
            let peer_id = if row.user_low == claims.sub {
                row.user_high
            } else {
                row.user_low
            };
            ConversationSummary {
                id: row.id,
                peer_id,
                peer_username,
                blocked_by: row.blocked_by,
                created_at: row.into_model().created_at,
            }
        })
        .collect();

    Ok(Json(summaries))
}

pub async fn block_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = load_participant_conversation(&state.db, conversation_id, claims.sub)?;

    match conversation.blocked_by {
        Some(by) if by != claims.sub => {
            return Err(ApiError::Conflict(
                "conversation is blocked by the other participant".into(),
            ));
        }
        _ => {}
    }

    state
        .db
        .set_conversation_blocked(conversation_id, Some(claims.sub))?;
    info!(
        "{} ({}) blocked conversation {}",
        claims.username, claims.sub, conversation_id
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Only the participant who set the block can clear it.
pub async fn unblock_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = load_participant_conversation(&state.db, conversation_id, claims.sub)?;

    match conversation.blocked_by {
        None => {}
        Some(by) if by == claims.sub => {
            state.db.set_conversation_blocked(conversation_id, None)?;
            info!(
                "{} ({}) unblocked conversation {}",
                claims.username, claims.sub, conversation_id
            );
        }
        Some(_) => {
            return Err(ApiError::Conflict(
                "conversation is blocked by the other participant".into(),
            ));
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_db::Database;

    fn seeded_db() -> (Database, i64, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", "hash-a").unwrap();
        let bob = db.create_user("bob", "hash-b").unwrap();
        let conv = db.create_or_get_conversation(alice, bob).unwrap();
        (db, conv.id, alice, bob)
    }

    #[test]
    fn upgrade_rejected_for_missing_conversation() {
        let (db, conv, alice, _) = seeded_db();

        assert!(matches!(
            authorize_live_channel(&db, conv + 1, alice),
            Err(ApiError::ConversationNotFound)
        ));
    }

    #[test]
    fn upgrade_rejected_for_non_participant() {
        let (db, conv, _, _) = seeded_db();
        let carol = db.create_user("carol", "hash-c").unwrap();

        // A foreign conversation looks exactly like a missing one
        assert!(matches!(
            authorize_live_channel(&db, conv, carol),
            Err(ApiError::ConversationNotFound)
        ));
    }

    #[test]
    fn upgrade_rejected_while_blocked() {
        let (db, conv, alice, bob) = seeded_db();
        db.set_conversation_blocked(conv, Some(bob)).unwrap();

        // Blocked for both sides, blocker included
        for user in [alice, bob] {
            assert!(matches!(
                authorize_live_channel(&db, conv, user),
                Err(ApiError::ConversationBlocked)
            ));
        }
    }

    #[test]
    fn upgrade_allowed_for_participants() {
        let (db, conv, alice, bob) = seeded_db();

        for user in [alice, bob] {
            let row = authorize_live_channel(&db, conv, user).unwrap();
            assert_eq!(row.id, conv);
        }
    }
}
