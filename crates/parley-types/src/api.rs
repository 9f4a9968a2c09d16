use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Message;

// -- JWT Claims --

/// JWT claims shared between the REST middleware and the WebSocket upgrade
/// authentication. Canonical definition lives here in parley-types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub username: String,
    pub token: String,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub peer_username: String,
}

/// One conversation from the requester's point of view.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub peer_id: i64,
    pub peer_username: String,
    pub blocked_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// -- History --

/// Boundary metadata for a history window. `previous_id`/`next_id` name the
/// messages immediately adjacent to the window in full history; they signal
/// "more in that direction", not counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowMetadata {
    pub previous_id: Option<i64>,
    pub next_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
    /// Absent for an empty window.
    pub metadata: Option<WindowMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub until_message_id: i64,
}

// -- Devices --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterDeviceRequest {
    pub token: String,
}

// -- Push notifier --

/// Payload posted to the external push notifier when the recipient has no
/// live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushNotification {
    pub device_token: String,
    pub user_id: i64,
    pub conversation_id: i64,
    pub from_username: String,
    pub text: String,
}
