//! Gateway opcodes, domain events, and wire-format messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::community::CommunityUpdates;
use crate::models::message::{
    DeleteScope, MessageContent, MessageType, MessageView, Reaction, ReactionAction,
};
use crate::models::user::UserProfile;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_HEARTBEAT_ACK: u8 = 6;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A frame sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH frame (op=0) for a domain event.
    pub fn event(event: &ServerEvent, seq: u64) -> serde_json::Result<Self> {
        let mut tagged = serde_json::to_value(event)?;
        let d = tagged.get_mut("d").map(Value::take).unwrap_or(Value::Null);
        let t = tagged.get("t").and_then(Value::as_str).map(str::to_owned);
        Ok(Self {
            op: OP_DISPATCH,
            t,
            s: Some(seq),
            d,
        })
    }

    /// Build a HEARTBEAT_ACK frame (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

/// Events the server dispatches to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "t",
    content = "d",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// First frame of every session.
    Ready {
        connection_id: String,
        user: UserProfile,
        heartbeat_interval: u64,
    },
    /// Community ids the connection joined at connect time.
    UserCommunities(Vec<String>),
    UserOnline {
        community_id: String,
        user_id: String,
        user_name: String,
        timestamp: DateTime<Utc>,
    },
    UserOffline {
        community_id: String,
        user_id: String,
        user_name: String,
        last_seen_at: DateTime<Utc>,
    },
    JoinedCommunity {
        community_id: String,
    },
    LeftCommunity {
        community_id: String,
    },
    UserJoinedCommunity {
        community_id: String,
        user_id: String,
        user_name: String,
        timestamp: DateTime<Utc>,
    },
    UserLeftCommunity {
        community_id: String,
        user_id: String,
        user_name: String,
        timestamp: DateTime<Utc>,
    },
    /// Online user ids of a room.
    RoomUsers {
        community_id: String,
        users: Vec<String>,
    },
    NewMessage {
        message: Box<MessageView>,
        correlation_token: Option<String>,
    },
    MessageSent {
        correlation_token: Option<String>,
        message_id: String,
        timestamp: DateTime<Utc>,
    },
    MessageError {
        correlation_token: Option<String>,
        error: String,
    },
    MessageRead {
        message_id: String,
        read_by: String,
        read_at: DateTime<Utc>,
    },
    MessagesMarkedRead {
        community_id: String,
        message_ids: Vec<String>,
    },
    MessageReaction {
        message_id: String,
        reactions: Vec<Reaction>,
        user_id: String,
        emoji: String,
        action: ReactionAction,
    },
    MessageEdited {
        message: Box<MessageView>,
    },
    MessageDeleted {
        message_id: String,
        community_id: String,
        deleted_by: String,
        delete_for: DeleteScope,
    },
    UserTyping {
        community_id: String,
        user_id: String,
        user_name: String,
        is_typing: bool,
    },
    UserPresence {
        community_id: String,
        user_id: String,
        last_seen_at: DateTime<Utc>,
        is_online: bool,
    },
    RemovedFromCommunity {
        community_id: String,
        removed_by: String,
        timestamp: DateTime<Utc>,
    },
    MemberRemoved {
        community_id: String,
        member_id: String,
        removed_by: String,
        timestamp: DateTime<Utc>,
    },
    CommunityUpdated {
        community_id: String,
        updates: CommunityUpdates,
        updated_by: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A frame received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
}

#[derive(Debug, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

/// `send_message` payload. `tempId` is accepted as an alias of the
/// correlation token.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub community_id: String,
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default, alias = "tempId")]
    pub correlation_token: Option<String>,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

/// Domain events a client may send (op=0).
#[derive(Debug, Deserialize)]
#[serde(
    tag = "t",
    content = "d",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinCommunity {
        community_id: String,
    },
    LeaveCommunity {
        community_id: String,
    },
    SendMessage(SendMessagePayload),
    MarkMessageRead {
        message_id: String,
        #[serde(default)]
        community_id: Option<String>,
    },
    MarkAllRead {
        community_id: String,
        #[serde(default)]
        message_ids: Vec<String>,
    },
    AddReaction {
        message_id: String,
        emoji: String,
    },
    EditMessage {
        message_id: String,
        text: String,
    },
    DeleteMessage {
        message_id: String,
        #[serde(default)]
        delete_for: DeleteScope,
    },
    TypingStart {
        community_id: String,
    },
    TypingStop {
        community_id: String,
    },
    RemoveMember {
        community_id: String,
        member_id: String,
    },
    UpdateCommunity {
        community_id: String,
        updates: CommunityUpdates,
    },
    UpdatePresence {},
}

#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("missing event name")]
    MissingName,
    #[error("unknown event {0}")]
    Unknown(String),
    #[error("invalid {event} payload: {reason}")]
    InvalidPayload { event: String, reason: String },
}

const CLIENT_EVENTS: &[&str] = &[
    "join_community",
    "leave_community",
    "send_message",
    "mark_message_read",
    "mark_all_read",
    "add_reaction",
    "edit_message",
    "delete_message",
    "typing_start",
    "typing_stop",
    "remove_member",
    "update_community",
    "update_presence",
];

impl ClientEvent {
    /// Decode the `t`/`d` pair of a dispatch frame. A missing or null `d`
    /// is read as an empty object.
    pub fn parse(name: Option<&str>, data: Value) -> Result<Self, EventParseError> {
        let name = name.ok_or(EventParseError::MissingName)?;
        if !CLIENT_EVENTS.contains(&name) {
            return Err(EventParseError::Unknown(name.to_string()));
        }
        let data = if data.is_null() {
            Value::Object(Default::default())
        } else {
            data
        };
        serde_json::from_value(serde_json::json!({ "t": name, "d": data })).map_err(|e| {
            EventParseError::InvalidPayload {
                event: name.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Best-effort correlation token from a raw `send_message` payload, for
/// tagging the error when the payload itself fails to parse.
pub fn raw_correlation_token(data: &Value) -> Option<String> {
    data.get("correlationToken")
        .or_else(|| data.get("tempId"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}
