use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::{message_edits, message_reactions, message_receipts, messages};
use crate::models::user::UserProfile;

/// Maximum length of a text message body.
pub const MAX_TEXT_LEN: usize = 4000;

/// Content shown in place of a message deleted for everyone.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

/// Longest community list preview, in characters.
const PREVIEW_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    File,
    System,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "text" => Self::Text,
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "file" => Self::File,
            "system" => Self::System,
            _ => return None,
        })
    }
}

/// Structured message body: text and/or file metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Audio/video length in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Trimmed text, if any non-whitespace text is present.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn has_file(&self) -> bool {
        self.file_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

/// Who a deletion applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    /// Hide the message for the caller only.
    #[default]
    Me,
    /// Replace the content for every member.
    Everyone,
}

/// A read or delivered marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub user_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    Read,
    Delivered,
}

impl ReceiptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Delivered => "delivered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EditEntry {
    pub content: String,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

/// A durable community message with all of its mutable decoration.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub community_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub content: MessageContent,
    pub reply_to: Option<String>,
    pub mentions: Vec<String>,
    pub reactions: Vec<Reaction>,
    pub read_by: Vec<Receipt>,
    pub delivered_to: Vec<Receipt>,
    pub edit_history: Vec<EditEntry>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Users who hid this message for themselves only.
    pub deleted_for: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn delivery_status(&self) -> DeliveryStatus {
        if !self.read_by.is_empty() {
            DeliveryStatus::Read
        } else if !self.delivered_to.is_empty() {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Sent
        }
    }

    pub fn is_hidden_for(&self, user_id: &str) -> bool {
        self.deleted_for.iter().any(|u| u == user_id)
    }

    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }

    /// The community list preview for this message.
    pub fn preview(&self) -> String {
        match self.message_type {
            MessageType::Text => {
                let text = self.content.trimmed_text().unwrap_or_default();
                text.chars().take(PREVIEW_MAX_CHARS).collect()
            }
            other => format!("Sent a {}", other.as_str()),
        }
    }

    /// Toggle `(user_id, emoji)`; returns which action happened.
    pub fn toggle_reaction(&mut self, user_id: &str, emoji: &str, at: DateTime<Utc>) -> ReactionAction {
        let before = self.reactions.len();
        self.reactions
            .retain(|r| !(r.user_id == user_id && r.emoji == emoji));
        if self.reactions.len() < before {
            return ReactionAction::Remove;
        }
        self.reactions.push(Reaction {
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
            created_at: at,
        });
        ReactionAction::Add
    }
}

/// Abbreviated form of the message being replied to.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: String,
    pub sender_id: String,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for ReplyPreview {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.clone(),
            sender_id: m.sender_id.clone(),
            content: m.content.clone(),
            created_at: m.created_at,
        }
    }
}

/// A message populated for clients: sender profile, reply target and
/// mentioned users resolved.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Option<UserProfile>,
    pub reply_target: Option<ReplyPreview>,
    pub mentioned_users: Vec<UserProfile>,
    pub delivery_status: DeliveryStatus,
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = messages)]
pub struct MessageRow {
    pub id: String,
    pub community_id: String,
    pub sender_id: String,
    pub message_type: String,
    pub content: serde_json::Value,
    pub reply_to: Option<String>,
    pub mentions: Vec<String>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_for: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub community_id: &'a str,
    pub sender_id: &'a str,
    pub message_type: &'a str,
    pub content: serde_json::Value,
    pub reply_to: Option<&'a str>,
    pub mentions: &'a [String],
    pub is_edited: bool,
    pub is_deleted: bool,
    pub deleted_for: &'a [String],
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = message_reactions)]
pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = message_receipts)]
pub struct ReceiptRow {
    pub message_id: String,
    pub user_id: String,
    pub kind: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = message_edits)]
pub struct EditRow {
    pub message_id: String,
    pub content: String,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = message_edits)]
pub struct NewEdit<'a> {
    pub message_id: &'a str,
    pub content: &'a str,
    pub edited_at: DateTime<Utc>,
}
