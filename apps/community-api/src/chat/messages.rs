//! Message send, history, receipts, reactions, edit and delete.
//!
//! Every mutation is written to the message store before any event leaves
//! the process. Secondary writes after a successful send (community preview,
//! unread counters) are best-effort and only logged on failure.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use community_common::id::{prefix, prefixed_ulid};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::gateway::events::{SendMessagePayload, ServerEvent};
use crate::gateway::fanout::Delivery;
use crate::models::message::{
    DeleteScope, Message, MessageContent, MessageType, MessageView, Reaction, ReactionAction,
    ReceiptKind, Receipt, ReplyPreview, MAX_TEXT_LEN,
};
use crate::models::user::UserProfile;
use crate::store::{HistoryCursor, Stores};
use crate::AppState;

use super::{require_active_membership, ChatError};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Longest accepted reaction token, in characters.
const MAX_EMOJI_CHARS: usize = 32;

/// History paging. `before_id` takes precedence over `before` and keeps
/// messages that share the cursor message's timestamp.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub before: Option<DateTime<Utc>>,
    pub before_id: Option<String>,
    pub limit: Option<i64>,
}

/// One page of history, oldest first.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<MessageView>,
    pub has_more: bool,
}

/// Outcome of a reaction toggle.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUpdate {
    pub message_id: String,
    pub action: ReactionAction,
    pub reactions: Vec<Reaction>,
}

/// Validate `content` against `message_type`, returning the content to store.
pub fn validate_content(
    message_type: MessageType,
    mut content: MessageContent,
) -> Result<MessageContent, ChatError> {
    match message_type {
        MessageType::Text => {
            let text = content
                .trimmed_text()
                .ok_or_else(|| ChatError::Validation("Message text is required".into()))?
                .to_string();
            content.text = Some(validate_text(&text)?);
        }
        MessageType::System => {
            return Err(ChatError::Validation(
                "System messages cannot be sent by clients".into(),
            ));
        }
        other => {
            if !content.has_file() {
                return Err(ChatError::Validation(format!(
                    "A file is required for {} messages",
                    other.as_str()
                )));
            }
            if let Some(caption) = content.text.take() {
                let caption = caption.trim();
                if !caption.is_empty() {
                    content.text = Some(validate_text(caption)?);
                }
            }
        }
    }
    Ok(content)
}

fn validate_text(text: &str) -> Result<String, ChatError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ChatError::Validation("Message text is required".into()));
    }
    if text.chars().count() > MAX_TEXT_LEN {
        return Err(ChatError::Validation(format!(
            "Message text cannot exceed {MAX_TEXT_LEN} characters"
        )));
    }
    Ok(text.to_string())
}

/// Resolve sender profiles, reply targets and mentions for a batch of
/// messages, preserving order.
pub async fn populate(stores: &Stores, messages: Vec<Message>) -> Result<Vec<MessageView>, ChatError> {
    let mut user_ids: Vec<String> = messages
        .iter()
        .flat_map(|m| std::iter::once(&m.sender_id).chain(m.mentions.iter()))
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    user_ids.sort();
    let profiles: HashMap<String, UserProfile> = stores
        .users
        .find_users(&user_ids)
        .await?
        .into_iter()
        .map(|u| (u.id.clone(), u))
        .collect();

    let mut replies: HashMap<String, ReplyPreview> = HashMap::new();
    for reply_id in messages.iter().filter_map(|m| m.reply_to.as_deref()) {
        if replies.contains_key(reply_id) {
            continue;
        }
        if let Some(target) = stores.messages.find_message(reply_id).await? {
            replies.insert(reply_id.to_string(), ReplyPreview::from(&target));
        }
    }

    Ok(messages
        .into_iter()
        .map(|message| MessageView {
            sender: profiles.get(&message.sender_id).cloned(),
            reply_target: message
                .reply_to
                .as_deref()
                .and_then(|id| replies.get(id).cloned()),
            mentioned_users: message
                .mentions
                .iter()
                .filter_map(|id| profiles.get(id).cloned())
                .collect(),
            delivery_status: message.delivery_status(),
            message,
        })
        .collect())
}

async fn populate_one(stores: &Stores, message: Message) -> Result<MessageView, ChatError> {
    populate(stores, vec![message])
        .await?
        .pop()
        .ok_or(ChatError::NotFound("message"))
}

async fn load_message(stores: &Stores, message_id: &str) -> Result<Message, ChatError> {
    stores
        .messages
        .find_message(message_id)
        .await?
        .ok_or(ChatError::NotFound("message"))
}

/// Persist a new message and broadcast it to the room.
pub async fn send(
    state: &AppState,
    sender: &UserProfile,
    payload: SendMessagePayload,
) -> Result<MessageView, ChatError> {
    let stores = &state.stores;
    let community_id = payload.community_id;

    require_active_membership(stores, &community_id, &sender.id).await?;
    let content = validate_content(payload.message_type, payload.content)?;

    if let Some(reply_id) = payload.reply_to.as_deref() {
        let target = stores.messages.find_message(reply_id).await?;
        if !target.is_some_and(|t| t.community_id == community_id) {
            return Err(ChatError::NotFound("reply target"));
        }
    }

    let mut mentions = payload.mentions;
    mentions.retain(|m| !m.trim().is_empty());
    let mut seen = HashSet::new();
    mentions.retain(|m| seen.insert(m.clone()));

    let now = Utc::now();
    let message = Message {
        id: prefixed_ulid(prefix::MESSAGE),
        community_id: community_id.clone(),
        sender_id: sender.id.clone(),
        message_type: payload.message_type,
        content,
        reply_to: payload.reply_to,
        mentions,
        reactions: Vec::new(),
        read_by: Vec::new(),
        delivered_to: Vec::new(),
        edit_history: Vec::new(),
        is_edited: false,
        is_deleted: false,
        deleted_at: None,
        deleted_for: Vec::new(),
        created_at: now,
        updated_at: now,
    };

    stores.messages.insert_message(&message).await?;

    if let Err(err) = stores
        .communities
        .record_last_message(&community_id, now, &message.preview())
        .await
    {
        tracing::warn!(?err, %community_id, message_id = %message.id, "failed to update community preview");
    }
    if let Err(err) = stores
        .memberships
        .increment_unread(&community_id, &sender.id)
        .await
    {
        tracing::warn!(?err, %community_id, message_id = %message.id, "failed to bump unread counters");
    }

    // The message is already stored, so a failed lookup must not lose the broadcast.
    let view = match populate_one(stores, message.clone()).await {
        Ok(view) => view,
        Err(err) => {
            tracing::warn!(?err, %community_id, message_id = %message.id, "failed to populate message");
            MessageView {
                sender: Some(sender.clone()),
                reply_target: None,
                mentioned_users: Vec::new(),
                delivery_status: message.delivery_status(),
                message,
            }
        }
    };

    let delivered = state.broadcast.to_room(
        &community_id,
        ServerEvent::NewMessage {
            message: Box::new(view.clone()),
            correlation_token: payload.correlation_token,
        },
        None,
    );
    tracing::debug!(%community_id, message_id = %view.message.id, delivered, "message sent");

    Ok(view)
}

/// Newest page of messages before `before`, returned oldest first. Messages
/// from others are marked delivered to the viewer.
pub async fn history(
    state: &AppState,
    viewer: &UserProfile,
    community_id: &str,
    params: HistoryParams,
) -> Result<HistoryPage, ChatError> {
    let stores = &state.stores;
    require_active_membership(stores, community_id, &viewer.id).await?;

    let cursor = match params.before_id {
        Some(before_id) => {
            let anchor = load_message(stores, &before_id).await?;
            if anchor.community_id != community_id {
                return Err(ChatError::NotFound("message"));
            }
            Some(HistoryCursor {
                created_at: anchor.created_at,
                message_id: Some(before_id),
            })
        }
        None => params.before.map(|created_at| HistoryCursor {
            created_at,
            message_id: None,
        }),
    };

    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let mut messages = stores
        .messages
        .list_messages(community_id, &viewer.id, cursor.as_ref(), limit + 1)
        .await?;
    let has_more = messages.len() as i64 > limit;
    messages.truncate(limit as usize);

    let undelivered: Vec<String> = messages
        .iter()
        .filter(|m| m.sender_id != viewer.id)
        .filter(|m| !m.delivered_to.iter().any(|r| r.user_id == viewer.id))
        .map(|m| m.id.clone())
        .collect();
    if !undelivered.is_empty() {
        let now = Utc::now();
        match stores
            .messages
            .add_receipts(&undelivered, &viewer.id, ReceiptKind::Delivered, now)
            .await
        {
            Ok(marked) => {
                let marked: HashSet<String> = marked.into_iter().collect();
                for m in messages.iter_mut().filter(|m| marked.contains(&m.id)) {
                    m.delivered_to.push(Receipt {
                        user_id: viewer.id.clone(),
                        at: now,
                    });
                }
            }
            Err(err) => {
                tracing::warn!(?err, community_id, user_id = %viewer.id, "failed to mark messages delivered");
            }
        }
    }

    messages.reverse();
    Ok(HistoryPage {
        messages: populate(stores, messages).await?,
        has_more,
    })
}

/// Record a read receipt and tell the sender. Returns whether a new receipt
/// was written.
pub async fn mark_read(
    state: &AppState,
    reader: &UserProfile,
    message_id: &str,
    community_id: Option<&str>,
) -> Result<bool, ChatError> {
    let stores = &state.stores;
    let message = load_message(stores, message_id).await?;
    if community_id.is_some_and(|c| c != message.community_id) {
        return Err(ChatError::NotFound("message"));
    }
    require_active_membership(stores, &message.community_id, &reader.id).await?;

    if message.sender_id == reader.id {
        return Ok(false);
    }

    let now = Utc::now();
    let marked = stores
        .messages
        .add_receipts(&[message.id.clone()], &reader.id, ReceiptKind::Read, now)
        .await?;
    if marked.is_empty() {
        return Ok(false);
    }

    let delivery = state.broadcast.to_user(
        &message.sender_id,
        ServerEvent::MessageRead {
            message_id: message.id.clone(),
            read_by: reader.id.clone(),
            read_at: now,
        },
    );
    if delivery == Delivery::Undelivered {
        tracing::debug!(message_id = %message.id, sender_id = %message.sender_id, "sender offline for read receipt");
    }
    Ok(true)
}

/// Reset the reader's unread counter for a community and mark the given
/// messages read. Returns the ids that gained a receipt.
pub async fn mark_all_read(
    state: &AppState,
    reader: &UserProfile,
    community_id: &str,
    message_ids: &[String],
) -> Result<Vec<String>, ChatError> {
    let stores = &state.stores;
    require_active_membership(stores, community_id, &reader.id).await?;

    let mut senders: HashMap<String, String> = HashMap::new();
    for id in message_ids {
        if let Some(m) = stores.messages.find_message(id).await? {
            if m.community_id == community_id && m.sender_id != reader.id {
                senders.insert(m.id, m.sender_id);
            }
        }
    }

    let now = Utc::now();
    let eligible: Vec<String> = message_ids
        .iter()
        .filter(|id| senders.contains_key(*id))
        .cloned()
        .collect();
    let marked = if eligible.is_empty() {
        Vec::new()
    } else {
        stores
            .messages
            .add_receipts(&eligible, &reader.id, ReceiptKind::Read, now)
            .await?
    };

    let last_read = message_ids.last().map(String::as_str);
    stores
        .memberships
        .mark_all_read(community_id, &reader.id, last_read, now)
        .await?;

    for id in &marked {
        if let Some(sender) = senders.get(id) {
            state.broadcast.to_user(
                sender,
                ServerEvent::MessageRead {
                    message_id: id.clone(),
                    read_by: reader.id.clone(),
                    read_at: now,
                },
            );
        }
    }

    Ok(marked)
}

/// Add or remove the caller's `emoji` reaction and broadcast the new list.
pub async fn toggle_reaction(
    state: &AppState,
    user: &UserProfile,
    message_id: &str,
    emoji: &str,
) -> Result<ReactionUpdate, ChatError> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(ChatError::Validation("Emoji is required".into()));
    }
    if emoji.chars().count() > MAX_EMOJI_CHARS {
        return Err(ChatError::Validation("Emoji is too long".into()));
    }

    let stores = &state.stores;
    let message = load_message(stores, message_id).await?;
    require_active_membership(stores, &message.community_id, &user.id).await?;

    let (action, reactions) = stores
        .messages
        .toggle_reaction(message_id, &user.id, emoji, Utc::now())
        .await?
        .ok_or(ChatError::NotFound("message"))?;

    state.broadcast.to_room(
        &message.community_id,
        ServerEvent::MessageReaction {
            message_id: message_id.to_string(),
            reactions: reactions.clone(),
            user_id: user.id.clone(),
            emoji: emoji.to_string(),
            action,
        },
        None,
    );

    Ok(ReactionUpdate {
        message_id: message_id.to_string(),
        action,
        reactions,
    })
}

/// Replace the text of the caller's own text message, keeping the previous
/// text in the edit history.
pub async fn edit(
    state: &AppState,
    editor: &UserProfile,
    message_id: &str,
    text: &str,
) -> Result<MessageView, ChatError> {
    let stores = &state.stores;
    let message = load_message(stores, message_id).await?;
    if message.sender_id != editor.id {
        return Err(ChatError::Authorization(
            "Only the sender can edit this message".into(),
        ));
    }
    if message.message_type != MessageType::Text {
        return Err(ChatError::Validation(
            "Only text messages can be edited".into(),
        ));
    }
    if message.is_deleted {
        return Err(ChatError::Validation(
            "Deleted messages cannot be edited".into(),
        ));
    }
    require_active_membership(stores, &message.community_id, &editor.id).await?;

    let text = validate_text(text)?;
    let applied = stores
        .messages
        .edit_message(message_id, &text, Utc::now())
        .await?;
    if !applied {
        return Err(ChatError::Validation(
            "Deleted messages cannot be edited".into(),
        ));
    }

    let edited = load_message(stores, message_id).await?;
    let view = populate_one(stores, edited).await?;
    state.broadcast.to_room(
        &message.community_id,
        ServerEvent::MessageEdited {
            message: Box::new(view.clone()),
        },
        None,
    );
    Ok(view)
}

/// Soft-delete a message for everyone or hide it for the caller. Allowed for
/// the sender and the community administrator.
pub async fn delete(
    state: &AppState,
    actor: &UserProfile,
    message_id: &str,
    scope: DeleteScope,
) -> Result<ServerEvent, ChatError> {
    let stores = &state.stores;
    let message = load_message(stores, message_id).await?;
    let community = stores
        .communities
        .find_community(&message.community_id)
        .await?
        .ok_or(ChatError::NotFound("community"))?;
    if message.sender_id != actor.id && !community.is_admin(&actor.id) {
        return Err(ChatError::Authorization(
            "Only the sender or the community administrator can delete this message".into(),
        ));
    }

    let applied = match scope {
        DeleteScope::Everyone => {
            stores
                .messages
                .delete_for_everyone(message_id, Utc::now())
                .await?
        }
        DeleteScope::Me => stores.messages.hide_for(message_id, &actor.id).await?,
    };
    if !applied {
        return Err(ChatError::NotFound("message"));
    }

    let event = ServerEvent::MessageDeleted {
        message_id: message_id.to_string(),
        community_id: message.community_id.clone(),
        deleted_by: actor.id.clone(),
        delete_for: scope,
    };
    if scope == DeleteScope::Everyone {
        state
            .broadcast
            .to_room(&message.community_id, event.clone(), None);
    }
    Ok(event)
}
