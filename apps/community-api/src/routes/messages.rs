//! Request/response message endpoints. They run the same chat operations as
//! the gateway, so both paths write and broadcast identically.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{patch, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::chat::messages::{self, HistoryPage, HistoryParams, ReactionUpdate};
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::gateway::events::SendMessagePayload;
use crate::models::message::{DeleteScope, MessageContent, MessageType, MessageView};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/communities/{id}/messages",
            post(send_message).get(list_messages),
        )
        .route("/communities/{id}/read", put(mark_read))
        .route(
            "/messages/{message_id}",
            patch(edit_message).delete(delete_message),
        )
        .route("/messages/{message_id}/reactions", post(toggle_reaction))
}

// ---------------------------------------------------------------------------
// GET /api/v1/communities/{id}/messages
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/communities/{id}/messages",
    tag = "Messages",
    security(("bearer" = [])),
    params(
        ("id" = String, Path, description = "Community ID"),
        ("before" = Option<String>, Query, description = "RFC 3339 cursor: messages created before this instant"),
        ("beforeId" = Option<String>, Query, description = "Message ID cursor: messages older than this message, ties included"),
        ("limit" = Option<i64>, Query, description = "Number of messages to return (1-100, default 50)"),
    ),
    responses(
        (status = 200, description = "Page of messages, oldest first", body = HistoryPage),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Not a member", body = ApiErrorBody),
        (status = 404, description = "Cursor message not found", body = ApiErrorBody),
    ),
)]
pub async fn list_messages(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(community_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>, ApiError> {
    let page = messages::history(&state, &user, &community_id, params).await?;
    Ok(Json(page))
}

// ---------------------------------------------------------------------------
// POST /api/v1/communities/{id}/messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub correlation_token: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/communities/{id}/messages",
    tag = "Messages",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Community ID")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message sent", body = MessageView),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 403, description = "Not a member", body = ApiErrorBody),
        (status = 404, description = "Reply target not found", body = ApiErrorBody),
    ),
)]
pub async fn send_message(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(community_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let payload = SendMessagePayload {
        community_id,
        message_type: body.message_type.unwrap_or(MessageType::Text),
        content: body.content,
        reply_to: body.reply_to,
        mentions: body.mentions,
        correlation_token: body.correlation_token,
    };
    let view = messages::send(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

// ---------------------------------------------------------------------------
// PUT /api/v1/communities/{id}/read
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    #[serde(default)]
    pub message_ids: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub community_id: String,
    /// Messages that gained a read receipt.
    pub message_ids: Vec<String>,
}

#[utoipa::path(
    put,
    path = "/api/v1/communities/{id}/read",
    tag = "Messages",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Community ID")),
    request_body = MarkReadRequest,
    responses(
        (status = 200, description = "Unread counter reset", body = MarkReadResponse),
        (status = 403, description = "Not a member", body = ApiErrorBody),
    ),
)]
pub async fn mark_read(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(community_id): Path<String>,
    body: Option<Json<MarkReadRequest>>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let message_ids = messages::mark_all_read(&state, &user, &community_id, &body.message_ids).await?;
    Ok(Json(MarkReadResponse {
        community_id,
        message_ids,
    }))
}

// ---------------------------------------------------------------------------
// PATCH /api/v1/messages/{message_id}
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct EditMessageRequest {
    pub text: Option<String>,
}

#[utoipa::path(
    patch,
    path = "/api/v1/messages/{message_id}",
    tag = "Messages",
    security(("bearer" = [])),
    params(("message_id" = String, Path, description = "Message ID")),
    request_body = EditMessageRequest,
    responses(
        (status = 200, description = "Message edited", body = MessageView),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 403, description = "Not the sender", body = ApiErrorBody),
        (status = 404, description = "Message not found", body = ApiErrorBody),
    ),
)]
pub async fn edit_message(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(body): Json<EditMessageRequest>,
) -> Result<Json<MessageView>, ApiError> {
    let Some(text) = body.text else {
        return Err(ApiError::validation(vec![FieldError {
            field: "text".to_string(),
            message: "Message text is required".to_string(),
        }]));
    };
    let view = messages::edit(&state, &user, &message_id, &text).await?;
    Ok(Json(view))
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/messages/{message_id}
// ---------------------------------------------------------------------------

/// Without a body the message is hidden for the caller only.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageRequest {
    #[serde(default)]
    pub delete_for: DeleteScope,
}

#[utoipa::path(
    delete,
    path = "/api/v1/messages/{message_id}",
    tag = "Messages",
    security(("bearer" = [])),
    params(("message_id" = String, Path, description = "Message ID")),
    request_body = DeleteMessageRequest,
    responses(
        (status = 204, description = "Message deleted"),
        (status = 403, description = "Not the sender or administrator", body = ApiErrorBody),
        (status = 404, description = "Message not found", body = ApiErrorBody),
    ),
)]
pub async fn delete_message(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    body: Option<Json<DeleteMessageRequest>>,
) -> Result<StatusCode, ApiError> {
    let Json(body) = body.unwrap_or_default();
    messages::delete(&state, &user, &message_id, body.delete_for).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// POST /api/v1/messages/{message_id}/reactions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReactionRequest {
    pub emoji: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/messages/{message_id}/reactions",
    tag = "Reactions",
    security(("bearer" = [])),
    params(("message_id" = String, Path, description = "Message ID")),
    request_body = ReactionRequest,
    responses(
        (status = 200, description = "Reaction added or removed", body = ReactionUpdate),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 404, description = "Message not found", body = ApiErrorBody),
    ),
)]
pub async fn toggle_reaction(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(body): Json<ReactionRequest>,
) -> Result<Json<ReactionUpdate>, ApiError> {
    let update = messages::toggle_reaction(&state, &user, &message_id, &body.emoji).await?;
    Ok(Json(update))
}
