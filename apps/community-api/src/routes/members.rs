//! Member endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};

use crate::auth::middleware::AuthUser;
use crate::chat::{admin, directory, rooms};
use crate::error::{ApiError, ApiErrorBody};
use crate::models::membership::MemberView;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/communities/{id}/members", get(list_members))
        .route("/communities/{id}/members/me", delete(leave_community))
        .route("/communities/{id}/members/{user_id}", delete(remove_member))
}

// ---------------------------------------------------------------------------
// GET /api/v1/communities/{id}/members
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/communities/{id}/members",
    tag = "Members",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Community ID")),
    responses(
        (status = 200, description = "Active members, administrator first", body = Vec<MemberView>),
        (status = 403, description = "Not a member", body = ApiErrorBody),
    ),
)]
pub async fn list_members(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(community_id): Path<String>,
) -> Result<Json<Vec<MemberView>>, ApiError> {
    let members = directory::list_members(&state, &user, &community_id).await?;
    Ok(Json(members))
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/communities/{id}/members/me
// ---------------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/api/v1/communities/{id}/members/me",
    tag = "Members",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Community ID")),
    responses(
        (status = 204, description = "Left the community"),
        (status = 400, description = "The administrator cannot leave", body = ApiErrorBody),
        (status = 404, description = "Not a member", body = ApiErrorBody),
    ),
)]
pub async fn leave_community(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(community_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    rooms::leave_membership(&state, &user, &community_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/communities/{id}/members/{user_id}
// ---------------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/api/v1/communities/{id}/members/{user_id}",
    tag = "Members",
    security(("bearer" = [])),
    params(
        ("id" = String, Path, description = "Community ID"),
        ("user_id" = String, Path, description = "Member to remove"),
    ),
    responses(
        (status = 204, description = "Member removed"),
        (status = 403, description = "Administrator only", body = ApiErrorBody),
        (status = 404, description = "Member not found", body = ApiErrorBody),
    ),
)]
pub async fn remove_member(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path((community_id, member_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    admin::remove_member(&state, &user, &community_id, &member_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
