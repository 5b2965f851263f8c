//! Community endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::chat::admin::{self, NewCommunityRequest};
use crate::chat::{directory, presence, rooms};
use crate::error::{ApiError, ApiErrorBody};
use crate::models::community::{Community, CommunityUpdates, MemberCommunity};
use crate::models::membership::Membership;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/communities", post(create_community))
        .route("/communities/mine", get(my_communities))
        .route("/communities/{id}", patch(update_community))
        .route("/communities/{id}/join", post(join_community))
        .route("/communities/{id}/online", get(online_users))
}

// ---------------------------------------------------------------------------
// POST /api/v1/communities
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/communities",
    tag = "Communities",
    security(("bearer" = [])),
    request_body = NewCommunityRequest,
    responses(
        (status = 201, description = "Community created", body = Community),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Caller cannot create communities", body = ApiErrorBody),
    ),
)]
pub async fn create_community(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<NewCommunityRequest>,
) -> Result<(StatusCode, Json<Community>), ApiError> {
    let community = admin::create_community(&state, &user, body).await?;
    Ok((StatusCode::CREATED, Json(community)))
}

// ---------------------------------------------------------------------------
// GET /api/v1/communities/mine
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/communities/mine",
    tag = "Communities",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The caller's communities, most recently active first", body = Vec<MemberCommunity>),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn my_communities(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<MemberCommunity>>, ApiError> {
    let communities = directory::my_communities(&state, &user).await?;
    Ok(Json(communities))
}

// ---------------------------------------------------------------------------
// PATCH /api/v1/communities/{id}
// ---------------------------------------------------------------------------

#[utoipa::path(
    patch,
    path = "/api/v1/communities/{id}",
    tag = "Communities",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Community ID")),
    request_body = CommunityUpdates,
    responses(
        (status = 200, description = "Community updated", body = Community),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 403, description = "Administrator only", body = ApiErrorBody),
        (status = 404, description = "Community not found", body = ApiErrorBody),
    ),
)]
pub async fn update_community(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(community_id): Path<String>,
    Json(updates): Json<CommunityUpdates>,
) -> Result<Json<Community>, ApiError> {
    let community = admin::update_community(&state, &user, &community_id, updates).await?;
    Ok(Json(community))
}

// ---------------------------------------------------------------------------
// POST /api/v1/communities/{id}/join
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/communities/{id}/join",
    tag = "Members",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Community ID")),
    responses(
        (status = 201, description = "Joined the community", body = Membership),
        (status = 403, description = "Community is private", body = ApiErrorBody),
        (status = 404, description = "Community not found", body = ApiErrorBody),
        (status = 409, description = "Already a member", body = ApiErrorBody),
    ),
)]
pub async fn join_community(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(community_id): Path<String>,
) -> Result<(StatusCode, Json<Membership>), ApiError> {
    let membership = rooms::join_membership(&state, &user, &community_id).await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

// ---------------------------------------------------------------------------
// GET /api/v1/communities/{id}/online
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsersResponse {
    pub community_id: String,
    pub users: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/communities/{id}/online",
    tag = "Presence",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Community ID")),
    responses(
        (status = 200, description = "Users with a live connection in the room", body = OnlineUsersResponse),
        (status = 403, description = "Not a member", body = ApiErrorBody),
    ),
)]
pub async fn online_users(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(community_id): Path<String>,
) -> Result<Json<OnlineUsersResponse>, ApiError> {
    let users = presence::online_users(&state, &user, &community_id).await?;
    Ok(Json(OnlineUsersResponse {
        community_id,
        users,
    }))
}
