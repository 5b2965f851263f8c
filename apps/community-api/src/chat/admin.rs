//! Community creation and administrator actions.

use chrono::Utc;
use community_common::id::{prefix, prefixed_ulid};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::gateway::events::ServerEvent;
use crate::models::community::{
    Community, CommunitySettings, CommunityUpdates, MAX_DESCRIPTION_LEN, MAX_NAME_LEN,
};
use crate::models::membership::{MemberRole, Membership};
use crate::models::user::UserProfile;
use crate::AppState;

use super::rooms::{announce_room_users, stop_typing_quietly};
use super::{require_admin, ChatError};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewCommunityRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub settings: Option<CommunitySettings>,
}

fn validate_name(name: &str) -> Result<String, ChatError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::Validation("Community name is required".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ChatError::Validation(format!(
            "Community name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_description(description: &str) -> Result<String, ChatError> {
    let description = description.trim();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ChatError::Validation(format!(
            "Description cannot exceed {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(description.to_string())
}

/// Normalize administrator-supplied updates.
pub fn validate_updates(mut updates: CommunityUpdates) -> Result<CommunityUpdates, ChatError> {
    if updates.is_empty() {
        return Err(ChatError::Validation("No updates provided".into()));
    }
    if let Some(name) = updates.name.as_deref() {
        updates.name = Some(validate_name(name)?);
    }
    if let Some(description) = updates.description.as_deref() {
        updates.description = Some(validate_description(description)?);
    }
    Ok(updates)
}

/// Create a community administered by `creator`, subscribing the creator's
/// live connections to its room.
pub async fn create_community(
    state: &AppState,
    creator: &UserProfile,
    request: NewCommunityRequest,
) -> Result<Community, ChatError> {
    if !creator.can_create_communities() {
        return Err(ChatError::Authorization(
            "Only organizers can create communities".into(),
        ));
    }
    let name = validate_name(&request.name)?;
    let description = request
        .description
        .as_deref()
        .map(validate_description)
        .transpose()?
        .filter(|d| !d.is_empty());

    let now = Utc::now();
    let community = Community {
        id: prefixed_ulid(prefix::COMMUNITY),
        name,
        description,
        avatar: request.avatar.filter(|a| !a.trim().is_empty()),
        admin_id: creator.id.clone(),
        member_count: 1,
        last_message_at: None,
        last_message_preview: None,
        settings: request.settings.unwrap_or_default(),
        created_at: now,
        updated_at: now,
    };
    let admin = Membership::new(&community.id, &creator.id, MemberRole::Admin, now);
    state
        .stores
        .communities
        .create_community(&community, &admin)
        .await?;

    tracing::info!(community_id = %community.id, admin_id = %creator.id, "community created");

    for connection_id in state.registry.user_connections(&creator.id) {
        if state.registry.join(&connection_id, &community.id) {
            state.broadcast.to_connection(
                &connection_id,
                ServerEvent::JoinedCommunity {
                    community_id: community.id.clone(),
                },
            );
        }
    }

    Ok(community)
}

/// Remove `member_id` from the community, evicting their live connections
/// from its room.
pub async fn remove_member(
    state: &AppState,
    admin: &UserProfile,
    community_id: &str,
    member_id: &str,
) -> Result<(), ChatError> {
    require_admin(&state.stores, community_id, &admin.id).await?;
    if member_id == admin.id {
        return Err(ChatError::Validation(
            "The administrator cannot be removed".into(),
        ));
    }

    if !state.stores.memberships.remove(community_id, member_id).await? {
        return Err(ChatError::NotFound("member"));
    }

    let now = Utc::now();
    tracing::info!(community_id, member_id, removed_by = %admin.id, "member removed");

    state.broadcast.to_user(
        member_id,
        ServerEvent::RemovedFromCommunity {
            community_id: community_id.to_string(),
            removed_by: admin.id.clone(),
            timestamp: now,
        },
    );
    let mut evicted = None;
    for connection_id in state.registry.user_connections(member_id) {
        if state.registry.leave(&connection_id, community_id) && evicted.is_none() {
            evicted = state.registry.connection_user(&connection_id);
        }
    }
    if let Some(member) = evicted {
        stop_typing_quietly(state, community_id, &member);
    }

    state.broadcast.to_room(
        community_id,
        ServerEvent::MemberRemoved {
            community_id: community_id.to_string(),
            member_id: member_id.to_string(),
            removed_by: admin.id.clone(),
            timestamp: now,
        },
        None,
    );
    announce_room_users(state, community_id);
    Ok(())
}

/// Apply settings changes and broadcast them to the room.
pub async fn update_community(
    state: &AppState,
    admin: &UserProfile,
    community_id: &str,
    updates: CommunityUpdates,
) -> Result<Community, ChatError> {
    require_admin(&state.stores, community_id, &admin.id).await?;
    let updates = validate_updates(updates)?;

    let now = Utc::now();
    let community = state
        .stores
        .communities
        .update_community(community_id, &updates, now)
        .await?
        .ok_or(ChatError::NotFound("community"))?;

    tracing::info!(community_id, updated_by = %admin.id, "community updated");

    state.broadcast.to_room(
        community_id,
        ServerEvent::CommunityUpdated {
            community_id: community_id.to_string(),
            updates,
            updated_by: admin.id.clone(),
            timestamp: now,
        },
        None,
    );
    Ok(community)
}
