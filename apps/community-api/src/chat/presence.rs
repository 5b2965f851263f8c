//! Last-seen stamps and the online view of a room.

use chrono::Utc;

use crate::gateway::events::ServerEvent;
use crate::models::user::UserProfile;
use crate::AppState;

use super::{require_active_membership, ChatError};

/// Stamp last-seen on all of the user's memberships and tell every room the
/// user is in that they are active.
pub async fn update_presence(
    state: &AppState,
    user: &UserProfile,
    connection_id: Option<&str>,
) -> Result<(), ChatError> {
    let now = Utc::now();
    state.stores.memberships.touch_last_seen(&user.id, now).await?;

    for community_id in state.registry.user_rooms(&user.id) {
        state.broadcast.to_room(
            &community_id,
            ServerEvent::UserPresence {
                community_id: community_id.clone(),
                user_id: user.id.clone(),
                last_seen_at: now,
                is_online: true,
            },
            connection_id,
        );
    }
    Ok(())
}

/// Online user ids of a community, for members only.
pub async fn online_users(
    state: &AppState,
    viewer: &UserProfile,
    community_id: &str,
) -> Result<Vec<String>, ChatError> {
    require_active_membership(&state.stores, community_id, &viewer.id).await?;
    Ok(state.registry.room_users(community_id))
}
