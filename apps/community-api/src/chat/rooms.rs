//! Room subscription (join/leave of a live connection) and durable
//! membership changes (join/leave of a community).

use chrono::Utc;

use crate::gateway::events::ServerEvent;
use crate::models::membership::{MemberRole, Membership};
use crate::models::user::UserProfile;
use crate::AppState;

use super::{require_active_membership, ChatError};

/// Send the room's current online user ids to everyone in it.
pub fn announce_room_users(state: &AppState, community_id: &str) {
    let users = state.registry.room_users(community_id);
    state.broadcast.to_room(
        community_id,
        ServerEvent::RoomUsers {
            community_id: community_id.to_string(),
            users,
        },
        None,
    );
}

/// Subscribe a connection to a community's room after re-checking its
/// membership. Returns the acknowledgement for the joining connection.
pub async fn join_room(
    state: &AppState,
    connection_id: &str,
    user: &UserProfile,
    community_id: &str,
) -> Result<ServerEvent, ChatError> {
    require_active_membership(&state.stores, community_id, &user.id).await?;

    let already_present = state.registry.user_in_room(&user.id, community_id);
    if state.registry.join(connection_id, community_id) {
        if !already_present {
            state.broadcast.to_room(
                community_id,
                ServerEvent::UserJoinedCommunity {
                    community_id: community_id.to_string(),
                    user_id: user.id.clone(),
                    user_name: user.name.clone(),
                    timestamp: Utc::now(),
                },
                Some(connection_id),
            );
        }
        announce_room_users(state, community_id);
        tracing::debug!(connection_id, community_id, "joined room");
    }

    Ok(ServerEvent::JoinedCommunity {
        community_id: community_id.to_string(),
    })
}

/// Unsubscribe a connection from a room. Membership is not consulted. The
/// room only hears that the user left once their last device is gone, and
/// only a typing indicator started from this connection is cleared.
pub fn leave_room(
    state: &AppState,
    connection_id: &str,
    user: &UserProfile,
    community_id: &str,
) -> ServerEvent {
    if state.registry.leave(connection_id, community_id) {
        if state
            .registry
            .stop_typing_from(community_id, &user.id, connection_id)
        {
            announce_typing_stopped(state, community_id, user);
        }
        if !state.registry.user_in_room(&user.id, community_id) {
            state.broadcast.to_room(
                community_id,
                ServerEvent::UserLeftCommunity {
                    community_id: community_id.to_string(),
                    user_id: user.id.clone(),
                    user_name: user.name.clone(),
                    timestamp: Utc::now(),
                },
                None,
            );
        }
        announce_room_users(state, community_id);
        tracing::debug!(connection_id, community_id, "left room");
    }

    ServerEvent::LeftCommunity {
        community_id: community_id.to_string(),
    }
}

fn announce_typing_stopped(state: &AppState, community_id: &str, user: &UserProfile) {
    state.broadcast.to_room(
        community_id,
        ServerEvent::UserTyping {
            community_id: community_id.to_string(),
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            is_typing: false,
        },
        None,
    );
}

/// Clear a typing indicator the user holds in a room they no longer see.
pub(crate) fn stop_typing_quietly(state: &AppState, community_id: &str, user: &UserProfile) {
    if state.registry.stop_typing(community_id, &user.id) {
        announce_typing_stopped(state, community_id, user);
    }
}

/// Create a membership in a public community and subscribe the user's live
/// connections to its room.
pub async fn join_membership(
    state: &AppState,
    user: &UserProfile,
    community_id: &str,
) -> Result<Membership, ChatError> {
    let community = state
        .stores
        .communities
        .find_community(community_id)
        .await?
        .ok_or(ChatError::NotFound("community"))?;
    if !community.settings.is_public {
        return Err(ChatError::Authorization(
            "This community is private".into(),
        ));
    }

    let now = Utc::now();
    let membership = Membership::new(community_id, &user.id, MemberRole::Member, now);
    state.stores.memberships.join(&membership).await?;

    tracing::info!(community_id, user_id = %user.id, "member joined community");

    for connection_id in state.registry.user_connections(&user.id) {
        if state.registry.join(&connection_id, community_id) {
            state.broadcast.to_connection(
                &connection_id,
                ServerEvent::JoinedCommunity {
                    community_id: community_id.to_string(),
                },
            );
        }
    }
    state.broadcast.to_room(
        community_id,
        ServerEvent::UserJoinedCommunity {
            community_id: community_id.to_string(),
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            timestamp: now,
        },
        None,
    );
    announce_room_users(state, community_id);

    Ok(membership)
}

/// Delete the caller's membership. The administrator cannot leave.
pub async fn leave_membership(
    state: &AppState,
    user: &UserProfile,
    community_id: &str,
) -> Result<(), ChatError> {
    let community = state
        .stores
        .communities
        .find_community(community_id)
        .await?
        .ok_or(ChatError::NotFound("community"))?;
    if community.is_admin(&user.id) {
        return Err(ChatError::Validation(
            "The administrator cannot leave the community".into(),
        ));
    }

    if !state.stores.memberships.remove(community_id, &user.id).await? {
        return Err(ChatError::NotFound("membership"));
    }

    tracing::info!(community_id, user_id = %user.id, "member left community");

    for connection_id in state.registry.user_connections(&user.id) {
        if state.registry.leave(&connection_id, community_id) {
            state.broadcast.to_connection(
                &connection_id,
                ServerEvent::LeftCommunity {
                    community_id: community_id.to_string(),
                },
            );
        }
    }
    stop_typing_quietly(state, community_id, user);
    state.broadcast.to_room(
        community_id,
        ServerEvent::UserLeftCommunity {
            community_id: community_id.to_string(),
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            timestamp: Utc::now(),
        },
        None,
    );
    announce_room_users(state, community_id);

    Ok(())
}
