//! Connect and disconnect bookkeeping for an authenticated session.

use chrono::Utc;
use tokio::sync::mpsc;

use crate::chat::rooms::announce_room_users;
use crate::chat::ChatError;
use crate::AppState;

use super::events::ServerEvent;
use super::registry::Outbound;
use super::session::GatewaySession;

/// Register the connection and join a room for every active membership.
///
/// Memberships are loaded before anything is registered, so a failed query
/// leaves no trace in the registry.
pub async fn connect(
    state: &AppState,
    session: &GatewaySession,
    tx: mpsc::Sender<Outbound>,
) -> Result<Vec<String>, ChatError> {
    let memberships = state
        .stores
        .memberships
        .active_memberships(session.user_id())
        .await?;
    let mut community_ids: Vec<String> = memberships.into_iter().map(|m| m.community_id).collect();
    community_ids.sort();
    community_ids.dedup();

    let registered = state
        .registry
        .register(&session.connection_id, session.user.clone(), tx);
    for community_id in &community_ids {
        state.registry.join(&session.connection_id, community_id);
    }

    state.broadcast.to_connection(
        &session.connection_id,
        ServerEvent::UserCommunities(community_ids.clone()),
    );

    let now = Utc::now();
    for community_id in &community_ids {
        if registered.first_connection {
            state.broadcast.to_room(
                community_id,
                ServerEvent::UserOnline {
                    community_id: community_id.clone(),
                    user_id: session.user.id.clone(),
                    user_name: session.user.name.clone(),
                    timestamp: now,
                },
                Some(&session.connection_id),
            );
        }
        announce_room_users(state, community_id);
    }

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user.id,
        rooms = community_ids.len(),
        first_connection = registered.first_connection,
        "gateway connection registered"
    );
    Ok(community_ids)
}

/// Tear down everything the connection owned. Safe to call more than once;
/// only the first call does anything.
pub async fn disconnect(state: &AppState, connection_id: &str) {
    let Some(gone) = state.registry.unregister(connection_id) else {
        return;
    };

    for community_id in &gone.typing_stopped {
        state.broadcast.to_room(
            community_id,
            ServerEvent::UserTyping {
                community_id: community_id.clone(),
                user_id: gone.user.id.clone(),
                user_name: gone.user.name.clone(),
                is_typing: false,
            },
            None,
        );
    }
    for community_id in &gone.rooms {
        announce_room_users(state, community_id);
    }

    if gone.last_connection {
        let now = Utc::now();
        if let Err(err) = state.stores.memberships.touch_last_seen(&gone.user.id, now).await {
            tracing::warn!(?err, user_id = %gone.user.id, "failed to record last seen");
        }
        for community_id in &gone.rooms {
            state.broadcast.to_room(
                community_id,
                ServerEvent::UserOffline {
                    community_id: community_id.clone(),
                    user_id: gone.user.id.clone(),
                    user_name: gone.user.name.clone(),
                    last_seen_at: now,
                },
                None,
            );
        }
    }

    tracing::info!(
        connection_id,
        user_id = %gone.user.id,
        connected_for_secs = (Utc::now() - gone.authenticated_at).num_seconds(),
        last_connection = gone.last_connection,
        "gateway connection removed"
    );
}
