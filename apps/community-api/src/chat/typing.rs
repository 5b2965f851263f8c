//! Typing indicators. Only state transitions are broadcast, and never back
//! to the connection that caused them.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::gateway::events::ServerEvent;
use crate::models::user::UserProfile;
use crate::AppState;

use super::ChatError;

fn typing_event(community_id: &str, user_id: &str, user_name: &str, is_typing: bool) -> ServerEvent {
    ServerEvent::UserTyping {
        community_id: community_id.to_string(),
        user_id: user_id.to_string(),
        user_name: user_name.to_string(),
        is_typing,
    }
}

pub fn start(
    state: &AppState,
    connection_id: &str,
    user: &UserProfile,
    community_id: &str,
) -> Result<(), ChatError> {
    if !state.registry.is_joined(connection_id, community_id) {
        return Err(ChatError::Authorization(
            "Join the community before typing".into(),
        ));
    }
    if state.registry.start_typing(community_id, user, connection_id) {
        state.broadcast.to_room(
            community_id,
            typing_event(community_id, &user.id, &user.name, true),
            Some(connection_id),
        );
    }
    Ok(())
}

pub fn stop(state: &AppState, connection_id: &str, user: &UserProfile, community_id: &str) {
    if state.registry.stop_typing(community_id, &user.id) {
        state.broadcast.to_room(
            community_id,
            typing_event(community_id, &user.id, &user.name, false),
            Some(connection_id),
        );
    }
}

/// Expire typing entries older than `max_age`, announcing each stop.
pub fn sweep(state: &AppState, max_age: Duration) -> usize {
    let expired = state.registry.expire_typing(max_age);
    for entry in &expired {
        state.broadcast.to_room(
            &entry.community_id,
            typing_event(&entry.community_id, &entry.user_id, &entry.user_name, false),
            None,
        );
    }
    expired.len()
}

/// Run [`sweep`] periodically for the lifetime of the process.
pub fn spawn_sweeper(state: AppState, max_age: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval((max_age / 2).max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            let expired = sweep(&state, max_age);
            if expired > 0 {
                tracing::debug!(expired, "expired stale typing indicators");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::{drain, Harness};

    #[tokio::test]
    async fn typing_requires_a_joined_room() {
        let h = Harness::new();
        let alice = h.member("usr_alice");
        let _rx = h.connect("conn_alice", &alice);

        let err = start(&h.state, "conn_alice", &alice, Harness::COMMUNITY).unwrap_err();
        assert!(matches!(err, ChatError::Authorization(_)));
        assert!(h.state.registry.typing_users(Harness::COMMUNITY).is_empty());
    }

    #[tokio::test]
    async fn start_and_stop_reach_others_once() {
        let h = Harness::new();
        let alice = h.member("usr_alice");
        let bob = h.member("usr_bob");
        let mut alice_rx = h.connect("conn_alice", &alice);
        let mut bob_rx = h.connect("conn_bob", &bob);
        h.state.registry.join("conn_alice", Harness::COMMUNITY);
        h.state.registry.join("conn_bob", Harness::COMMUNITY);

        start(&h.state, "conn_alice", &alice, Harness::COMMUNITY).unwrap();
        start(&h.state, "conn_alice", &alice, Harness::COMMUNITY).unwrap();
        stop(&h.state, "conn_alice", &alice, Harness::COMMUNITY);
        stop(&h.state, "conn_alice", &alice, Harness::COMMUNITY);

        let seen: Vec<bool> = drain(&mut bob_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::UserTyping { is_typing, .. } => Some(is_typing),
                _ => None,
            })
            .collect();
        assert_eq!(seen, [true, false]);
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn sweep_expires_and_announces() {
        let h = Harness::new();
        let alice = h.member("usr_alice");
        let bob = h.member("usr_bob");
        let _alice_rx = h.connect("conn_alice", &alice);
        let mut bob_rx = h.connect("conn_bob", &bob);
        h.state.registry.join("conn_alice", Harness::COMMUNITY);
        h.state.registry.join("conn_bob", Harness::COMMUNITY);
        start(&h.state, "conn_alice", &alice, Harness::COMMUNITY).unwrap();
        drain(&mut bob_rx);

        assert_eq!(sweep(&h.state, Duration::from_secs(60)), 0);
        assert_eq!(sweep(&h.state, Duration::ZERO), 1);
        assert!(drain(&mut bob_rx).iter().any(|e| matches!(
            e,
            ServerEvent::UserTyping { is_typing: false, .. }
        )));
    }
}
