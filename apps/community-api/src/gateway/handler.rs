//! Inbound domain event dispatch.
//!
//! Each client event maps to one chat operation. The operation either
//! succeeds with an optional reply for the acting connection, or fails with
//! a [`Rejection`] that the transport renders as `message_error` or `error`.

use crate::chat::{self, ChatError};
use crate::models::message::DeleteScope;
use crate::AppState;

use super::events::{ClientEvent, ServerEvent};
use super::session::GatewaySession;

/// A failed client event.
#[derive(Debug)]
pub enum Rejection {
    /// A `send_message` failure, reported with the client's correlation token.
    Message {
        correlation_token: Option<String>,
        error: ChatError,
    },
    General(ChatError),
}

impl Rejection {
    /// The event sent back to the acting connection.
    pub fn into_event(self) -> ServerEvent {
        match self {
            Self::Message {
                correlation_token,
                error,
            } => ServerEvent::MessageError {
                correlation_token,
                error: error.client_message(),
            },
            Self::General(error) => ServerEvent::error(error.client_message()),
        }
    }
}

impl From<ChatError> for Rejection {
    fn from(error: ChatError) -> Self {
        Self::General(error)
    }
}

/// Handle one client event for `session`.
pub async fn dispatch(
    state: &AppState,
    session: &GatewaySession,
    event: ClientEvent,
) -> Result<Option<ServerEvent>, Rejection> {
    let user = &session.user;
    let connection_id = session.connection_id.as_str();

    let reply = match event {
        ClientEvent::JoinCommunity { community_id } => Some(
            chat::rooms::join_room(state, connection_id, user, &community_id).await?,
        ),
        ClientEvent::LeaveCommunity { community_id } => Some(chat::rooms::leave_room(
            state,
            connection_id,
            user,
            &community_id,
        )),
        ClientEvent::SendMessage(payload) => {
            let correlation_token = payload.correlation_token.clone();
            match chat::messages::send(state, user, payload).await {
                Ok(view) => Some(ServerEvent::MessageSent {
                    correlation_token,
                    message_id: view.message.id,
                    timestamp: view.message.created_at,
                }),
                Err(error) => {
                    return Err(Rejection::Message {
                        correlation_token,
                        error,
                    })
                }
            }
        }
        ClientEvent::MarkMessageRead {
            message_id,
            community_id,
        } => {
            chat::messages::mark_read(state, user, &message_id, community_id.as_deref()).await?;
            None
        }
        ClientEvent::MarkAllRead {
            community_id,
            message_ids,
        } => {
            let message_ids =
                chat::messages::mark_all_read(state, user, &community_id, &message_ids).await?;
            Some(ServerEvent::MessagesMarkedRead {
                community_id,
                message_ids,
            })
        }
        ClientEvent::AddReaction { message_id, emoji } => {
            chat::messages::toggle_reaction(state, user, &message_id, &emoji).await?;
            None
        }
        ClientEvent::EditMessage { message_id, text } => {
            chat::messages::edit(state, user, &message_id, &text).await?;
            None
        }
        ClientEvent::DeleteMessage {
            message_id,
            delete_for,
        } => {
            let event = chat::messages::delete(state, user, &message_id, delete_for).await?;
            // Delete-for-everyone reaches this connection through the room.
            (delete_for == DeleteScope::Me).then_some(event)
        }
        ClientEvent::TypingStart { community_id } => {
            chat::typing::start(state, connection_id, user, &community_id)?;
            None
        }
        ClientEvent::TypingStop { community_id } => {
            chat::typing::stop(state, connection_id, user, &community_id);
            None
        }
        ClientEvent::RemoveMember {
            community_id,
            member_id,
        } => {
            chat::admin::remove_member(state, user, &community_id, &member_id).await?;
            None
        }
        ClientEvent::UpdateCommunity {
            community_id,
            updates,
        } => {
            chat::admin::update_community(state, user, &community_id, updates).await?;
            None
        }
        ClientEvent::UpdatePresence {} => {
            chat::presence::update_presence(state, user, Some(connection_id)).await?;
            None
        }
    };

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::chat::testing::Harness;

    async fn connected(h: &Harness, connection_id: &str, user_id: &str) -> GatewaySession {
        let user = h.member(user_id);
        let session = GatewaySession::new(connection_id.into(), user);
        let (tx, _rx) = mpsc::channel(64);
        super::super::lifecycle::connect(&h.state, &session, tx)
            .await
            .unwrap();
        session
    }

    fn event(name: &str, data: serde_json::Value) -> ClientEvent {
        ClientEvent::parse(Some(name), data).unwrap()
    }

    #[tokio::test]
    async fn send_replies_with_ack() {
        let h = Harness::new();
        let alice = connected(&h, "conn_a", "usr_alice").await;

        let reply = dispatch(
            &h.state,
            &alice,
            event(
                "send_message",
                json!({ "communityId": Harness::COMMUNITY, "content": { "text": "hi" }, "correlationToken": "t1" }),
            ),
        )
        .await
        .unwrap();

        assert!(matches!(
            reply,
            Some(ServerEvent::MessageSent { correlation_token: Some(ref t), .. }) if t == "t1"
        ));
    }

    #[tokio::test]
    async fn failed_send_is_tagged_with_the_token() {
        let h = Harness::new();
        let alice = connected(&h, "conn_a", "usr_alice").await;

        let rejection = dispatch(
            &h.state,
            &alice,
            event(
                "send_message",
                json!({ "communityId": Harness::COMMUNITY, "content": { "text": " " }, "tempId": "t9" }),
            ),
        )
        .await
        .unwrap_err();

        match rejection.into_event() {
            ServerEvent::MessageError {
                correlation_token,
                error,
            } => {
                assert_eq!(correlation_token.as_deref(), Some("t9"));
                assert_eq!(error, "Message text is required");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_member_join_is_rejected() {
        let h = Harness::new();
        let stranger = h.user("usr_x");
        let session = GatewaySession::new("conn_x".into(), stranger);
        let (tx, _rx) = mpsc::channel(8);
        super::super::lifecycle::connect(&h.state, &session, tx)
            .await
            .unwrap();

        let rejection = dispatch(
            &h.state,
            &session,
            event("join_community", json!({ "communityId": Harness::COMMUNITY })),
        )
        .await
        .unwrap_err();

        assert!(matches!(rejection.into_event(), ServerEvent::Error { .. }));
        assert!(!h
            .state
            .registry
            .room_users(Harness::COMMUNITY)
            .contains(&"usr_x".to_string()));
    }

    #[tokio::test]
    async fn delete_for_me_replies_only_to_caller() {
        let h = Harness::new();
        let alice = connected(&h, "conn_a", "usr_alice").await;
        let sent = dispatch(
            &h.state,
            &alice,
            event(
                "send_message",
                json!({ "communityId": Harness::COMMUNITY, "content": { "text": "oops" } }),
            ),
        )
        .await
        .unwrap();
        let Some(ServerEvent::MessageSent { message_id, .. }) = sent else {
            panic!("expected message_sent");
        };

        let reply = dispatch(
            &h.state,
            &alice,
            event("delete_message", json!({ "messageId": message_id, "deleteFor": "me" })),
        )
        .await
        .unwrap();
        assert!(matches!(reply, Some(ServerEvent::MessageDeleted { .. })));
    }
}
