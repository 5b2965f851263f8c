mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time;
use tokio_tungstenite::tungstenite;

use community_api::store::MembershipStore;
use community_common::id::{has_prefix, prefix};

use common::{ADMIN, COMMUNITY};

type Ws = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Helper: connect with the token in the query string and wait until the
/// connection has joined its rooms.
async fn connect(addr: SocketAddr, token: &str) -> Ws {
    let url = format!("ws://{addr}/gateway?token={token}");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let ready = next_frame(&mut ws).await;
    assert_eq!(ready["op"], 0, "READY should be op=0 (DISPATCH)");
    assert_eq!(ready["t"], "ready");
    assert_eq!(ready["s"], 1);
    next_event(&mut ws, "user_communities").await;
    ws
}

/// Helper: read the next text frame as JSON.
async fn next_frame(ws: &mut Ws) -> Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            tungstenite::Message::Text(text) => {
                return serde_json::from_str(&text).expect("parse frame");
            }
            tungstenite::Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

/// Helper: skip frames until a dispatch named `name` arrives; return its `d`.
async fn next_event(ws: &mut Ws, name: &str) -> Value {
    loop {
        let frame = next_frame(ws).await;
        if frame["t"] == name {
            return frame["d"].clone();
        }
    }
}

/// Helper: skip frames until the server closes; return the close code.
async fn close_code(ws: &mut Ws) -> u16 {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended")
            .expect("ws read error");
        if let tungstenite::Message::Close(frame) = msg {
            return frame.map(|f| u16::from(f.code)).unwrap_or(1005);
        }
    }
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(tungstenite::Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

async fn dispatch(ws: &mut Ws, name: &str, data: Value) {
    send(ws, json!({ "op": 0, "t": name, "d": data })).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_announces_ready_and_joined_rooms() {
    let (addr, ctx) = common::start_server().await;
    let token = ctx.member("usr_alice");

    let url = format!("ws://{addr}/gateway?token={token}");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let ready = next_frame(&mut ws).await;
    assert_eq!(ready["t"], "ready");
    let d = &ready["d"];
    assert!(has_prefix(d["connectionId"].as_str().unwrap(), prefix::CONNECTION));
    assert_eq!(d["user"]["id"], "usr_alice");
    assert!(d["heartbeatInterval"].as_u64().unwrap() > 0);

    let rooms = next_event(&mut ws, "user_communities").await;
    assert_eq!(rooms, json!([COMMUNITY]));

    let room_users = next_event(&mut ws, "room_users").await;
    assert_eq!(room_users["communityId"], COMMUNITY);
    assert_eq!(room_users["users"], json!(["usr_alice"]));
}

#[tokio::test]
async fn identify_frame_authenticates_without_query_token() {
    let (addr, ctx) = common::start_server().await;
    let token = ctx.member("usr_alice");

    let url = format!("ws://{addr}/gateway");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    send(&mut ws, json!({ "op": 2, "d": { "token": token } })).await;

    let ready = next_frame(&mut ws).await;
    assert_eq!(ready["t"], "ready");
    assert_eq!(ready["d"]["user"]["id"], "usr_alice");
}

#[tokio::test]
async fn invalid_token_is_rejected_with_4004() {
    let (addr, _ctx) = common::start_server().await;

    let url = format!("ws://{addr}/gateway?token=not-a-jwt");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let error = next_frame(&mut ws).await;
    assert_eq!(error["t"], "error");
    assert_eq!(close_code(&mut ws).await, 4004);
}

#[tokio::test]
async fn heartbeat_returns_ack() {
    let (addr, ctx) = common::start_server().await;
    let mut ws = connect(addr, &ctx.member("usr_alice")).await;

    send(&mut ws, json!({ "op": 1, "d": { "seq": 3 } })).await;

    loop {
        let frame = next_frame(&mut ws).await;
        if frame["op"] == 6 {
            assert_eq!(frame["d"]["ack"], 3);
            break;
        }
    }
}

#[tokio::test]
async fn unknown_opcode_closes_with_4001() {
    let (addr, ctx) = common::start_server().await;
    let mut ws = connect(addr, &ctx.member("usr_alice")).await;

    send(&mut ws, json!({ "op": 42, "d": {} })).await;

    assert_eq!(close_code(&mut ws).await, 4001);
}

#[tokio::test]
async fn send_message_acks_sender_and_reaches_room() {
    let (addr, ctx) = common::start_server().await;
    let mut alice = connect(addr, &ctx.member("usr_alice")).await;
    let mut bob = connect(addr, &ctx.member("usr_bob")).await;

    dispatch(
        &mut alice,
        "send_message",
        json!({
            "communityId": COMMUNITY,
            "content": { "text": "  Boats leave at nine  " },
            "correlationToken": "tmp-1"
        }),
    )
    .await;

    let sent = next_event(&mut alice, "message_sent").await;
    assert_eq!(sent["correlationToken"], "tmp-1");
    let message_id = sent["messageId"].as_str().unwrap().to_string();
    assert!(has_prefix(&message_id, prefix::MESSAGE));

    let delivered = next_event(&mut bob, "new_message").await;
    assert_eq!(delivered["message"]["id"], message_id);
    assert_eq!(delivered["message"]["content"]["text"], "Boats leave at nine");
    assert_eq!(delivered["message"]["sender"]["id"], "usr_alice");

    let bob_membership = ctx.store.membership(COMMUNITY, "usr_bob").unwrap();
    assert_eq!(bob_membership.unread_count, 1);
    let community = ctx.store.community(COMMUNITY).unwrap();
    assert_eq!(
        community.last_message_preview.as_deref(),
        Some("Boats leave at nine")
    );
}

#[tokio::test]
async fn blank_message_is_rejected_with_correlation_token() {
    let (addr, ctx) = common::start_server().await;
    let mut alice = connect(addr, &ctx.member("usr_alice")).await;

    dispatch(
        &mut alice,
        "send_message",
        json!({
            "communityId": COMMUNITY,
            "content": { "text": "   " },
            "tempId": "tmp-2"
        }),
    )
    .await;

    let error = next_event(&mut alice, "message_error").await;
    assert_eq!(error["correlationToken"], "tmp-2");
    assert_eq!(ctx.store.message_count(), 0);
}

#[tokio::test]
async fn send_after_membership_revoked_is_rejected() {
    let (addr, ctx) = common::start_server().await;
    let mut alice = connect(addr, &ctx.member("usr_alice")).await;
    let mut bob = connect(addr, &ctx.member("usr_bob")).await;

    // Revoked behind the gateway's back: the room subscription is still live.
    assert!(ctx
        .state
        .stores
        .memberships
        .remove(COMMUNITY, "usr_alice")
        .await
        .unwrap());

    dispatch(
        &mut alice,
        "send_message",
        json!({
            "communityId": COMMUNITY,
            "content": { "text": "still here?" },
            "correlationToken": "tmp-3"
        }),
    )
    .await;

    let error = next_event(&mut alice, "message_error").await;
    assert_eq!(error["correlationToken"], "tmp-3");
    let delivered = time::timeout(
        Duration::from_millis(300),
        next_event(&mut bob, "new_message"),
    )
    .await;
    assert!(delivered.is_err(), "room should not hear a rejected message");

    assert_eq!(ctx.store.message_count(), 0);
    let bob_membership = ctx.store.membership(COMMUNITY, "usr_bob").unwrap();
    assert_eq!(bob_membership.unread_count, 0);
    let community = ctx.store.community(COMMUNITY).unwrap();
    assert!(community.last_message_at.is_none());
}

#[tokio::test]
async fn non_member_cannot_join_room() {
    let (addr, ctx) = common::start_server().await;
    let mut stranger = connect(addr, &ctx.user("usr_stranger", "volunteer")).await;

    dispatch(&mut stranger, "join_community", json!({ "communityId": COMMUNITY })).await;

    let error = next_event(&mut stranger, "error").await;
    assert!(error["message"].is_string());
    assert!(!ctx
        .state
        .registry
        .room_users(COMMUNITY)
        .contains(&"usr_stranger".to_string()));
}

#[tokio::test]
async fn typing_is_cleared_when_connection_drops() {
    let (addr, ctx) = common::start_server().await;
    let mut alice = connect(addr, &ctx.member("usr_alice")).await;
    let mut bob = connect(addr, &ctx.member("usr_bob")).await;

    dispatch(&mut alice, "typing_start", json!({ "communityId": COMMUNITY })).await;
    let typing = next_event(&mut bob, "user_typing").await;
    assert_eq!(typing["userId"], "usr_alice");
    assert_eq!(typing["isTyping"], true);

    alice.close(None).await.expect("close");
    drop(alice);

    let typing = next_event(&mut bob, "user_typing").await;
    assert_eq!(typing["userId"], "usr_alice");
    assert_eq!(typing["isTyping"], false);

    let offline = next_event(&mut bob, "user_offline").await;
    assert_eq!(offline["userId"], "usr_alice");
    assert!(ctx.state.registry.typing_users(COMMUNITY).is_empty());
}

#[tokio::test]
async fn second_device_does_not_repeat_online() {
    let (addr, ctx) = common::start_server().await;
    let mut bob = connect(addr, &ctx.member("usr_bob")).await;
    let alice_token = ctx.member("usr_alice");

    let _first = connect(addr, &alice_token).await;
    let online = next_event(&mut bob, "user_online").await;
    assert_eq!(online["userId"], "usr_alice");

    let _second = connect(addr, &alice_token).await;
    // The second connection only refreshes room_users.
    let users = next_event(&mut bob, "room_users").await;
    assert_eq!(users["users"], json!(["usr_alice", "usr_bob"]));
    dispatch(&mut bob, "mark_all_read", json!({ "communityId": COMMUNITY })).await;
    loop {
        let frame = next_frame(&mut bob).await;
        assert_ne!(frame["t"], "user_online");
        if frame["t"] == "messages_marked_read" {
            break;
        }
    }
}

#[tokio::test]
async fn reaction_toggles_on_and_off() {
    let (addr, ctx) = common::start_server().await;
    let mut alice = connect(addr, &ctx.member("usr_alice")).await;
    let mut bob = connect(addr, &ctx.member("usr_bob")).await;

    dispatch(
        &mut alice,
        "send_message",
        json!({ "communityId": COMMUNITY, "content": { "text": "Who can drive?" } }),
    )
    .await;
    let message_id = next_event(&mut alice, "message_sent").await["messageId"].clone();

    dispatch(&mut bob, "add_reaction", json!({ "messageId": message_id, "emoji": "👍" })).await;
    let added = next_event(&mut alice, "message_reaction").await;
    assert_eq!(added["action"], "add");
    assert_eq!(added["reactions"].as_array().unwrap().len(), 1);

    dispatch(&mut bob, "add_reaction", json!({ "messageId": message_id, "emoji": "👍" })).await;
    let removed = next_event(&mut alice, "message_reaction").await;
    assert_eq!(removed["action"], "remove");
    assert!(removed["reactions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn edit_keeps_previous_text_in_history() {
    let (addr, ctx) = common::start_server().await;
    let mut alice = connect(addr, &ctx.member("usr_alice")).await;
    let mut bob = connect(addr, &ctx.member("usr_bob")).await;

    dispatch(
        &mut alice,
        "send_message",
        json!({ "communityId": COMMUNITY, "content": { "text": "Meet at 9" } }),
    )
    .await;
    let message_id = next_event(&mut alice, "message_sent").await["messageId"].clone();

    dispatch(&mut alice, "edit_message", json!({ "messageId": message_id, "text": "Meet at 10" })).await;

    let edited = next_event(&mut bob, "message_edited").await;
    assert_eq!(edited["message"]["content"]["text"], "Meet at 10");
    assert_eq!(edited["message"]["isEdited"], true);
    assert_eq!(edited["message"]["editHistory"][0]["content"], "Meet at 9");
}

#[tokio::test]
async fn admin_removal_evicts_member_from_room() {
    let (addr, ctx) = common::start_server().await;
    let mut admin = connect(addr, &ctx.admin()).await;
    let mut bob = connect(addr, &ctx.member("usr_bob")).await;

    dispatch(
        &mut admin,
        "remove_member",
        json!({ "communityId": COMMUNITY, "memberId": "usr_bob" }),
    )
    .await;

    let removed = next_event(&mut bob, "removed_from_community").await;
    assert_eq!(removed["communityId"], COMMUNITY);
    assert_eq!(removed["removedBy"], ADMIN);

    let notice = next_event(&mut admin, "member_removed").await;
    assert_eq!(notice["memberId"], "usr_bob");
    assert!(ctx.store.membership(COMMUNITY, "usr_bob").is_none());
    assert!(!ctx
        .state
        .registry
        .room_users(COMMUNITY)
        .contains(&"usr_bob".to_string()));
}
