mod common;

use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum_test::TestServer;
use community_api::models::message::DELETED_PLACEHOLDER;
use serde_json::json;

use common::COMMUNITY;

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Helper: send a text message over HTTP and return its id.
async fn post_text(server: &TestServer, token: &str, text: &str) -> String {
    let resp = server
        .post(&format!("/api/v1/communities/{COMMUNITY}/messages"))
        .add_header(AUTHORIZATION, bearer(token))
        .json(&json!({ "content": { "text": text } }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = resp.json();
    body["id"].as_str().unwrap().to_string()
}

// ---------------------------------------------------------------------------
// POST /api/v1/communities/{id}/messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_message_returns_populated_message() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let token = ctx.member("usr_alice");

    let resp = server
        .post(&format!("/api/v1/communities/{COMMUNITY}/messages"))
        .add_header(AUTHORIZATION, bearer(&token))
        .json(&json!({ "content": { "text": "Hello, harbor!" }, "mentions": ["usr_admin", "usr_admin"] }))
        .await;

    resp.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = resp.json();
    assert!(body["id"].as_str().unwrap().starts_with("msg_"));
    assert_eq!(body["communityId"], COMMUNITY);
    assert_eq!(body["senderId"], "usr_alice");
    assert_eq!(body["messageType"], "text");
    assert_eq!(body["content"]["text"], "Hello, harbor!");
    assert_eq!(body["mentions"], json!(["usr_admin"]));
    assert_eq!(body["sender"]["id"], "usr_alice");
    assert_eq!(body["deliveryStatus"], "sent");
    assert_eq!(body["isDeleted"], false);
}

#[tokio::test]
async fn send_message_requires_auth() {
    let (app, _ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server
        .post(&format!("/api/v1/communities/{COMMUNITY}/messages"))
        .json(&json!({ "content": { "text": "Hello" } }))
        .await;

    resp.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn send_message_requires_membership() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let token = ctx.user("usr_outsider", "volunteer");

    let resp = server
        .post(&format!("/api/v1/communities/{COMMUNITY}/messages"))
        .add_header(AUTHORIZATION, bearer(&token))
        .json(&json!({ "content": { "text": "Intruder!" } }))
        .await;

    resp.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(ctx.store.message_count(), 0);
}

#[tokio::test]
async fn send_message_rejects_blank_and_oversized_text() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let token = ctx.member("usr_alice");

    let resp = server
        .post(&format!("/api/v1/communities/{COMMUNITY}/messages"))
        .add_header(AUTHORIZATION, bearer(&token))
        .json(&json!({ "content": { "text": "   " } }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    let resp = server
        .post(&format!("/api/v1/communities/{COMMUNITY}/messages"))
        .add_header(AUTHORIZATION, bearer(&token))
        .json(&json!({ "content": { "text": "a".repeat(4001) } }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    assert_eq!(ctx.store.message_count(), 0);
}

#[tokio::test]
async fn reply_to_unknown_message_is_not_found() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let token = ctx.member("usr_alice");

    let resp = server
        .post(&format!("/api/v1/communities/{COMMUNITY}/messages"))
        .add_header(AUTHORIZATION, bearer(&token))
        .json(&json!({ "content": { "text": "re:" }, "replyTo": "msg_missing" }))
        .await;

    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reply_includes_target_preview() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let token = ctx.member("usr_alice");
    let original = post_text(&server, &token, "Who has the keys?").await;

    let resp = server
        .post(&format!("/api/v1/communities/{COMMUNITY}/messages"))
        .add_header(AUTHORIZATION, bearer(&ctx.admin()))
        .json(&json!({ "content": { "text": "I do" }, "replyTo": original }))
        .await;

    resp.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["replyTo"], original);
    assert_eq!(body["replyTarget"]["content"]["text"], "Who has the keys?");
}

// ---------------------------------------------------------------------------
// GET /api/v1/communities/{id}/messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn history_pages_oldest_first() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let token = ctx.member("usr_alice");
    for text in ["one", "two", "three"] {
        post_text(&server, &token, text).await;
    }

    let resp = server
        .get(&format!("/api/v1/communities/{COMMUNITY}/messages"))
        .add_query_param("limit", 2)
        .add_header(AUTHORIZATION, bearer(&token))
        .await;

    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let texts: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"]["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, ["two", "three"]);
    assert_eq!(body["hasMore"], true);
}

#[tokio::test]
async fn history_requires_membership() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let token = ctx.user("usr_outsider", "volunteer");

    let resp = server
        .get(&format!("/api/v1/communities/{COMMUNITY}/messages"))
        .add_header(AUTHORIZATION, bearer(&token))
        .await;

    resp.assert_status(StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// PUT /api/v1/communities/{id}/read
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mark_read_resets_unread_and_records_receipts() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let alice = ctx.member("usr_alice");
    let bob = ctx.member("usr_bob");
    let message_id = post_text(&server, &alice, "Shift swap?").await;
    assert_eq!(ctx.store.membership(COMMUNITY, "usr_bob").unwrap().unread_count, 1);

    let resp = server
        .put(&format!("/api/v1/communities/{COMMUNITY}/read"))
        .add_header(AUTHORIZATION, bearer(&bob))
        .json(&json!({ "messageIds": [message_id] }))
        .await;

    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["messageIds"], json!([message_id]));

    let membership = ctx.store.membership(COMMUNITY, "usr_bob").unwrap();
    assert_eq!(membership.unread_count, 0);
    assert_eq!(membership.last_read_message_id.as_deref(), Some(message_id.as_str()));
    assert!(ctx.store.message(&message_id).unwrap().is_read_by("usr_bob"));
}

// ---------------------------------------------------------------------------
// PATCH / DELETE /api/v1/messages/{message_id}
// ---------------------------------------------------------------------------

#[tokio::test]
async fn only_sender_can_edit() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let alice = ctx.member("usr_alice");
    let bob = ctx.member("usr_bob");
    let message_id = post_text(&server, &alice, "Meet at 9").await;

    let resp = server
        .patch(&format!("/api/v1/messages/{message_id}"))
        .add_header(AUTHORIZATION, bearer(&bob))
        .json(&json!({ "text": "hijacked" }))
        .await;
    resp.assert_status(StatusCode::FORBIDDEN);

    let resp = server
        .patch(&format!("/api/v1/messages/{message_id}"))
        .add_header(AUTHORIZATION, bearer(&alice))
        .json(&json!({ "text": "Meet at 10" }))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["content"]["text"], "Meet at 10");
    assert_eq!(body["isEdited"], true);
    assert_eq!(body["editHistory"][0]["content"], "Meet at 9");
}

#[tokio::test]
async fn delete_for_everyone_replaces_content() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let alice = ctx.member("usr_alice");
    let message_id = post_text(&server, &alice, "wrong room").await;

    let resp = server
        .delete(&format!("/api/v1/messages/{message_id}"))
        .add_header(AUTHORIZATION, bearer(&alice))
        .json(&json!({ "deleteFor": "everyone" }))
        .await;
    resp.assert_status(StatusCode::NO_CONTENT);

    let message = ctx.store.message(&message_id).unwrap();
    assert!(message.is_deleted);
    assert!(message.deleted_at.is_some());
    assert_eq!(message.content.text.as_deref(), Some(DELETED_PLACEHOLDER));
}

#[tokio::test]
async fn delete_for_me_hides_only_for_caller() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let alice = ctx.member("usr_alice");
    let bob = ctx.member("usr_bob");
    let message_id = post_text(&server, &alice, "draft").await;

    let resp = server
        .delete(&format!("/api/v1/messages/{message_id}"))
        .add_header(AUTHORIZATION, bearer(&alice))
        .json(&json!({ "deleteFor": "me" }))
        .await;
    resp.assert_status(StatusCode::NO_CONTENT);

    let history = |token: String| {
        server
            .get(&format!("/api/v1/communities/{COMMUNITY}/messages"))
            .add_header(AUTHORIZATION, bearer(&token))
    };
    let alice_page: serde_json::Value = history(alice).await.json();
    let bob_page: serde_json::Value = history(bob).await.json();
    assert!(alice_page["messages"].as_array().unwrap().is_empty());
    assert_eq!(bob_page["messages"][0]["id"], message_id);
}

#[tokio::test]
async fn members_cannot_delete_others_messages() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let alice = ctx.member("usr_alice");
    let bob = ctx.member("usr_bob");
    let message_id = post_text(&server, &alice, "mine").await;

    let resp = server
        .delete(&format!("/api/v1/messages/{message_id}"))
        .add_header(AUTHORIZATION, bearer(&bob))
        .json(&json!({ "deleteFor": "everyone" }))
        .await;

    resp.assert_status(StatusCode::FORBIDDEN);
    assert!(!ctx.store.message(&message_id).unwrap().is_deleted);
}

// ---------------------------------------------------------------------------
// POST /api/v1/messages/{message_id}/reactions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reaction_toggles() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let alice = ctx.member("usr_alice");
    let message_id = post_text(&server, &alice, "Great work today").await;

    let react = || {
        server
            .post(&format!("/api/v1/messages/{message_id}/reactions"))
            .add_header(AUTHORIZATION, bearer(&ctx.admin()))
            .json(&json!({ "emoji": "🎉" }))
    };

    let added: serde_json::Value = react().await.json();
    assert_eq!(added["action"], "add");
    assert_eq!(added["reactions"][0]["userId"], common::ADMIN);

    let removed: serde_json::Value = react().await.json();
    assert_eq!(removed["action"], "remove");
    assert!(removed["reactions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn reaction_to_unknown_message_is_not_found() {
    let (app, ctx) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server
        .post("/api/v1/messages/msg_missing/reactions")
        .add_header(AUTHORIZATION, bearer(&ctx.member("usr_alice")))
        .json(&json!({ "emoji": "👍" }))
        .await;

    resp.assert_status(StatusCode::NOT_FOUND);
}
