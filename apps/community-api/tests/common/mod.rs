#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use chrono::Utc;

use community_api::auth::identity::JwtIdentityGateway;
use community_api::auth::tokens::{issue_access_token, TokenKeys};
use community_api::config::Config;
use community_api::models::community::{Community, CommunitySettings};
use community_api::models::membership::{MemberRole, Membership};
use community_api::models::user::UserProfile;
use community_api::store::memory::MemoryStore;
use community_api::store::Stores;
use community_api::AppState;

pub const SECRET: &str = "integration-test-secret";
/// Public community seeded by [`test_app`].
pub const COMMUNITY: &str = "com_harbor";
/// Administrator of [`COMMUNITY`].
pub const ADMIN: &str = "usr_admin";

/// Everything a test needs to seed data and mint credentials.
pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub keys: TokenKeys,
}

impl TestContext {
    /// Insert a platform user and return a bearer token for them.
    pub fn user(&self, id: &str, role: &str) -> String {
        self.store.insert_user(UserProfile {
            id: id.to_string(),
            name: format!("Test {id}"),
            email: None,
            role: role.to_string(),
        });
        self.token(id)
    }

    /// Insert a volunteer with an active membership in [`COMMUNITY`].
    pub fn member(&self, id: &str) -> String {
        let token = self.user(id, "volunteer");
        self.store.insert_membership(Membership::new(
            COMMUNITY,
            id,
            MemberRole::Member,
            Utc::now(),
        ));
        token
    }

    pub fn admin(&self) -> String {
        self.token(ADMIN)
    }

    pub fn token(&self, user_id: &str) -> String {
        issue_access_token(&self.keys, user_id, chrono::Duration::seconds(300))
            .expect("mint test token")
    }

    /// Seed a community with its administrator's membership.
    pub fn community(&self, id: &str, admin_id: &str, is_public: bool) {
        let now = Utc::now();
        self.store.insert_community(Community {
            id: id.to_string(),
            name: format!("Community {id}"),
            description: None,
            avatar: None,
            admin_id: admin_id.to_string(),
            member_count: 1,
            last_message_at: None,
            last_message_preview: None,
            settings: CommunitySettings {
                is_public,
                ..CommunitySettings::default()
            },
            created_at: now,
            updated_at: now,
        });
        self.store
            .insert_membership(Membership::new(id, admin_id, MemberRole::Admin, now));
    }
}

/// Build state on the in-memory store with one public community
/// administered by [`ADMIN`].
pub fn test_context() -> TestContext {
    let store = Arc::new(MemoryStore::new());
    let keys = TokenKeys::from_secret(SECRET.as_bytes());
    let identity = Arc::new(JwtIdentityGateway::new(keys.clone(), store.clone()));
    let state = AppState::new(
        Config::local(SECRET),
        Stores::from_backend(store.clone()),
        identity,
    );

    let ctx = TestContext { state, store, keys };
    ctx.user(ADMIN, "organizer");
    ctx.community(COMMUNITY, ADMIN, true);
    ctx
}

/// Build a test app router backed by [`test_context`].
pub fn test_app() -> (Router, TestContext) {
    let ctx = test_context();
    let app = community_api::routes::router().with_state(ctx.state.clone());
    (app, ctx)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background for the rest of the test.
pub async fn start_server() -> (SocketAddr, TestContext) {
    let (app, ctx) = test_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, ctx)
}
