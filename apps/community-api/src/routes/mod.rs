pub mod communities;
pub mod health;
pub mod members;
pub mod messages;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest(
            "/api/v1",
            communities::router()
                .merge(messages::router())
                .merge(members::router()),
        )
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Communities
        communities::create_community,
        communities::my_communities,
        communities::update_community,
        // Members
        communities::join_community,
        members::list_members,
        members::leave_community,
        members::remove_member,
        // Presence
        communities::online_users,
        // Messages
        messages::list_messages,
        messages::send_message,
        messages::mark_read,
        messages::edit_message,
        messages::delete_message,
        // Reactions
        messages::toggle_reaction,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Models
            crate::models::community::Community,
            crate::models::community::CommunitySettings,
            crate::models::community::CommunityUpdates,
            crate::models::community::SettingsPatch,
            crate::models::community::MemberCommunity,
            crate::models::membership::Membership,
            crate::models::membership::MemberRole,
            crate::models::membership::MemberStatus,
            crate::models::membership::MemberView,
            crate::models::message::Message,
            crate::models::message::MessageView,
            crate::models::message::MessageType,
            crate::models::message::MessageContent,
            crate::models::message::Reaction,
            crate::models::message::ReactionAction,
            crate::models::message::Receipt,
            crate::models::message::EditEntry,
            crate::models::message::DeliveryStatus,
            crate::models::message::ReplyPreview,
            crate::models::message::DeleteScope,
            crate::chat::messages::HistoryPage,
            crate::chat::messages::ReactionUpdate,
            crate::chat::admin::NewCommunityRequest,
            // Route request/response types
            health::HealthResponse,
            communities::OnlineUsersResponse,
            messages::SendMessageRequest,
            messages::MarkReadRequest,
            messages::MarkReadResponse,
            messages::EditMessageRequest,
            messages::DeleteMessageRequest,
            messages::ReactionRequest,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Communities", description = "Community management"),
        (name = "Members", description = "Community membership"),
        (name = "Presence", description = "Online users"),
        (name = "Messages", description = "Messaging"),
        (name = "Reactions", description = "Message reactions"),
    )
)]
pub struct ApiDoc;
