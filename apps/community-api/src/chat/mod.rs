//! Messaging operations shared by the realtime gateway and the HTTP routes.
//!
//! Every operation authorizes against the stores, performs its durable
//! writes, and only then fans events out through the broadcaster.

pub mod admin;
pub mod directory;
pub mod messages;
pub mod presence;
pub mod rooms;
pub mod typing;

use crate::models::community::Community;
use crate::models::membership::Membership;
use crate::store::{StoreError, Stores};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    /// Text safe to show the acting client. Store failures are logged and
    /// reported generically.
    pub fn client_message(&self) -> String {
        match self {
            Self::Store(err) => {
                tracing::error!(?err, "store failure");
                "Something went wrong, please try again".to_string()
            }
            Self::NotFound(what) => format!("{} not found", capitalize(what)),
            other => other.to_string(),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Re-validate that `user_id` is an active member of `community_id`.
pub async fn require_active_membership(
    stores: &Stores,
    community_id: &str,
    user_id: &str,
) -> Result<Membership, ChatError> {
    stores
        .memberships
        .find_membership(community_id, user_id)
        .await?
        .filter(Membership::is_active)
        .ok_or_else(|| ChatError::Authorization("Not a member of this community".into()))
}

/// Load the community and check that `user_id` administers it.
pub async fn require_admin(
    stores: &Stores,
    community_id: &str,
    user_id: &str,
) -> Result<Community, ChatError> {
    let community = stores
        .communities
        .find_community(community_id)
        .await?
        .ok_or(ChatError::NotFound("community"))?;
    if !community.is_admin(user_id) {
        return Err(ChatError::Authorization(
            "Only the community administrator can do that".into(),
        ));
    }
    Ok(community)
}
