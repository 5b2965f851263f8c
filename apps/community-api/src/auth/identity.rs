//! Resolves a bearer credential to a user profile.

use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::tokens::{self, TokenKeys};
use crate::chat::ChatError;
use crate::models::user::UserProfile;
use crate::store::UserDirectory;

#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Validate `credential` and return the profile it belongs to.
    /// Fails with `ChatError::Authentication` for bad, expired or unknown
    /// credentials.
    async fn authenticate(&self, credential: &str) -> Result<UserProfile, ChatError>;
}

/// Verifies HS256 access tokens and looks the subject up in the user
/// directory.
pub struct JwtIdentityGateway {
    keys: TokenKeys,
    users: Arc<dyn UserDirectory>,
}

impl JwtIdentityGateway {
    pub fn new(keys: TokenKeys, users: Arc<dyn UserDirectory>) -> Self {
        Self { keys, users }
    }
}

#[async_trait]
impl IdentityGateway for JwtIdentityGateway {
    async fn authenticate(&self, credential: &str) -> Result<UserProfile, ChatError> {
        let claims = tokens::decode_access_token(&self.keys, credential).map_err(|e| {
            tracing::debug!(?e, "access token rejected");
            ChatError::Authentication("Invalid or expired token".into())
        })?;

        self.users
            .find_user(&claims.sub)
            .await?
            .ok_or_else(|| ChatError::Authentication("Unknown user".into()))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::store::memory::MemoryStore;

    fn gateway() -> (JwtIdentityGateway, TokenKeys) {
        let keys = TokenKeys::from_secret(b"identity-test");
        let store = Arc::new(MemoryStore::new());
        store.insert_user(UserProfile {
            id: "usr_a".into(),
            name: "Ada".into(),
            email: None,
            role: "volunteer".into(),
        });
        (JwtIdentityGateway::new(keys.clone(), store), keys)
    }

    #[tokio::test]
    async fn valid_token_resolves_profile() {
        let (gateway, keys) = gateway();
        let token = tokens::issue_access_token(&keys, "usr_a", Duration::seconds(60)).unwrap();
        let user = gateway.authenticate(&token).await.unwrap();
        assert_eq!(user.name, "Ada");
    }

    #[tokio::test]
    async fn unknown_subject_is_an_authentication_failure() {
        let (gateway, keys) = gateway();
        let token = tokens::issue_access_token(&keys, "usr_ghost", Duration::seconds(60)).unwrap();
        let err = gateway.authenticate(&token).await.unwrap_err();
        assert!(matches!(err, ChatError::Authentication(_)));
    }

    #[tokio::test]
    async fn garbage_token_is_an_authentication_failure() {
        let (gateway, _) = gateway();
        let err = gateway.authenticate("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, ChatError::Authentication(_)));
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
