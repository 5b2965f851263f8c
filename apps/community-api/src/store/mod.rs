//! Durable stores consumed by the messaging core.
//!
//! Each concern is a trait so handlers can run against PostgreSQL in
//! production and an in-process map in tests.

pub mod memory;
pub mod pg;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::community::{Community, CommunityUpdates};
use crate::models::membership::Membership;
use crate::models::message::{Message, Reaction, ReactionAction, ReceiptKind};
use crate::models::user::UserProfile;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] diesel_async::pooled_connection::deadpool::PoolError),
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    /// Raised by the in-memory store when a test asks an operation to fail.
    #[error("injected failure in {0}")]
    Injected(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Position in a community's history. A page holds messages strictly older
/// than the cursor; `message_id` orders messages sharing `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCursor {
    pub created_at: DateTime<Utc>,
    pub message_id: Option<String>,
}

/// Profile lookup against the platform's user records.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<UserProfile>>;
    /// Profiles for the given ids; unknown ids are skipped.
    async fn find_users(&self, user_ids: &[String]) -> StoreResult<Vec<UserProfile>>;
}

#[async_trait]
pub trait CommunityStore: Send + Sync {
    async fn find_community(&self, community_id: &str) -> StoreResult<Option<Community>>;
    /// Communities for the given ids; unknown ids are skipped.
    async fn find_communities(&self, community_ids: &[String]) -> StoreResult<Vec<Community>>;
    /// Insert a community together with its administrator's membership.
    async fn create_community(&self, community: &Community, admin: &Membership) -> StoreResult<()>;
    /// Apply `updates`; `None` when the community does not exist.
    async fn update_community(
        &self,
        community_id: &str,
        updates: &CommunityUpdates,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Community>>;
    async fn record_last_message(
        &self,
        community_id: &str,
        at: DateTime<Utc>,
        preview: &str,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn find_membership(
        &self,
        community_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<Membership>>;
    async fn active_memberships(&self, user_id: &str) -> StoreResult<Vec<Membership>>;
    /// Active memberships of a community, administrators first, then by
    /// join time.
    async fn community_members(&self, community_id: &str) -> StoreResult<Vec<Membership>>;
    /// Create the membership and bump the member count. `Conflict` if the
    /// pair already exists.
    async fn join(&self, membership: &Membership) -> StoreResult<()>;
    /// Delete the membership and decrement the member count. Returns whether
    /// a record existed.
    async fn remove(&self, community_id: &str, user_id: &str) -> StoreResult<bool>;
    /// `unread_count += 1` for every active member except `sender_id`.
    async fn increment_unread(&self, community_id: &str, sender_id: &str) -> StoreResult<u64>;
    /// Reset the unread counter and stamp last-seen. Returns whether the
    /// membership exists.
    async fn mark_all_read(
        &self,
        community_id: &str,
        user_id: &str,
        last_read_message_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Stamp last-seen on every membership of the user.
    async fn touch_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: &Message) -> StoreResult<()>;
    async fn find_message(&self, message_id: &str) -> StoreResult<Option<Message>>;
    /// Newest-first page of messages older than `before`, skipping those
    /// `viewer_id` hid for themselves.
    async fn list_messages(
        &self,
        community_id: &str,
        viewer_id: &str,
        before: Option<&HistoryCursor>,
        limit: i64,
    ) -> StoreResult<Vec<Message>>;
    /// Record a receipt for each message. Returns the ids that were newly
    /// marked; existing receipts are left untouched.
    async fn add_receipts(
        &self,
        message_ids: &[String],
        user_id: &str,
        kind: ReceiptKind,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<String>>;
    /// Atomically add or remove `(user_id, emoji)`. `None` if the message
    /// does not exist.
    async fn toggle_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<(ReactionAction, Vec<Reaction>)>>;
    /// Replace the text of a message that is not globally deleted. The text
    /// being replaced is read and appended to the edit history in the same
    /// atomic step. Returns whether the edit was applied.
    async fn edit_message(&self, message_id: &str, text: &str, at: DateTime<Utc>) -> StoreResult<bool>;
    async fn delete_for_everyone(&self, message_id: &str, at: DateTime<Utc>) -> StoreResult<bool>;
    async fn hide_for(&self, message_id: &str, user_id: &str) -> StoreResult<bool>;
}

/// The set of store handles shared by handlers.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserDirectory>,
    pub communities: Arc<dyn CommunityStore>,
    pub memberships: Arc<dyn MembershipStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl Stores {
    /// Use one backend for every concern.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: UserDirectory + CommunityStore + MembershipStore + MessageStore + 'static,
    {
        Self {
            users: backend.clone(),
            communities: backend.clone(),
            memberships: backend.clone(),
            messages: backend,
        }
    }
}
