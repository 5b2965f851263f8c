//! In-process store used by tests and `STORE_BACKEND=memory` runs.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{
    CommunityStore, HistoryCursor, MembershipStore, MessageStore, StoreError, StoreResult,
    UserDirectory,
};
use crate::models::community::{Community, CommunityUpdates};
use crate::models::membership::{MemberRole, MemberStatus, Membership};
use crate::models::message::{
    EditEntry, Message, MessageContent, Reaction, ReactionAction, Receipt, ReceiptKind,
    DELETED_PLACEHOLDER,
};
use crate::models::user::UserProfile;

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserProfile>,
    communities: HashMap<String, Community>,
    memberships: HashMap<(String, String), Membership>,
    messages: Vec<Message>,
    failing: HashSet<&'static str>,
}

impl Inner {
    fn check(&self, op: &'static str) -> StoreResult<()> {
        if self.failing.contains(op) {
            return Err(StoreError::Injected(op));
        }
        Ok(())
    }

    fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    fn adjust_member_count(&mut self, community_id: &str, delta: i32) {
        if let Some(c) = self.communities.get_mut(community_id) {
            c.member_count += delta;
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: UserProfile) {
        self.inner.lock().users.insert(user.id.clone(), user);
    }

    pub fn insert_community(&self, community: Community) {
        self.inner
            .lock()
            .communities
            .insert(community.id.clone(), community);
    }

    /// Insert or replace a membership without touching member counts.
    pub fn insert_membership(&self, membership: Membership) {
        let key = (membership.community_id.clone(), membership.user_id.clone());
        self.inner.lock().memberships.insert(key, membership);
    }

    pub fn membership(&self, community_id: &str, user_id: &str) -> Option<Membership> {
        self.inner
            .lock()
            .memberships
            .get(&(community_id.to_string(), user_id.to_string()))
            .cloned()
    }

    pub fn community(&self, community_id: &str) -> Option<Community> {
        self.inner.lock().communities.get(community_id).cloned()
    }

    pub fn message(&self, message_id: &str) -> Option<Message> {
        self.inner
            .lock()
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().messages.len()
    }

    /// Make the named store operation return an error until `heal` is called.
    pub fn fail(&self, op: &'static str) {
        self.inner.lock().failing.insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.inner.lock().failing.remove(op);
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
        let inner = self.inner.lock();
        inner.check("find_user")?;
        Ok(inner.users.get(user_id).cloned())
    }

    async fn find_users(&self, user_ids: &[String]) -> StoreResult<Vec<UserProfile>> {
        let inner = self.inner.lock();
        inner.check("find_users")?;
        Ok(user_ids
            .iter()
            .filter_map(|id| inner.users.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl CommunityStore for MemoryStore {
    async fn find_community(&self, community_id: &str) -> StoreResult<Option<Community>> {
        let inner = self.inner.lock();
        inner.check("find_community")?;
        Ok(inner.communities.get(community_id).cloned())
    }

    async fn find_communities(&self, community_ids: &[String]) -> StoreResult<Vec<Community>> {
        let inner = self.inner.lock();
        inner.check("find_communities")?;
        Ok(community_ids
            .iter()
            .filter_map(|id| inner.communities.get(id).cloned())
            .collect())
    }

    async fn create_community(&self, community: &Community, admin: &Membership) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check("create_community")?;
        if inner.communities.contains_key(&community.id) {
            return Err(StoreError::Conflict("community"));
        }
        inner
            .communities
            .insert(community.id.clone(), community.clone());
        inner.memberships.insert(
            (admin.community_id.clone(), admin.user_id.clone()),
            admin.clone(),
        );
        Ok(())
    }

    async fn update_community(
        &self,
        community_id: &str,
        updates: &CommunityUpdates,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Community>> {
        let mut inner = self.inner.lock();
        inner.check("update_community")?;
        Ok(inner.communities.get_mut(community_id).map(|c| {
            c.apply(updates, at);
            c.clone()
        }))
    }

    async fn record_last_message(
        &self,
        community_id: &str,
        at: DateTime<Utc>,
        preview: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check("record_last_message")?;
        if let Some(c) = inner.communities.get_mut(community_id) {
            c.last_message_at = Some(at);
            c.last_message_preview = Some(preview.to_string());
            c.updated_at = at;
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn find_membership(
        &self,
        community_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<Membership>> {
        let inner = self.inner.lock();
        inner.check("find_membership")?;
        Ok(inner
            .memberships
            .get(&(community_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn active_memberships(&self, user_id: &str) -> StoreResult<Vec<Membership>> {
        let inner = self.inner.lock();
        inner.check("active_memberships")?;
        let mut found: Vec<Membership> = inner
            .memberships
            .values()
            .filter(|m| m.user_id == user_id && m.is_active())
            .cloned()
            .collect();
        found.sort_by(|a, b| a.community_id.cmp(&b.community_id));
        Ok(found)
    }

    async fn community_members(&self, community_id: &str) -> StoreResult<Vec<Membership>> {
        let inner = self.inner.lock();
        inner.check("community_members")?;
        let mut found: Vec<Membership> = inner
            .memberships
            .values()
            .filter(|m| m.community_id == community_id && m.is_active())
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            (a.role != MemberRole::Admin, a.joined_at, &a.user_id)
                .cmp(&(b.role != MemberRole::Admin, b.joined_at, &b.user_id))
        });
        Ok(found)
    }

    async fn join(&self, membership: &Membership) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check("join")?;
        let key = (membership.community_id.clone(), membership.user_id.clone());
        if inner.memberships.contains_key(&key) {
            return Err(StoreError::Conflict("membership"));
        }
        inner.memberships.insert(key, membership.clone());
        inner.adjust_member_count(&membership.community_id, 1);
        Ok(())
    }

    async fn remove(&self, community_id: &str, user_id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        inner.check("remove")?;
        let removed = inner
            .memberships
            .remove(&(community_id.to_string(), user_id.to_string()))
            .is_some();
        if removed {
            inner.adjust_member_count(community_id, -1);
        }
        Ok(removed)
    }

    async fn increment_unread(&self, community_id: &str, sender_id: &str) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        inner.check("increment_unread")?;
        let mut touched = 0;
        for m in inner.memberships.values_mut() {
            if m.community_id == community_id
                && m.user_id != sender_id
                && m.status == MemberStatus::Active
            {
                m.unread_count += 1;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn mark_all_read(
        &self,
        community_id: &str,
        user_id: &str,
        last_read_message_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        inner.check("mark_all_read")?;
        let key = (community_id.to_string(), user_id.to_string());
        let Some(m) = inner.memberships.get_mut(&key) else {
            return Ok(false);
        };
        m.unread_count = 0;
        m.last_seen_at = at;
        if let Some(id) = last_read_message_id {
            m.last_read_message_id = Some(id.to_string());
        }
        Ok(true)
    }

    async fn touch_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        inner.check("touch_last_seen")?;
        let mut touched = 0;
        for m in inner.memberships.values_mut().filter(|m| m.user_id == user_id) {
            m.last_seen_at = at;
            touched += 1;
        }
        Ok(touched)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, message: &Message) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check("insert_message")?;
        if inner.messages.iter().any(|m| m.id == message.id) {
            return Err(StoreError::Conflict("message"));
        }
        inner.messages.push(message.clone());
        Ok(())
    }

    async fn find_message(&self, message_id: &str) -> StoreResult<Option<Message>> {
        let inner = self.inner.lock();
        inner.check("find_message")?;
        Ok(inner.messages.iter().find(|m| m.id == message_id).cloned())
    }

    async fn list_messages(
        &self,
        community_id: &str,
        viewer_id: &str,
        before: Option<&HistoryCursor>,
        limit: i64,
    ) -> StoreResult<Vec<Message>> {
        let inner = self.inner.lock();
        inner.check("list_messages")?;
        // Insertion order breaks timestamp ties, so the cursor message's
        // position stands in for its id.
        let cursor = before.map(|c| {
            let position = c
                .message_id
                .as_deref()
                .and_then(|id| inner.messages.iter().position(|m| m.id == id));
            (c.created_at, position)
        });
        let older = |index: usize, m: &Message| match cursor {
            None => true,
            Some((at, Some(position))) => {
                m.created_at < at || (m.created_at == at && index < position)
            }
            Some((at, None)) => m.created_at < at,
        };
        let mut page: Vec<(usize, &Message)> = inner
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.community_id == community_id)
            .filter(|(i, m)| older(*i, m))
            .filter(|(_, m)| !m.is_hidden_for(viewer_id))
            .collect();
        page.sort_by(|(ai, a), (bi, b)| b.created_at.cmp(&a.created_at).then(bi.cmp(ai)));
        Ok(page
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn add_receipts(
        &self,
        message_ids: &[String],
        user_id: &str,
        kind: ReceiptKind,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock();
        inner.check("add_receipts")?;
        let mut added = Vec::new();
        for id in message_ids {
            let Some(m) = inner.message_mut(id) else {
                continue;
            };
            let receipts = match kind {
                ReceiptKind::Read => &mut m.read_by,
                ReceiptKind::Delivered => &mut m.delivered_to,
            };
            if receipts.iter().any(|r| r.user_id == user_id) {
                continue;
            }
            receipts.push(Receipt {
                user_id: user_id.to_string(),
                at,
            });
            added.push(id.clone());
        }
        Ok(added)
    }

    async fn toggle_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<(ReactionAction, Vec<Reaction>)>> {
        let mut inner = self.inner.lock();
        inner.check("toggle_reaction")?;
        Ok(inner.message_mut(message_id).map(|m| {
            let action = m.toggle_reaction(user_id, emoji, at);
            (action, m.reactions.clone())
        }))
    }

    async fn edit_message(&self, message_id: &str, text: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        inner.check("edit_message")?;
        let Some(m) = inner.message_mut(message_id).filter(|m| !m.is_deleted) else {
            return Ok(false);
        };
        let previous = m.content.text.replace(text.to_string()).unwrap_or_default();
        m.edit_history.push(EditEntry {
            content: previous,
            edited_at: at,
        });
        m.is_edited = true;
        m.updated_at = at;
        Ok(true)
    }

    async fn delete_for_everyone(&self, message_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        inner.check("delete_for_everyone")?;
        let Some(m) = inner.message_mut(message_id) else {
            return Ok(false);
        };
        if !m.is_deleted {
            m.is_deleted = true;
            m.deleted_at = Some(at);
            m.content = MessageContent::text(DELETED_PLACEHOLDER);
            m.updated_at = at;
        }
        Ok(true)
    }

    async fn hide_for(&self, message_id: &str, user_id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        inner.check("hide_for")?;
        let Some(m) = inner.message_mut(message_id) else {
            return Ok(false);
        };
        if !m.is_hidden_for(user_id) {
            m.deleted_for.push(user_id.to_string());
        }
        Ok(true)
    }
}
