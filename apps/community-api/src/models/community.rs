use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::communities;
use crate::models::membership::Membership;

/// Maximum length of a community name.
pub const MAX_NAME_LEN: usize = 100;
/// Maximum length of a community description.
pub const MAX_DESCRIPTION_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommunitySettings {
    pub is_public: bool,
    pub require_approval: bool,
    pub allow_member_invites: bool,
}

impl Default for CommunitySettings {
    fn default() -> Self {
        Self {
            is_public: true,
            require_approval: false,
            allow_member_invites: true,
        }
    }
}

/// A persistent chat space. Carries the denormalized list-view fields
/// (`last_message_*`, `member_count`).
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub admin_id: String,
    pub member_count: i32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub settings: CommunitySettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Community {
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_id == user_id
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, updates: &CommunityUpdates, at: DateTime<Utc>) {
        if let Some(name) = &updates.name {
            self.name = name.clone();
        }
        if let Some(description) = &updates.description {
            self.description = Some(description.clone());
        }
        if let Some(avatar) = &updates.avatar {
            self.avatar = Some(avatar.clone());
        }
        if let Some(patch) = &updates.settings {
            if let Some(v) = patch.is_public {
                self.settings.is_public = v;
            }
            if let Some(v) = patch.require_approval {
                self.settings.require_approval = v;
            }
            if let Some(v) = patch.allow_member_invites {
                self.settings.allow_member_invites = v;
            }
        }
        self.updated_at = at;
    }
}

/// A community as listed for one of its members, with that member's unread
/// and last-read state.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberCommunity {
    #[serde(flatten)]
    pub community: Community,
    pub membership: Membership,
}

/// Partial settings change; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_approval: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_member_invites: Option<bool>,
}

/// Administrator-supplied community changes. Also echoed back verbatim in the
/// `community_updated` broadcast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommunityUpdates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsPatch>,
}

impl CommunityUpdates {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.avatar.is_none()
            && self.settings.is_none()
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = communities)]
pub struct CommunityRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub admin_id: String,
    pub member_count: i32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub is_public: bool,
    pub require_approval: bool,
    pub allow_member_invites: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CommunityRow> for Community {
    fn from(row: CommunityRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            avatar: row.avatar,
            admin_id: row.admin_id,
            member_count: row.member_count,
            last_message_at: row.last_message_at,
            last_message_preview: row.last_message_preview,
            settings: CommunitySettings {
                is_public: row.is_public,
                require_approval: row.require_approval,
                allow_member_invites: row.allow_member_invites,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = communities)]
pub struct NewCommunity<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub avatar: Option<&'a str>,
    pub admin_id: &'a str,
    pub member_count: i32,
    pub is_public: bool,
    pub require_approval: bool,
    pub allow_member_invites: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'a> From<&'a Community> for NewCommunity<'a> {
    fn from(c: &'a Community) -> Self {
        Self {
            id: &c.id,
            name: &c.name,
            description: c.description.as_deref(),
            avatar: c.avatar.as_deref(),
            admin_id: &c.admin_id,
            member_count: c.member_count,
            is_public: c.settings.is_public,
            require_approval: c.settings.require_approval,
            allow_member_invites: c.settings.allow_member_invites,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Changeset for a partial update; `None` fields are skipped by Diesel.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = communities)]
pub struct UpdateCommunity {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub is_public: Option<bool>,
    pub require_approval: Option<bool>,
    pub allow_member_invites: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

impl UpdateCommunity {
    pub fn new(updates: &CommunityUpdates, at: DateTime<Utc>) -> Self {
        let settings = updates.settings.clone().unwrap_or_default();
        Self {
            name: updates.name.clone(),
            description: updates.description.clone(),
            avatar: updates.avatar.clone(),
            is_public: settings.is_public,
            require_approval: settings.require_approval,
            allow_member_invites: settings.allow_member_invites,
            updated_at: at,
        }
    }
}
