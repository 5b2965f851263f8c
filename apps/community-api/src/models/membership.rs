use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::memberships;
use crate::models::user::UserProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    fn from_db(value: &str) -> Self {
        match value {
            "admin" => Self::Admin,
            _ => Self::Member,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Muted,
    Banned,
}

impl MemberStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Muted => "muted",
            Self::Banned => "banned",
        }
    }

    // Unknown values never grant access.
    fn from_db(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "muted" => Self::Muted,
            _ => Self::Banned,
        }
    }
}

/// The durable record authorizing a user to participate in a community.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub community_id: String,
    pub user_id: String,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub unread_count: i32,
    pub last_seen_at: DateTime<Utc>,
    pub last_read_message_id: Option<String>,
    pub is_typing: bool,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(community_id: &str, user_id: &str, role: MemberRole, at: DateTime<Utc>) -> Self {
        Self {
            community_id: community_id.to_string(),
            user_id: user_id.to_string(),
            role,
            status: MemberStatus::Active,
            unread_count: 0,
            last_seen_at: at,
            last_read_message_id: None,
            is_typing: false,
            joined_at: at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}

/// Entry of a community's member list.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    #[serde(flatten)]
    pub membership: Membership,
    pub user: Option<UserProfile>,
    /// At least one live connection is joined to the community's room.
    pub is_online: bool,
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = memberships)]
pub struct MembershipRow {
    pub community_id: String,
    pub user_id: String,
    pub role: String,
    pub status: String,
    pub unread_count: i32,
    pub last_seen_at: DateTime<Utc>,
    pub last_read_message_id: Option<String>,
    pub is_typing: bool,
    pub joined_at: DateTime<Utc>,
}

impl From<MembershipRow> for Membership {
    fn from(row: MembershipRow) -> Self {
        Self {
            community_id: row.community_id,
            user_id: row.user_id,
            role: MemberRole::from_db(&row.role),
            status: MemberStatus::from_db(&row.status),
            unread_count: row.unread_count,
            last_seen_at: row.last_seen_at,
            last_read_message_id: row.last_read_message_id,
            is_typing: row.is_typing,
            joined_at: row.joined_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = memberships)]
pub struct NewMembership<'a> {
    pub community_id: &'a str,
    pub user_id: &'a str,
    pub role: &'a str,
    pub status: &'a str,
    pub unread_count: i32,
    pub last_seen_at: DateTime<Utc>,
    pub is_typing: bool,
    pub joined_at: DateTime<Utc>,
}

impl<'a> From<&'a Membership> for NewMembership<'a> {
    fn from(m: &'a Membership) -> Self {
        Self {
            community_id: &m.community_id,
            user_id: &m.user_id,
            role: m.role.as_str(),
            status: m.status.as_str(),
            unread_count: m.unread_count,
            last_seen_at: m.last_seen_at,
            is_typing: m.is_typing,
            joined_at: m.joined_at,
        }
    }
}
