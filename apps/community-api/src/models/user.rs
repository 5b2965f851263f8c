use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::users;

/// Public profile of a platform user, as resolved by the identity layer.
///
/// The `users` table belongs to the wider platform; this service only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = users)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    /// Platform role (`volunteer`, `organizer`, `admin`).
    pub role: String,
}

impl UserProfile {
    /// Organizers and platform admins may create communities.
    pub fn can_create_communities(&self) -> bool {
        matches!(self.role.as_str(), "organizer" | "admin")
    }
}
