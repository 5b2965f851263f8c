//! Read-only listings: the caller's communities and a community's members.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::community::{Community, MemberCommunity};
use crate::models::membership::MemberView;
use crate::models::user::UserProfile;
use crate::AppState;

use super::{require_active_membership, ChatError};

fn last_activity(community: &Community) -> DateTime<Utc> {
    community.last_message_at.unwrap_or(community.created_at)
}

/// Communities the user is an active member of, most recently active first,
/// each with the user's own membership (unread count, last read message).
pub async fn my_communities(
    state: &AppState,
    user: &UserProfile,
) -> Result<Vec<MemberCommunity>, ChatError> {
    let memberships = state.stores.memberships.active_memberships(&user.id).await?;
    let ids: Vec<String> = memberships.iter().map(|m| m.community_id.clone()).collect();
    let mut communities: HashMap<String, Community> = state
        .stores
        .communities
        .find_communities(&ids)
        .await?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();

    let mut listed: Vec<MemberCommunity> = memberships
        .into_iter()
        .filter_map(|membership| {
            communities
                .remove(&membership.community_id)
                .map(|community| MemberCommunity {
                    community,
                    membership,
                })
        })
        .collect();
    listed.sort_by(|a, b| {
        last_activity(&b.community)
            .cmp(&last_activity(&a.community))
            .then_with(|| a.community.id.cmp(&b.community.id))
    });
    Ok(listed)
}

/// Active members of a community with their profiles, for members only.
pub async fn list_members(
    state: &AppState,
    viewer: &UserProfile,
    community_id: &str,
) -> Result<Vec<MemberView>, ChatError> {
    require_active_membership(&state.stores, community_id, &viewer.id).await?;

    let members = state.stores.memberships.community_members(community_id).await?;
    let ids: Vec<String> = members.iter().map(|m| m.user_id.clone()).collect();
    let profiles: HashMap<String, UserProfile> = state
        .stores
        .users
        .find_users(&ids)
        .await?
        .into_iter()
        .map(|u| (u.id.clone(), u))
        .collect();

    Ok(members
        .into_iter()
        .map(|membership| MemberView {
            user: profiles.get(&membership.user_id).cloned(),
            is_online: state.registry.user_in_room(&membership.user_id, community_id),
            membership,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::messages;
    use crate::chat::testing::Harness;
    use crate::gateway::events::SendMessagePayload;
    use crate::models::community::CommunitySettings;
    use crate::models::membership::{MemberRole, Membership};

    fn second_community(h: &Harness, id: &str, user_id: &str) {
        let now = Utc::now();
        h.store.insert_community(Community {
            id: id.into(),
            name: format!("Community {id}"),
            description: None,
            avatar: None,
            admin_id: Harness::ADMIN.into(),
            member_count: 2,
            last_message_at: None,
            last_message_preview: None,
            settings: CommunitySettings::default(),
            created_at: now - chrono::Duration::days(1),
            updated_at: now,
        });
        h.store
            .insert_membership(Membership::new(id, user_id, MemberRole::Member, now));
    }

    #[tokio::test]
    async fn my_communities_carry_unread_and_sort_by_activity() {
        let h = Harness::new();
        let alice = h.member("usr_alice");
        let bob = h.member("usr_bob");
        second_community(&h, "com_quiet", "usr_bob");

        let payload: SendMessagePayload = serde_json::from_value(serde_json::json!({
            "communityId": Harness::COMMUNITY,
            "content": { "text": "anyone around?" },
        }))
        .unwrap();
        messages::send(&h.state, &alice, payload).await.unwrap();

        let listed = my_communities(&h.state, &bob).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|c| c.community.id.as_str()).collect();
        assert_eq!(ids, [Harness::COMMUNITY, "com_quiet"]);
        assert_eq!(listed[0].membership.unread_count, 1);
        assert_eq!(
            listed[0].community.last_message_preview.as_deref(),
            Some("anyone around?")
        );
        assert_eq!(listed[1].membership.unread_count, 0);
    }

    #[tokio::test]
    async fn member_list_is_members_only_and_marks_online() {
        let h = Harness::new();
        let alice = h.member("usr_alice");
        let _rx = h.connect("conn_alice", &alice);
        h.state.registry.join("conn_alice", Harness::COMMUNITY);

        let members = list_members(&h.state, &alice, Harness::COMMUNITY)
            .await
            .unwrap();
        let rows: Vec<_> = members
            .iter()
            .map(|m| (m.membership.user_id.as_str(), m.is_online))
            .collect();
        assert_eq!(rows, [(Harness::ADMIN, false), ("usr_alice", true)]);
        assert_eq!(members[1].user.as_ref().map(|u| u.name.as_str()), Some("User usr_alice"));

        let stranger = h.user("usr_stranger");
        assert!(matches!(
            list_members(&h.state, &stranger, Harness::COMMUNITY).await,
            Err(ChatError::Authorization(_))
        ));
    }
}
