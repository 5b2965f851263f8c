//! PostgreSQL store on Diesel + diesel-async.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::{AsyncConnection, AsyncPgConnection};
use scoped_futures::ScopedFutureExt;

use super::{
    CommunityStore, HistoryCursor, MembershipStore, MessageStore, StoreError, StoreResult,
    UserDirectory,
};
use crate::db::pool::DbPool;
use crate::db::schema::{
    communities, memberships, message_edits, message_reactions, message_receipts, messages, users,
};
use crate::models::community::{
    Community, CommunityRow, CommunityUpdates, NewCommunity, UpdateCommunity,
};
use crate::models::membership::{
    MemberRole, MemberStatus, Membership, MembershipRow, NewMembership,
};
use crate::models::message::{
    EditEntry, EditRow, Message, MessageContent, MessageRow, MessageType, NewEdit, NewMessage,
    Reaction, ReactionAction, ReactionRow, Receipt, ReceiptKind, ReceiptRow, DELETED_PLACEHOLDER,
};
use crate::models::user::UserProfile;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Map a unique violation to `Conflict`, pass everything else through.
fn conflict_on_unique(err: DieselError, what: &'static str) -> StoreError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            StoreError::Conflict(what)
        }
        other => StoreError::Database(other),
    }
}

fn to_json(content: &MessageContent) -> StoreResult<serde_json::Value> {
    serde_json::to_value(content).map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// Attach reactions, receipts and edit history to message rows.
async fn hydrate(conn: &mut AsyncPgConnection, rows: Vec<MessageRow>) -> StoreResult<Vec<Message>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    let reaction_rows: Vec<ReactionRow> = diesel_async::RunQueryDsl::load(
        message_reactions::table
            .filter(message_reactions::message_id.eq_any(&ids))
            .order(message_reactions::created_at.asc())
            .select(ReactionRow::as_select()),
        conn,
    )
    .await?;

    let receipt_rows: Vec<ReceiptRow> = diesel_async::RunQueryDsl::load(
        message_receipts::table
            .filter(message_receipts::message_id.eq_any(&ids))
            .order(message_receipts::at.asc())
            .select(ReceiptRow::as_select()),
        conn,
    )
    .await?;

    let edit_rows: Vec<EditRow> = diesel_async::RunQueryDsl::load(
        message_edits::table
            .filter(message_edits::message_id.eq_any(&ids))
            .order(message_edits::id.asc())
            .select(EditRow::as_select()),
        conn,
    )
    .await?;

    let mut reactions: HashMap<String, Vec<Reaction>> = HashMap::new();
    for r in reaction_rows {
        reactions.entry(r.message_id).or_default().push(Reaction {
            user_id: r.user_id,
            emoji: r.emoji,
            created_at: r.created_at,
        });
    }

    let mut read: HashMap<String, Vec<Receipt>> = HashMap::new();
    let mut delivered: HashMap<String, Vec<Receipt>> = HashMap::new();
    for r in receipt_rows {
        let target = if r.kind == ReceiptKind::Read.as_str() {
            &mut read
        } else {
            &mut delivered
        };
        target.entry(r.message_id).or_default().push(Receipt {
            user_id: r.user_id,
            at: r.at,
        });
    }

    let mut edits: HashMap<String, Vec<EditEntry>> = HashMap::new();
    for e in edit_rows {
        edits.entry(e.message_id).or_default().push(EditEntry {
            content: e.content,
            edited_at: e.edited_at,
        });
    }

    rows.into_iter()
        .map(|row| {
            let message_type = MessageType::parse(&row.message_type)
                .ok_or_else(|| StoreError::Corrupt(format!("message type {}", row.message_type)))?;
            let content: MessageContent = serde_json::from_value(row.content)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            Ok(Message {
                reactions: reactions.remove(&row.id).unwrap_or_default(),
                read_by: read.remove(&row.id).unwrap_or_default(),
                delivered_to: delivered.remove(&row.id).unwrap_or_default(),
                edit_history: edits.remove(&row.id).unwrap_or_default(),
                id: row.id,
                community_id: row.community_id,
                sender_id: row.sender_id,
                message_type,
                content,
                reply_to: row.reply_to,
                mentions: row.mentions,
                is_edited: row.is_edited,
                is_deleted: row.is_deleted,
                deleted_at: row.deleted_at,
                deleted_for: row.deleted_for,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        })
        .collect()
}

async fn message_exists(conn: &mut AsyncPgConnection, message_id: &str) -> StoreResult<bool> {
    let found: Option<String> = diesel_async::RunQueryDsl::get_result(
        messages::table.find(message_id).select(messages::id),
        conn,
    )
    .await
    .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
        let mut conn = self.pool.get().await?;
        let user = diesel_async::RunQueryDsl::get_result(
            users::table.find(user_id).select(UserProfile::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(user)
    }

    async fn find_users(&self, user_ids: &[String]) -> StoreResult<Vec<UserProfile>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let found = diesel_async::RunQueryDsl::load(
            users::table
                .filter(users::id.eq_any(user_ids))
                .select(UserProfile::as_select()),
            &mut conn,
        )
        .await?;
        Ok(found)
    }
}

#[async_trait]
impl CommunityStore for PgStore {
    async fn find_community(&self, community_id: &str) -> StoreResult<Option<Community>> {
        let mut conn = self.pool.get().await?;
        let row: Option<CommunityRow> = diesel_async::RunQueryDsl::get_result(
            communities::table
                .find(community_id)
                .select(CommunityRow::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(row.map(Community::from))
    }

    async fn find_communities(&self, community_ids: &[String]) -> StoreResult<Vec<Community>> {
        if community_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let rows: Vec<CommunityRow> = diesel_async::RunQueryDsl::load(
            communities::table
                .filter(communities::id.eq_any(community_ids))
                .select(CommunityRow::as_select()),
            &mut conn,
        )
        .await?;
        Ok(rows.into_iter().map(Community::from).collect())
    }

    async fn create_community(&self, community: &Community, admin: &Membership) -> StoreResult<()> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                diesel_async::RunQueryDsl::execute(
                    diesel::insert_into(communities::table).values(NewCommunity::from(community)),
                    conn,
                )
                .await
                .map_err(|e| conflict_on_unique(e, "community"))?;

                diesel_async::RunQueryDsl::execute(
                    diesel::insert_into(memberships::table).values(NewMembership::from(admin)),
                    conn,
                )
                .await
                .map_err(|e| conflict_on_unique(e, "membership"))?;

                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    async fn update_community(
        &self,
        community_id: &str,
        updates: &CommunityUpdates,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Community>> {
        let mut conn = self.pool.get().await?;
        let row: Option<CommunityRow> = diesel_async::RunQueryDsl::get_result(
            diesel::update(communities::table.find(community_id))
                .set(UpdateCommunity::new(updates, at))
                .returning(CommunityRow::as_returning()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(row.map(Community::from))
    }

    async fn record_last_message(
        &self,
        community_id: &str,
        at: DateTime<Utc>,
        preview: &str,
    ) -> StoreResult<()> {
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::update(communities::table.find(community_id)).set((
                communities::last_message_at.eq(at),
                communities::last_message_preview.eq(preview),
                communities::updated_at.eq(at),
            )),
            &mut conn,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MembershipStore for PgStore {
    async fn find_membership(
        &self,
        community_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<Membership>> {
        let mut conn = self.pool.get().await?;
        let row: Option<MembershipRow> = diesel_async::RunQueryDsl::get_result(
            memberships::table
                .find((community_id, user_id))
                .select(MembershipRow::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(row.map(Membership::from))
    }

    async fn active_memberships(&self, user_id: &str) -> StoreResult<Vec<Membership>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<MembershipRow> = diesel_async::RunQueryDsl::load(
            memberships::table
                .filter(memberships::user_id.eq(user_id))
                .filter(memberships::status.eq(MemberStatus::Active.as_str()))
                .order(memberships::community_id.asc())
                .select(MembershipRow::as_select()),
            &mut conn,
        )
        .await?;
        Ok(rows.into_iter().map(Membership::from).collect())
    }

    async fn community_members(&self, community_id: &str) -> StoreResult<Vec<Membership>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<MembershipRow> = diesel_async::RunQueryDsl::load(
            memberships::table
                .filter(memberships::community_id.eq(community_id))
                .filter(memberships::status.eq(MemberStatus::Active.as_str()))
                .order((memberships::joined_at.asc(), memberships::user_id.asc()))
                .select(MembershipRow::as_select()),
            &mut conn,
        )
        .await?;
        let mut members: Vec<Membership> = rows.into_iter().map(Membership::from).collect();
        members.sort_by_key(|m| m.role != MemberRole::Admin);
        Ok(members)
    }

    async fn join(&self, membership: &Membership) -> StoreResult<()> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                diesel_async::RunQueryDsl::execute(
                    diesel::insert_into(memberships::table).values(NewMembership::from(membership)),
                    conn,
                )
                .await
                .map_err(|e| conflict_on_unique(e, "membership"))?;

                diesel_async::RunQueryDsl::execute(
                    diesel::update(communities::table.find(&membership.community_id))
                        .set(communities::member_count.eq(communities::member_count + 1)),
                    conn,
                )
                .await?;

                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    async fn remove(&self, community_id: &str, user_id: &str) -> StoreResult<bool> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                let deleted = diesel_async::RunQueryDsl::execute(
                    diesel::delete(memberships::table.find((community_id, user_id))),
                    conn,
                )
                .await?;

                if deleted > 0 {
                    diesel_async::RunQueryDsl::execute(
                        diesel::update(communities::table.find(community_id))
                            .set(communities::member_count.eq(communities::member_count - 1)),
                        conn,
                    )
                    .await?;
                }

                Ok(deleted > 0)
            }
            .scope_boxed()
        })
        .await
    }

    async fn increment_unread(&self, community_id: &str, sender_id: &str) -> StoreResult<u64> {
        let mut conn = self.pool.get().await?;
        let touched = diesel_async::RunQueryDsl::execute(
            diesel::update(
                memberships::table
                    .filter(memberships::community_id.eq(community_id))
                    .filter(memberships::user_id.ne(sender_id))
                    .filter(memberships::status.eq(MemberStatus::Active.as_str())),
            )
            .set(memberships::unread_count.eq(memberships::unread_count + 1)),
            &mut conn,
        )
        .await?;
        Ok(touched as u64)
    }

    async fn mark_all_read(
        &self,
        community_id: &str,
        user_id: &str,
        last_read_message_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut conn = self.pool.get().await?;
        let target = memberships::table.find((community_id, user_id));
        let touched = match last_read_message_id {
            Some(message_id) => {
                diesel_async::RunQueryDsl::execute(
                    diesel::update(target).set((
                        memberships::unread_count.eq(0),
                        memberships::last_seen_at.eq(at),
                        memberships::last_read_message_id.eq(message_id),
                    )),
                    &mut conn,
                )
                .await?
            }
            None => {
                diesel_async::RunQueryDsl::execute(
                    diesel::update(target).set((
                        memberships::unread_count.eq(0),
                        memberships::last_seen_at.eq(at),
                    )),
                    &mut conn,
                )
                .await?
            }
        };
        Ok(touched > 0)
    }

    async fn touch_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut conn = self.pool.get().await?;
        let touched = diesel_async::RunQueryDsl::execute(
            diesel::update(memberships::table.filter(memberships::user_id.eq(user_id)))
                .set(memberships::last_seen_at.eq(at)),
            &mut conn,
        )
        .await?;
        Ok(touched as u64)
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn insert_message(&self, message: &Message) -> StoreResult<()> {
        let content = to_json(&message.content)?;
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(messages::table).values(NewMessage {
                id: &message.id,
                community_id: &message.community_id,
                sender_id: &message.sender_id,
                message_type: message.message_type.as_str(),
                content,
                reply_to: message.reply_to.as_deref(),
                mentions: &message.mentions,
                is_edited: message.is_edited,
                is_deleted: message.is_deleted,
                deleted_for: &message.deleted_for,
                created_at: message.created_at,
                updated_at: message.updated_at,
            }),
            &mut conn,
        )
        .await
        .map_err(|e| conflict_on_unique(e, "message"))?;
        Ok(())
    }

    async fn find_message(&self, message_id: &str) -> StoreResult<Option<Message>> {
        let mut conn = self.pool.get().await?;
        let row: Option<MessageRow> = diesel_async::RunQueryDsl::get_result(
            messages::table
                .find(message_id)
                .select(MessageRow::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(hydrate(&mut conn, vec![row]).await?.pop())
    }

    async fn list_messages(
        &self,
        community_id: &str,
        viewer_id: &str,
        before: Option<&HistoryCursor>,
        limit: i64,
    ) -> StoreResult<Vec<Message>> {
        let mut conn = self.pool.get().await?;
        let mut query = messages::table
            .filter(messages::community_id.eq(community_id))
            .filter(diesel::dsl::not(
                messages::deleted_for.contains(vec![viewer_id.to_string()]),
            ))
            .order((messages::created_at.desc(), messages::id.desc()))
            .limit(limit)
            .select(MessageRow::as_select())
            .into_boxed();
        if let Some(cursor) = before {
            query = match &cursor.message_id {
                Some(message_id) => query.filter(
                    messages::created_at.lt(cursor.created_at).or(messages::created_at
                        .eq(cursor.created_at)
                        .and(messages::id.lt(message_id.clone()))),
                ),
                None => query.filter(messages::created_at.lt(cursor.created_at)),
            };
        }
        let rows: Vec<MessageRow> = diesel_async::RunQueryDsl::load(query, &mut conn).await?;
        hydrate(&mut conn, rows).await
    }

    async fn add_receipts(
        &self,
        message_ids: &[String],
        user_id: &str,
        kind: ReceiptKind,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<String>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let existing: Vec<String> = diesel_async::RunQueryDsl::load(
            messages::table
                .filter(messages::id.eq_any(message_ids))
                .select(messages::id),
            &mut conn,
        )
        .await?;
        if existing.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<ReceiptRow> = existing
            .into_iter()
            .map(|message_id| ReceiptRow {
                message_id,
                user_id: user_id.to_string(),
                kind: kind.as_str().to_string(),
                at,
            })
            .collect();

        let added: Vec<String> = diesel_async::RunQueryDsl::get_results(
            diesel::insert_into(message_receipts::table)
                .values(&rows)
                .on_conflict_do_nothing()
                .returning(message_receipts::message_id),
            &mut conn,
        )
        .await?;
        Ok(added)
    }

    async fn toggle_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<(ReactionAction, Vec<Reaction>)>> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                // Row lock serializes concurrent toggles on the same message.
                let locked: Option<String> = diesel_async::RunQueryDsl::get_result(
                    messages::table
                        .find(message_id)
                        .select(messages::id)
                        .for_update(),
                    conn,
                )
                .await
                .optional()?;
                if locked.is_none() {
                    return Ok(None);
                }

                let removed = diesel_async::RunQueryDsl::execute(
                    diesel::delete(message_reactions::table.find((message_id, user_id, emoji))),
                    conn,
                )
                .await?;

                let action = if removed > 0 {
                    ReactionAction::Remove
                } else {
                    diesel_async::RunQueryDsl::execute(
                        diesel::insert_into(message_reactions::table).values(ReactionRow {
                            message_id: message_id.to_string(),
                            user_id: user_id.to_string(),
                            emoji: emoji.to_string(),
                            created_at: at,
                        }),
                        conn,
                    )
                    .await?;
                    ReactionAction::Add
                };

                let rows: Vec<ReactionRow> = diesel_async::RunQueryDsl::load(
                    message_reactions::table
                        .filter(message_reactions::message_id.eq(message_id))
                        .order(message_reactions::created_at.asc())
                        .select(ReactionRow::as_select()),
                    conn,
                )
                .await?;

                let reactions = rows
                    .into_iter()
                    .map(|r| Reaction {
                        user_id: r.user_id,
                        emoji: r.emoji,
                        created_at: r.created_at,
                    })
                    .collect();
                Ok(Some((action, reactions)))
            }
            .scope_boxed()
        })
        .await
    }

    async fn edit_message(&self, message_id: &str, text: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                // Row lock so concurrent edits each record the text they replace.
                let locked: Option<(serde_json::Value, bool)> = diesel_async::RunQueryDsl::get_result(
                    messages::table
                        .find(message_id)
                        .select((messages::content, messages::is_deleted))
                        .for_update(),
                    conn,
                )
                .await
                .optional()?;
                let Some((content, false)) = locked else {
                    return Ok(false);
                };

                let mut content: MessageContent = serde_json::from_value(content)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                let previous = content.text.replace(text.to_string()).unwrap_or_default();
                let content = to_json(&content)?;

                diesel_async::RunQueryDsl::execute(
                    diesel::update(messages::table.find(message_id)).set((
                        messages::content.eq(content),
                        messages::is_edited.eq(true),
                        messages::updated_at.eq(at),
                    )),
                    conn,
                )
                .await?;

                diesel_async::RunQueryDsl::execute(
                    diesel::insert_into(message_edits::table).values(NewEdit {
                        message_id,
                        content: &previous,
                        edited_at: at,
                    }),
                    conn,
                )
                .await?;

                Ok(true)
            }
            .scope_boxed()
        })
        .await
    }

    async fn delete_for_everyone(&self, message_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let placeholder = to_json(&MessageContent::text(DELETED_PLACEHOLDER))?;
        let mut conn = self.pool.get().await?;
        let updated = diesel_async::RunQueryDsl::execute(
            diesel::update(
                messages::table
                    .find(message_id)
                    .filter(messages::is_deleted.eq(false)),
            )
            .set((
                messages::is_deleted.eq(true),
                messages::deleted_at.eq(at),
                messages::content.eq(placeholder),
                messages::updated_at.eq(at),
            )),
            &mut conn,
        )
        .await?;
        if updated > 0 {
            return Ok(true);
        }
        message_exists(&mut conn, message_id).await
    }

    async fn hide_for(&self, message_id: &str, user_id: &str) -> StoreResult<bool> {
        let mut conn = self.pool.get().await?;
        let me = vec![user_id.to_string()];
        let updated = diesel_async::RunQueryDsl::execute(
            diesel::update(
                messages::table
                    .find(message_id)
                    .filter(diesel::dsl::not(messages::deleted_for.contains(me.clone()))),
            )
            .set(messages::deleted_for.eq(messages::deleted_for.concat(me))),
            &mut conn,
        )
        .await?;
        if updated > 0 {
            return Ok(true);
        }
        message_exists(&mut conn, message_id).await
    }
}
