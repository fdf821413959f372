//! Persistence boundary used by the real-time layer and the DM resolver.
//!
//! [`ChatStore`] keeps the handlers independent of sea-orm so they can be
//! exercised against any backend; [`SeaOrmChatStore`] is the production one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::prelude::Uuid;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::models::chat::{self, ChatType};
use crate::models::chat_member::{self, MemberRole};
use crate::models::message::{self, MessageType};
use crate::models::user;

/// A chat together with its memberships, as cached and returned over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSnapshot {
    #[serde(flatten)]
    pub chat: chat::Model,
    pub members: Vec<chat_member::Model>,
}

impl ChatSnapshot {
    pub fn member_ids(&self) -> Vec<Uuid> {
        self.members.iter().map(|m| m.user_id).collect()
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

/// Canonical key for an unordered user pair: the smaller id first.
pub fn dm_pair_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

#[async_trait]
pub trait ChatStore: Send + Sync + 'static {
    async fn membership(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<chat_member::Model>, DbErr>;

    /// Inserts the message and bumps the chat's `last_message_at`.
    async fn create_message(&self, msg: NewMessage) -> Result<message::Model, DbErr>;

    async fn update_last_read(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DbErr>;

    /// Messages in `chat_id` not sent by `user_id` and created after `since`.
    async fn count_unread(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, DbErr>;

    async fn last_message_id(&self, chat_id: Uuid) -> Result<Option<Uuid>, DbErr>;

    /// Ids of every chat `user_id` belongs to.
    async fn list_memberships(&self, user_id: Uuid) -> Result<Vec<Uuid>, DbErr>;

    async fn list_other_members(&self, chat_id: Uuid, user_id: Uuid) -> Result<Vec<Uuid>, DbErr>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<user::Model>, DbErr>;

    async fn touch_last_seen(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), DbErr>;

    async fn find_direct_chat(&self, a: Uuid, b: Uuid) -> Result<Option<ChatSnapshot>, DbErr>;

    /// Creates the direct chat for `{a, b}` or returns the one that already exists.
    async fn create_direct_chat(&self, a: Uuid, b: Uuid) -> Result<ChatSnapshot, DbErr>;
}

#[derive(Clone)]
pub struct SeaOrmChatStore {
    db: DatabaseConnection,
}

impl SeaOrmChatStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn snapshot(&self, chat: chat::Model) -> Result<ChatSnapshot, DbErr> {
        let members = chat_member::Entity::find()
            .filter(chat_member::Column::ChatId.eq(chat.id))
            .order_by_asc(chat_member::Column::UserId)
            .all(&self.db)
            .await?;
        Ok(ChatSnapshot { chat, members })
    }
}

#[async_trait]
impl ChatStore for SeaOrmChatStore {
    async fn membership(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<chat_member::Model>, DbErr> {
        chat_member::Entity::find_by_id((chat_id, user_id))
            .one(&self.db)
            .await
    }

    async fn create_message(&self, msg: NewMessage) -> Result<message::Model, DbErr> {
        let txn = self.db.begin().await?;

        let saved = message::ActiveModel {
            id: Set(Uuid::new_v4()),
            chat_id: Set(msg.chat_id),
            sender_id: Set(Some(msg.sender_id)),
            content: Set(msg.content),
            message_type: Set(msg.message_type),
            created_at: Set(msg.created_at),
        }
        .insert(&txn)
        .await?;

        chat::Entity::update_many()
            .col_expr(chat::Column::LastMessageAt, Expr::value(saved.created_at))
            .filter(chat::Column::Id.eq(saved.chat_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(saved)
    }

    async fn update_last_read(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DbErr> {
        chat_member::Entity::update_many()
            .col_expr(chat_member::Column::LastReadAt, Expr::value(at))
            .filter(chat_member::Column::ChatId.eq(chat_id))
            .filter(chat_member::Column::UserId.eq(user_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn count_unread(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        message::Entity::find()
            .filter(message::Column::ChatId.eq(chat_id))
            .filter(message::Column::CreatedAt.gt(since))
            .filter(
                Condition::any()
                    .add(message::Column::SenderId.ne(user_id))
                    .add(message::Column::SenderId.is_null()),
            )
            .count(&self.db)
            .await
    }

    async fn last_message_id(&self, chat_id: Uuid) -> Result<Option<Uuid>, DbErr> {
        let last = message::Entity::find()
            .filter(message::Column::ChatId.eq(chat_id))
            .order_by_desc(message::Column::CreatedAt)
            .limit(1)
            .one(&self.db)
            .await?;
        Ok(last.map(|m| m.id))
    }

    async fn list_memberships(&self, user_id: Uuid) -> Result<Vec<Uuid>, DbErr> {
        let rows = chat_member::Entity::find()
            .filter(chat_member::Column::UserId.eq(user_id))
            .order_by_asc(chat_member::Column::JoinedAt)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|m| m.chat_id).collect())
    }

    async fn list_other_members(&self, chat_id: Uuid, user_id: Uuid) -> Result<Vec<Uuid>, DbErr> {
        let rows = chat_member::Entity::find()
            .filter(chat_member::Column::ChatId.eq(chat_id))
            .filter(chat_member::Column::UserId.ne(user_id))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|m| m.user_id).collect())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<user::Model>, DbErr> {
        user::Entity::find_by_id(user_id).one(&self.db).await
    }

    async fn touch_last_seen(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), DbErr> {
        user::Model::touch_last_seen(&self.db, user_id, at).await
    }

    async fn find_direct_chat(&self, a: Uuid, b: Uuid) -> Result<Option<ChatSnapshot>, DbErr> {
        match chat::Model::find_by_dm_key(&self.db, &dm_pair_key(a, b)).await? {
            Some(chat) => Ok(Some(self.snapshot(chat).await?)),
            None => Ok(None),
        }
    }

    async fn create_direct_chat(&self, a: Uuid, b: Uuid) -> Result<ChatSnapshot, DbErr> {
        let key = dm_pair_key(a, b);
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let inserted = chat::ActiveModel {
            id: Set(Uuid::new_v4()),
            chat_type: Set(ChatType::Dm),
            name: Set(None),
            dm_key: Set(Some(key.clone())),
            created_at: Set(now),
            last_message_at: Set(now),
        }
        .insert(&txn)
        .await;

        match inserted {
            Ok(chat) => {
                let members: BTreeSet<Uuid> = [a, b].into_iter().collect();
                chat_member::Entity::insert_many(members.into_iter().map(|uid| {
                    chat_member::ActiveModel {
                        chat_id: Set(chat.id),
                        user_id: Set(uid),
                        role: Set(MemberRole::Member),
                        joined_at: Set(now),
                        last_read_at: Set(now),
                    }
                }))
                .exec_without_returning(&txn)
                .await?;
                txn.commit().await?;
                tracing::debug!(chat_id = %chat.id, dm_key = %key, "Created direct chat");
            }
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                // Lost the race for this pair; the winner's row is authoritative.
                txn.rollback().await?;
                tracing::debug!(dm_key = %key, "Direct chat already exists");
            }
            Err(err) => return Err(err),
        }

        let chat = chat::Model::find_by_dm_key(&self.db, &key)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("direct chat {key}")))?;
        self.snapshot(chat).await
    }
}
