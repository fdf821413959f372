use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbConn, TransactionTrait};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::chat_member::{self, MemberRole};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chats")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_name = "type")]
    #[serde(rename = "type")]
    pub chat_type: ChatType,

    pub name: Option<String>,

    /// Canonical user pair for direct chats, `None` for groups.
    pub dm_key: Option<String>,

    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "chat_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ChatType {
    #[sea_orm(string_value = "dm")]
    Dm,

    #[sea_orm(string_value = "group")]
    Group,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::chat_member::Entity")]
    ChatMember,

    #[sea_orm(has_many = "super::message::Entity")]
    Message,
}

impl Related<super::chat_member::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChatMember.def()
    }
}

impl Related<super::message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Message.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Creates a group chat and its memberships in one transaction.
    /// The first member becomes the admin.
    pub async fn create_group(
        db: &DbConn,
        name: &str,
        member_ids: &[Uuid],
    ) -> Result<Model, DbErr> {
        let now = Utc::now();
        let txn = db.begin().await?;

        let chat = ActiveModel {
            id: Set(Uuid::new_v4()),
            chat_type: Set(ChatType::Group),
            name: Set(Some(name.to_owned())),
            dm_key: Set(None),
            created_at: Set(now),
            last_message_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let members = member_ids.iter().enumerate().map(|(i, uid)| chat_member::ActiveModel {
            chat_id: Set(chat.id),
            user_id: Set(*uid),
            role: Set(if i == 0 {
                MemberRole::Admin
            } else {
                MemberRole::Member
            }),
            joined_at: Set(now),
            last_read_at: Set(now),
        });
        if !member_ids.is_empty() {
            chat_member::Entity::insert_many(members)
                .exec_without_returning(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(chat)
    }

    pub async fn find_by_dm_key<C>(db: &C, key: &str) -> Result<Option<Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find().filter(Column::DmKey.eq(key)).one(db).await
    }
}
