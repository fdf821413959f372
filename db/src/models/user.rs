use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveValue::Set, DbConn};
use serde::{Deserialize, Serialize};

/// Represents a user in the `users` table.
///
/// Only the columns the real-time layer reads are mapped here; profile data is
/// owned elsewhere.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    /// Stamped when the user's live session ends.
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
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
    pub async fn create(
        db: &DbConn,
        username: &str,
        display_name: Option<&str>,
    ) -> Result<Model, DbErr> {
        let active = ActiveModel {
            id: Set(Uuid::new_v4()),
            username: Set(username.to_owned()),
            display_name: Set(display_name.map(str::to_owned)),
            last_seen_at: Set(None),
            created_at: Set(Utc::now()),
        };

        active.insert(db).await
    }

    pub async fn find_by_id(db: &DbConn, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(db).await
    }

    pub async fn touch_last_seen(db: &DbConn, id: Uuid, at: DateTime<Utc>) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::LastSeenAt, Expr::value(at))
            .filter(Column::Id.eq(id))
            .exec(db)
            .await?;
        Ok(())
    }
}
