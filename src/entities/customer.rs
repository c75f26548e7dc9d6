use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "customers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[sea_orm(nullable)]
    pub loyalty_rank_id: Option<Uuid>,
    pub loyalty_points: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::loyalty_rank::Entity",
        from = "Column::LoyaltyRankId",
        to = "super::loyalty_rank::Column::Id"
    )]
    LoyaltyRank,
}

impl Related<super::loyalty_rank::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LoyaltyRank.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
