use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub kind: CouponKind,
    /// Whole percent for `percent` coupons, cents for `fixed` coupons
    pub value: i64,
    pub is_active: bool,
    #[sea_orm(nullable)]
    pub valid_from: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub valid_until: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub max_uses: Option<i32>,
    pub times_used: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn has_uses_left(&self) -> bool {
        self.max_uses.map_or(true, |cap| self.times_used < cap)
    }

    /// Active, inside its validity window and under its usage cap.
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.valid_from.map_or(true, |from| from <= now)
            && self.valid_until.map_or(true, |until| now < until)
            && self.has_uses_left()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum CouponKind {
    #[sea_orm(string_value = "percent")]
    Percent,
    #[sea_orm(string_value = "fixed")]
    Fixed,
}
