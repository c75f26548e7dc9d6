use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Booking of a table over the half-open window `[start_at, end_at)`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "reservations")]
#[schema(as = Reservation)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub table_id: Uuid,
    pub customer_id: Uuid,
    pub party_size: i32,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: ReservationStatus,
    #[sea_orm(nullable)]
    pub deposit_cents: Option<i64>,
    pub deposit_paid: bool,
    #[sea_orm(nullable)]
    pub deposit_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::dining_table::Entity",
        from = "Column::TableId",
        to = "super::dining_table::Column::Id"
    )]
    Table,
}

impl Related<super::dining_table::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Table.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn requires_deposit(&self) -> bool {
        self.deposit_cents.map_or(false, |cents| cents > 0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReservationStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "seated")]
    Seated,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "no_show")]
    NoShow,
}

impl ReservationStatus {
    /// Statuses that count toward overlap and per-guest checks.
    pub const ACTIVE: [ReservationStatus; 2] =
        [ReservationStatus::Pending, ReservationStatus::Confirmed];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Seated)
                | (Seated, Completed)
                | (Pending | Confirmed, Cancelled)
                | (Pending | Confirmed, NoShow)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ReservationStatus::{self, *};
    use rstest::rstest;

    #[rstest]
    #[case(Pending, Confirmed, true)]
    #[case(Confirmed, Seated, true)]
    #[case(Seated, Completed, true)]
    #[case(Pending, Cancelled, true)]
    #[case(Confirmed, NoShow, true)]
    #[case(Pending, Seated, false)]
    #[case(Seated, Cancelled, false)]
    #[case(Completed, Pending, false)]
    #[case(NoShow, Confirmed, false)]
    #[case(Cancelled, Confirmed, false)]
    fn lifecycle_moves_forward_only(
        #[case] from: ReservationStatus,
        #[case] to: ReservationStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn only_pending_and_confirmed_are_active() {
        assert!(Pending.is_active());
        assert!(Confirmed.is_active());
        assert!(!Seated.is_active());
        assert!(!Cancelled.is_active());
    }
}
