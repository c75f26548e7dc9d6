use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "payment_intents")]
#[schema(as = PaymentIntent)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub idempotency_key: String,
    #[sea_orm(unique)]
    pub provider_intent_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: IntentStatus,
    #[sea_orm(nullable)]
    pub order_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub last_event_id: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntentStatus {
    #[sea_orm(string_value = "requires_payment_method")]
    RequiresPaymentMethod,
    #[sea_orm(string_value = "requires_confirmation")]
    RequiresConfirmation,
    #[sea_orm(string_value = "requires_action")]
    RequiresAction,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

impl IntentStatus {
    /// Position along the happy path; terminal states rank highest.
    fn rank(self) -> u8 {
        match self {
            IntentStatus::RequiresPaymentMethod => 0,
            IntentStatus::RequiresConfirmation => 1,
            IntentStatus::RequiresAction => 2,
            IntentStatus::Processing => 3,
            IntentStatus::Succeeded | IntentStatus::Canceled => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, IntentStatus::Succeeded | IntentStatus::Canceled)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Events may arrive out of order, so any forward jump is accepted;
    /// `canceled` is reachable from every non-terminal state and nothing
    /// leaves a terminal state.
    pub fn can_transition_to(self, next: IntentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == IntentStatus::Canceled || next.rank() > self.rank()
    }
}

#[cfg(test)]
mod tests {
    use super::IntentStatus::*;

    #[test]
    fn terminal_states_never_regress() {
        assert!(!Succeeded.can_transition_to(Processing));
        assert!(!Succeeded.can_transition_to(Canceled));
        assert!(!Canceled.can_transition_to(Succeeded));
    }

    #[test]
    fn forward_jumps_and_cancellation_are_allowed() {
        assert!(RequiresPaymentMethod.can_transition_to(Succeeded));
        assert!(RequiresAction.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Canceled));
        assert!(!Processing.can_transition_to(RequiresAction));
        assert!(!Processing.can_transition_to(Processing));
    }
}
