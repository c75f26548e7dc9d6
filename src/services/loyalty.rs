use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::entities::customer::{self, Entity as CustomerEntity};
use crate::entities::loyalty_rank::Entity as LoyaltyRankEntity;
use crate::entities::order::{self, Entity as OrderEntity, OrderStatus};
use crate::errors::ServiceError;

/// Tip history, rank defaults and points.
///
/// Discount eligibility is driven by the cumulative tip total over paid
/// orders; points are informational and never feed back into pricing.
#[derive(Clone)]
pub struct LoyaltyService {
    db: Arc<DatabaseConnection>,
}

impl LoyaltyService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Sum of tips over the customer's paid orders.
    #[instrument(skip(self))]
    pub async fn cumulative_tip_cents(&self, customer_id: Uuid) -> Result<i64, ServiceError> {
        let tips: Vec<i64> = OrderEntity::find()
            .select_only()
            .column(order::Column::TipCents)
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::Status.eq(OrderStatus::Paid))
            .into_tuple()
            .all(&*self.db)
            .await?;
        Ok(tips.into_iter().sum())
    }

    /// Default tip configured on the customer's loyalty rank, if any.
    #[instrument(skip(self))]
    pub async fn rank_default_tip(&self, customer_id: Uuid) -> Result<Option<i64>, ServiceError> {
        let Some(customer) = CustomerEntity::find_by_id(customer_id).one(&*self.db).await? else {
            return Ok(None);
        };
        let Some(rank_id) = customer.loyalty_rank_id else {
            return Ok(None);
        };
        let rank = LoyaltyRankEntity::find_by_id(rank_id).one(&*self.db).await?;
        Ok(rank.map(|r| r.default_tip_cents))
    }

    /// Credits one point per whole currency unit of the order total.
    /// Runs at most once per order; repeated calls return `false`.
    #[instrument(skip(self))]
    pub async fn accrue_points(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !order.is_paid() || order.loyalty_accrued {
            debug!(%order_id, "Loyalty accrual skipped");
            txn.commit().await?;
            return Ok(false);
        }

        let points = points_for_total(order.total_cents);
        if let Some(customer_id) = order.customer_id {
            CustomerEntity::update_many()
                .col_expr(
                    customer::Column::LoyaltyPoints,
                    Expr::col(customer::Column::LoyaltyPoints).add(points),
                )
                .filter(customer::Column::Id.eq(customer_id))
                .exec(&txn)
                .await?;
        }

        OrderEntity::update_many()
            .col_expr(order::Column::LoyaltyAccrued, Expr::value(true))
            .filter(order::Column::Id.eq(order_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        info!(%order_id, points, "Loyalty points accrued");
        Ok(true)
    }
}

pub fn points_for_total(total_cents: i64) -> i64 {
    (total_cents / 100).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_are_whole_units() {
        assert_eq!(points_for_total(2_399), 23);
        assert_eq!(points_for_total(99), 0);
        assert_eq!(points_for_total(0), 0);
    }
}
