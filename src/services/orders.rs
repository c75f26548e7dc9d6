use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::menu_item::{self, Entity as MenuItemEntity};
use crate::entities::order::{self, DeliveryMode, Entity as OrderEntity, OrderStatus};
use crate::entities::order_extra::{self, Entity as OrderExtraEntity};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::errors::ServiceError;
use crate::services::catalog::find_available;
use crate::services::pricing::{compute_subtotal_and_tax, compute_total, Discount, PricedLine};

/// Everything needed to write a new order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: Option<Uuid>,
    pub currency: String,
    pub delivery_mode: DeliveryMode,
    pub lines: Vec<PricedLine>,
    pub tip_cents: i64,
    pub discount: Discount,
    pub coupon_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

/// Order aggregate: header, items and the extras ledger.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderSnapshot {
    pub order: order::Model,
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<order_item::Model>,
    #[schema(value_type = Vec<Object>)]
    pub extras: Vec<order_extra::Model>,
}

impl OrderSnapshot {
    pub fn extra(&self, key: &str) -> i64 {
        self.extras
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.amount_cents)
            .unwrap_or(0)
    }
}

/// Order snapshot store. Items and money fields are written once, at
/// creation; afterwards only status, provider references and side-effect
/// markers move.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    tax_rate: Decimal,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, tax_rate: Decimal) -> Self {
        Self { db, tax_rate }
    }

    /// Writes the order, its items and the extras ledger in one transaction.
    /// Unit prices are re-read from the live catalog inside the transaction;
    /// the discount is capped at the recomputed subtotal.
    #[instrument(skip(self, new_order), fields(customer_id = ?new_order.customer_id, lines = new_order.lines.len()))]
    pub async fn persist_order(&self, new_order: NewOrder) -> Result<OrderSnapshot, ServiceError> {
        if new_order.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "order must contain at least one item".to_string(),
            ));
        }
        if new_order.tip_cents < 0 {
            return Err(ServiceError::ValidationError(
                "tip cannot be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let mut lines = Vec::with_capacity(new_order.lines.len());
        for line in &new_order.lines {
            let item = find_available(&txn, line.menu_item_id).await?.ok_or_else(|| {
                ServiceError::Unavailable(format!("Menu item {} is unavailable", line.menu_item_id))
            })?;
            if item.price_cents != line.unit_amount_cents {
                debug!(
                    menu_item_id = %item.id,
                    quoted = line.unit_amount_cents,
                    live = item.price_cents,
                    "Catalog price moved since quote"
                );
            }
            lines.push(PricedLine {
                menu_item_id: item.id,
                name: item.name,
                unit_amount_cents: item.price_cents,
                quantity: line.quantity,
            });
        }

        let (subtotal_cents, tax_cents) = compute_subtotal_and_tax(&lines, self.tax_rate);
        let discount = new_order.discount.capped_at(subtotal_cents);
        let total_cents = compute_total(
            subtotal_cents,
            tax_cents,
            new_order.tip_cents,
            discount.amount_cents,
        );
        let coupon_id = if discount.coupon_cents() > 0 {
            new_order.coupon_id
        } else {
            None
        };

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(new_order.customer_id),
            currency: Set(new_order.currency.to_ascii_lowercase()),
            delivery_mode: Set(new_order.delivery_mode),
            subtotal_cents: Set(subtotal_cents),
            tax_cents: Set(tax_cents),
            tip_cents: Set(new_order.tip_cents),
            discount_cents: Set(discount.amount_cents),
            total_cents: Set(total_cents),
            status: Set(OrderStatus::Created),
            coupon_id: Set(coupon_id),
            provider_session_id: Set(None),
            provider_intent_id: Set(None),
            metadata: Set(new_order.metadata),
            stock_committed: Set(false),
            loyalty_accrued: Set(false),
            hooks_dispatched: Set(false),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                menu_item_id: Set(line.menu_item_id),
                name: Set(line.name.clone()),
                unit_amount_cents: Set(line.unit_amount_cents),
                quantity: Set(line.quantity),
                line_total_cents: Set(line.line_total_cents()),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        let ledger = [
            (order_extra::TIP, new_order.tip_cents),
            (order_extra::TAX, tax_cents),
            (order_extra::COUPON_DISCOUNT, discount.coupon_cents()),
            (order_extra::LOYALTY_DISCOUNT, discount.loyalty_cents()),
            (
                order_extra::FINAL_TOTAL_EXCL_TIP,
                total_cents - new_order.tip_cents,
            ),
        ];
        let mut extras = Vec::with_capacity(ledger.len());
        for (key, amount_cents) in ledger {
            let extra = order_extra::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                key: Set(key.to_string()),
                amount_cents: Set(amount_cents),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            extras.push(extra);
        }

        txn.commit().await?;

        info!(
            %order_id,
            subtotal_cents,
            tip_cents = new_order.tip_cents,
            discount_cents = discount.amount_cents,
            total_cents,
            "Order persisted"
        );

        Ok(OrderSnapshot {
            order,
            items,
            extras,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    #[instrument(skip(self))]
    pub async fn get_snapshot(&self, order_id: Uuid) -> Result<OrderSnapshot, ServiceError> {
        let order = self.get_order(order_id).await?;
        let items = load_items(&*self.db, order_id).await?;
        let extras = OrderExtraEntity::find()
            .filter(order_extra::Column::OrderId.eq(order_id))
            .order_by_asc(order_extra::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(OrderSnapshot {
            order,
            items,
            extras,
        })
    }

    /// Records the provider checkout session on a created order.
    #[instrument(skip(self))]
    pub async fn attach_session(&self, order_id: Uuid, session_id: &str) -> Result<(), ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::ProviderSessionId, Expr::value(session_id))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Created))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            warn!(%order_id, "Session not attached; order is no longer open");
        }
        Ok(())
    }

    /// Decrements tracked stock for every line of a paid order, exactly once.
    /// Stock never goes below zero and untracked items are skipped.
    #[instrument(skip(self))]
    pub async fn commit_stock(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !order.is_paid() {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is {}, not paid",
                order_id, order.status
            )));
        }
        if order.stock_committed {
            txn.commit().await?;
            debug!(%order_id, "Stock already committed");
            return Ok(false);
        }

        for line in load_items(&txn, order_id).await? {
            let Some(item) = MenuItemEntity::find_by_id(line.menu_item_id)
                .lock_exclusive()
                .one(&txn)
                .await?
            else {
                warn!(%order_id, menu_item_id = %line.menu_item_id, "Menu item vanished; stock skipped");
                continue;
            };
            let Some(on_hand) = item.stock_quantity else {
                continue;
            };
            let remaining = (on_hand - line.quantity).max(0);
            if on_hand < line.quantity {
                warn!(
                    %order_id,
                    menu_item_id = %item.id,
                    on_hand,
                    ordered = line.quantity,
                    "Stock short; clamped at zero"
                );
            }
            let mut active: menu_item::ActiveModel = item.into();
            active.stock_quantity = Set(Some(remaining));
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }

        OrderEntity::update_many()
            .col_expr(order::Column::StockCommitted, Expr::value(true))
            .filter(order::Column::Id.eq(order_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        info!(%order_id, "Stock committed");
        Ok(true)
    }
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<order_item::Model>, ServiceError> {
    Ok(OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::CreatedAt)
        .all(conn)
        .await?)
}
