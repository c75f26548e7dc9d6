//! Outbound sync with the point-of-sale, inventory and analytics systems.
//!
//! The concrete platform clients live outside this crate; the job worker
//! talks to them through [`SyncGateway`]. [`LoggingSyncGateway`] is wired in
//! when no platform is configured.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::entities::{order, order_item};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync target rejected the payload: {0}")]
    Rejected(String),
    #[error("Sync target unavailable: {0}")]
    Unavailable(String),
}

impl From<SyncError> for crate::errors::ServiceError {
    fn from(err: SyncError) -> Self {
        crate::errors::ServiceError::ExternalServiceError(err.to_string())
    }
}

/// Line-level view pushed to downstream systems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncLine {
    pub menu_item_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub line_total_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSync {
    pub order_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub currency: String,
    pub delivery_mode: String,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub tip_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub lines: Vec<SyncLine>,
}

impl OrderSync {
    pub fn from_order(order: &order::Model, items: &[order_item::Model]) -> Self {
        Self {
            order_id: order.id,
            customer_id: order.customer_id,
            currency: order.currency.clone(),
            delivery_mode: order.delivery_mode.to_string(),
            subtotal_cents: order.subtotal_cents,
            tax_cents: order.tax_cents,
            tip_cents: order.tip_cents,
            discount_cents: order.discount_cents,
            total_cents: order.total_cents,
            lines: items
                .iter()
                .map(|item| SyncLine {
                    menu_item_id: item.menu_item_id,
                    name: item.name.clone(),
                    quantity: item.quantity,
                    line_total_cents: item.line_total_cents,
                })
                .collect(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SyncGateway: Send + Sync {
    async fn push_pos_order(&self, order: &OrderSync) -> Result<(), SyncError>;
    async fn push_inventory(&self, order: &OrderSync) -> Result<(), SyncError>;
    async fn record_sale(&self, order: &OrderSync) -> Result<(), SyncError>;
}

#[derive(Debug, Default, Clone)]
pub struct LoggingSyncGateway;

#[async_trait]
impl SyncGateway for LoggingSyncGateway {
    async fn push_pos_order(&self, order: &OrderSync) -> Result<(), SyncError> {
        info!(order_id = %order.order_id, lines = order.lines.len(), "POS order synced");
        Ok(())
    }

    async fn push_inventory(&self, order: &OrderSync) -> Result<(), SyncError> {
        let units: i64 = order.lines.iter().map(|l| i64::from(l.quantity)).sum();
        info!(order_id = %order.order_id, units, "Inventory synced");
        Ok(())
    }

    async fn record_sale(&self, order: &OrderSync) -> Result<(), SyncError> {
        info!(
            order_id = %order.order_id,
            total_cents = order.total_cents,
            currency = %order.currency,
            delivery_mode = %order.delivery_mode,
            "Sale recorded"
        );
        Ok(())
    }
}
