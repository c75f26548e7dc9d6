use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::entities::{order, order_item};

/// Notification errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Missing recipient for order {0}")]
    MissingRecipient(Uuid),
}

impl From<NotificationError> for crate::errors::ServiceError {
    fn from(err: NotificationError) -> Self {
        crate::errors::ServiceError::ExternalServiceError(err.to_string())
    }
}

/// Receipt sent to the customer once an order is paid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub order_id: Uuid,
    pub recipient: Option<String>,
    pub currency: String,
    pub lines: Vec<ReceiptLine>,
    pub tip_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub name: String,
    pub quantity: i32,
    pub line_total_cents: i64,
}

impl Receipt {
    pub fn from_order(
        order: &order::Model,
        items: &[order_item::Model],
        recipient: Option<String>,
    ) -> Self {
        Self {
            order_id: order.id,
            recipient,
            currency: order.currency.clone(),
            lines: items
                .iter()
                .map(|item| ReceiptLine {
                    name: item.name.clone(),
                    quantity: item.quantity,
                    line_total_cents: item.line_total_cents,
                })
                .collect(),
            tip_cents: order.tip_cents,
            discount_cents: order.discount_cents,
            total_cents: order.total_cents,
        }
    }
}

/// Message for the floor/kitchen staff channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffNotice {
    pub order_id: Uuid,
    pub message: String,
}

/// Outbound customer and staff messaging
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_receipt(&self, receipt: &Receipt) -> Result<(), NotificationError>;
    async fn notify_staff(&self, notice: &StaffNotice) -> Result<(), NotificationError>;
}

/// Writes notifications to the structured log
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_receipt(&self, receipt: &Receipt) -> Result<(), NotificationError> {
        info!(
            order_id = %receipt.order_id,
            recipient = receipt.recipient.as_deref().unwrap_or("guest"),
            total_cents = receipt.total_cents,
            "Receipt sent"
        );
        Ok(())
    }

    async fn notify_staff(&self, notice: &StaffNotice) -> Result<(), NotificationError> {
        info!(order_id = %notice.order_id, message = %notice.message, "Staff notified");
        Ok(())
    }
}

/// Keeps every message in memory; handy for local runs and assertions.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    receipts: Mutex<Vec<Receipt>>,
    notices: Mutex<Vec<StaffNotice>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.receipts
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn notices(&self) -> Vec<StaffNotice> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send_receipt(&self, receipt: &Receipt) -> Result<(), NotificationError> {
        self.receipts
            .lock()
            .map_err(|e| NotificationError::Delivery(e.to_string()))?
            .push(receipt.clone());
        Ok(())
    }

    async fn notify_staff(&self, notice: &StaffNotice) -> Result<(), NotificationError> {
        self.notices
            .lock()
            .map_err(|e| NotificationError::Delivery(e.to_string()))?
            .push(notice.clone());
        Ok(())
    }
}
