use chrono::Utc;
use sea_orm::{sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::invoice::{self, Entity as InvoiceEntity};
use crate::entities::order;
use crate::errors::ServiceError;

/// Issues one invoice per paid order.
#[derive(Clone)]
pub struct InvoiceService {
    db: Arc<DatabaseConnection>,
}

pub fn invoice_number(order: &order::Model) -> String {
    let date = order.paid_at.unwrap_or(order.created_at).format("%Y%m%d");
    let short = order.id.simple().to_string()[..8].to_uppercase();
    format!("INV-{}-{}", date, short)
}

impl InvoiceService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Returns the order's invoice, creating it on first call.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn generate(&self, order: &order::Model) -> Result<invoice::Model, ServiceError> {
        if !order.is_paid() {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is {}; only paid orders are invoiced",
                order.id, order.status
            )));
        }

        let model = invoice::ActiveModel {
            id: sea_orm::Set(Uuid::new_v4()),
            order_id: sea_orm::Set(order.id),
            number: sea_orm::Set(invoice_number(order)),
            total_cents: sea_orm::Set(order.total_cents),
            currency: sea_orm::Set(order.currency.clone()),
            issued_at: sea_orm::Set(Utc::now()),
        };

        let inserted = InvoiceEntity::insert(model)
            .on_conflict(
                OnConflict::column(invoice::Column::OrderId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        let invoice = self
            .find_for_order(order.id)
            .await?
            .ok_or_else(|| ServiceError::InternalError(format!("Invoice for {} missing", order.id)))?;

        if inserted > 0 {
            info!(number = %invoice.number, "Invoice issued");
        }
        Ok(invoice)
    }

    pub async fn find_for_order(&self, order_id: Uuid) -> Result<Option<invoice::Model>, ServiceError> {
        Ok(InvoiceEntity::find()
            .filter(invoice::Column::OrderId.eq(order_id))
            .one(&*self.db)
            .await?)
    }
}
