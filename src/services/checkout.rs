use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::DeliveryMode;
use crate::errors::ServiceError;
use crate::services::catalog::{price_cart, Catalog};
use crate::services::orders::{NewOrder, OrderService, OrderSnapshot};
use crate::services::payment_provider::{build_session_request, PaymentProvider};
use crate::services::payments::{PaymentService, PaymentSource, ProviderRefs};
use crate::services::pricing::{normalize_cart, CartLine, PricingService};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub items: Vec<CartLine>,
    /// Explicit tip; omit to use the guest's loyalty-rank default
    pub tip_cents: Option<i64>,
    pub coupon_code: Option<String>,
    pub currency: Option<String>,
    pub delivery_mode: DeliveryMode,
    /// Dining table for dine-in orders
    pub table_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order: OrderSnapshot,
    pub redirect_url: String,
    pub session_id: String,
    pub simulated: bool,
}

fn append_query(url: &str, key: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", url, separator, key, value)
}

/// Cart to priced order to provider session.
#[derive(Clone)]
pub struct CheckoutService {
    catalog: Arc<dyn Catalog>,
    pricing: Arc<PricingService>,
    orders: Arc<OrderService>,
    provider: Arc<dyn PaymentProvider>,
    payments: Arc<PaymentService>,
    success_url: String,
    cancel_url: String,
}

impl CheckoutService {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        pricing: Arc<PricingService>,
        orders: Arc<OrderService>,
        provider: Arc<dyn PaymentProvider>,
        payments: Arc<PaymentService>,
        success_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            catalog,
            pricing,
            orders,
            provider,
            payments,
            success_url,
            cancel_url,
        }
    }

    fn resolve_currency(&self, requested: Option<&str>) -> Result<String, ServiceError> {
        match requested.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) => {
                Ok(code.to_ascii_lowercase())
            }
            Some(code) => Err(ServiceError::ValidationError(format!(
                "Unsupported currency code '{}'",
                code
            ))),
            None => Ok(self.pricing.config().default_currency.clone()),
        }
    }

    /// Prices the cart, stores the order and opens a payment session. In
    /// simulation mode the order is paid before returning.
    #[instrument(skip(self, request), fields(customer_id = ?customer_id))]
    pub async fn checkout(
        &self,
        customer_id: Option<Uuid>,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        if request.tip_cents.is_some_and(|tip| tip < 0) {
            return Err(ServiceError::ValidationError(
                "tip_cents cannot be negative".to_string(),
            ));
        }
        if request.table_id.is_some() && request.delivery_mode != DeliveryMode::DineIn {
            return Err(ServiceError::ValidationError(
                "table_id is only valid for dine-in orders".to_string(),
            ));
        }
        let currency = self.resolve_currency(request.currency.as_deref())?;

        let cart = normalize_cart(&request.items)?;
        let lines = price_cart(self.catalog.as_ref(), &cart).await?;
        let quote = self
            .pricing
            .quote(
                customer_id,
                &lines,
                request.tip_cents,
                request.coupon_code.as_deref(),
            )
            .await?;

        let mut metadata = serde_json::Map::new();
        if let Some(table_id) = request.table_id {
            metadata.insert("table_id".to_string(), table_id.to_string().into());
        }

        let snapshot = self
            .orders
            .persist_order(NewOrder {
                customer_id,
                currency,
                delivery_mode: request.delivery_mode,
                lines,
                tip_cents: quote.tip_cents,
                discount: quote.discount,
                coupon_id: quote.coupon_id,
                metadata: serde_json::Value::Object(metadata),
            })
            .await?;
        let order_id = snapshot.order.id;

        let session_request = build_session_request(
            &snapshot,
            &append_query(&self.success_url, "order_id", &order_id.to_string()),
            &append_query(&self.cancel_url, "order_id", &order_id.to_string()),
        );
        let session = self
            .provider
            .create_checkout_session(&session_request)
            .await
            .map_err(|err| {
                warn!(%order_id, error = %err, "Checkout session failed; order left open");
                err
            })?;

        if self.provider.is_simulated() {
            self.payments
                .mark_paid(
                    order_id,
                    PaymentSource::Simulation,
                    ProviderRefs {
                        session_id: Some(session.id.clone()),
                        intent_id: None,
                    },
                )
                .await?;
        } else {
            self.orders.attach_session(order_id, &session.id).await?;
        }

        let order = self.orders.get_snapshot(order_id).await?;
        info!(
            %order_id,
            total_cents = order.order.total_cents,
            simulated = session.simulated,
            "Checkout complete"
        );
        Ok(CheckoutResponse {
            order,
            redirect_url: session.url,
            session_id: session.id,
            simulated: session.simulated,
        })
    }
}
