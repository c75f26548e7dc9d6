/*!
 * # Checkout Session Adapter
 *
 * Talks to the hosted payment provider. Items are always sent at full
 * price, a positive tip or tax becomes its own line and any discount is
 * expressed as a one-off provider coupon, never as a negative line.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::services::orders::OrderSnapshot;

pub const METADATA_KIND: &str = "kind";
pub const METADATA_ORDER_ID: &str = "order_id";
pub const METADATA_RESERVATION_ID: &str = "reservation_id";
pub const KIND_ORDER: &str = "order";
pub const KIND_RESERVATION_DEPOSIT: &str = "reservation_deposit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLine {
    pub name: String,
    pub unit_amount_cents: i64,
    pub quantity: i64,
}

/// Provider-agnostic checkout session request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Our id for the thing being paid for; echoed back by the provider
    pub reference: String,
    pub currency: String,
    pub lines: Vec<SessionLine>,
    pub discount_cents: i64,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: Vec<(String, String)>,
}

impl SessionRequest {
    pub fn gross_cents(&self) -> i64 {
        self.lines
            .iter()
            .map(|l| l.unit_amount_cents * l.quantity)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProviderIntent {
    pub id: String,
    pub client_secret: Option<String>,
}

/// Builds the session request for an order snapshot.
pub fn build_session_request(
    snapshot: &OrderSnapshot,
    success_url: &str,
    cancel_url: &str,
) -> SessionRequest {
    let order = &snapshot.order;
    let mut lines: Vec<SessionLine> = snapshot
        .items
        .iter()
        .map(|item| SessionLine {
            name: item.name.clone(),
            unit_amount_cents: item.unit_amount_cents,
            quantity: i64::from(item.quantity),
        })
        .collect();
    if order.tax_cents > 0 {
        lines.push(SessionLine {
            name: "Tax".to_string(),
            unit_amount_cents: order.tax_cents,
            quantity: 1,
        });
    }
    if order.tip_cents > 0 {
        lines.push(SessionLine {
            name: "Tip".to_string(),
            unit_amount_cents: order.tip_cents,
            quantity: 1,
        });
    }

    SessionRequest {
        reference: order.id.to_string(),
        currency: order.currency.clone(),
        lines,
        discount_cents: order.discount_cents.max(0),
        success_url: success_url.to_string(),
        cancel_url: cancel_url.to_string(),
        metadata: vec![
            (METADATA_KIND.to_string(), KIND_ORDER.to_string()),
            (METADATA_ORDER_ID.to_string(), order.id.to_string()),
        ],
    }
}

/// Session request for a reservation deposit.
pub fn build_deposit_session_request(
    reservation_id: Uuid,
    deposit_cents: i64,
    currency: &str,
    success_url: &str,
    cancel_url: &str,
) -> SessionRequest {
    SessionRequest {
        reference: reservation_id.to_string(),
        currency: currency.to_string(),
        lines: vec![SessionLine {
            name: "Reservation deposit".to_string(),
            unit_amount_cents: deposit_cents,
            quantity: 1,
        }],
        discount_cents: 0,
        success_url: success_url.to_string(),
        cancel_url: cancel_url.to_string(),
        metadata: vec![
            (METADATA_KIND.to_string(), KIND_RESERVATION_DEPOSIT.to_string()),
            (METADATA_RESERVATION_ID.to_string(), reservation_id.to_string()),
        ],
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// True when no real provider is configured.
    fn is_simulated(&self) -> bool;

    async fn create_checkout_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CheckoutSession, ServiceError>;

    /// Whether the provider reports the session as paid.
    async fn session_is_paid(&self, session_id: &str) -> Result<bool, ServiceError>;

    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        idempotency_key: &str,
        order_id: Option<Uuid>,
    ) -> Result<ProviderIntent, ServiceError>;
}

fn map_transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout(format!("Payment provider timed out: {}", err))
    } else {
        ServiceError::ExternalServiceError(format!("Payment provider unreachable: {}", err))
    }
}

/// Stripe over its form-encoded REST API.
#[derive(Clone)]
pub struct StripeProvider {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeProvider {
    pub fn new(secret_key: &str, base_url: &str, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            secret_key: secret_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_form(
        &self,
        path: &str,
        params: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<serde_json::Value, ServiceError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(params);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let response = request.send().await.map_err(map_transport_error)?;
        Self::read_json(path, response).await
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, ServiceError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::read_json(path, response).await
    }

    async fn read_json(
        path: &str,
        response: reqwest::Response,
    ) -> Result<serde_json::Value, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(path, %status, "Payment provider rejected request");
            return Err(ServiceError::ExternalServiceError(format!(
                "Payment provider returned {}: {}",
                status, body
            )));
        }
        response.json().await.map_err(map_transport_error)
    }

    async fn create_coupon(&self, amount_cents: i64, currency: &str) -> Result<String, ServiceError> {
        let params = vec![
            ("amount_off".to_string(), amount_cents.to_string()),
            ("currency".to_string(), currency.to_string()),
            ("duration".to_string(), "once".to_string()),
            ("max_redemptions".to_string(), "1".to_string()),
        ];
        let body = self.post_form("/v1/coupons", &params, None).await?;
        body["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| ServiceError::ExternalServiceError("coupon response missing id".into()))
    }
}

/// Form parameters for `/v1/checkout/sessions`.
pub fn session_form(request: &SessionRequest, coupon_id: Option<&str>) -> Vec<(String, String)> {
    let mut params = vec![
        ("mode".to_string(), "payment".to_string()),
        ("client_reference_id".to_string(), request.reference.clone()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
    ];
    for (i, line) in request.lines.iter().enumerate() {
        let prefix = format!("line_items[{}]", i);
        params.push((format!("{}[quantity]", prefix), line.quantity.to_string()));
        params.push((
            format!("{}[price_data][currency]", prefix),
            request.currency.clone(),
        ));
        params.push((
            format!("{}[price_data][unit_amount]", prefix),
            line.unit_amount_cents.to_string(),
        ));
        params.push((
            format!("{}[price_data][product_data][name]", prefix),
            line.name.clone(),
        ));
    }
    for (key, value) in &request.metadata {
        params.push((format!("metadata[{}]", key), value.clone()));
        params.push((format!("payment_intent_data[metadata][{}]", key), value.clone()));
    }
    if let Some(coupon) = coupon_id {
        params.push(("discounts[0][coupon]".to_string(), coupon.to_string()));
    }
    params
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn is_simulated(&self) -> bool {
        false
    }

    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn create_checkout_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let coupon_id = if request.discount_cents > 0 {
            Some(
                self.create_coupon(request.discount_cents, &request.currency)
                    .await?,
            )
        } else {
            None
        };

        let params = session_form(request, coupon_id.as_deref());
        let body = self
            .post_form("/v1/checkout/sessions", &params, Some(&request.reference))
            .await?;

        let id = body["id"].as_str().ok_or_else(|| {
            ServiceError::ExternalServiceError("session response missing id".to_string())
        })?;
        let url = body["url"].as_str().unwrap_or_default();
        info!(session_id = id, "Checkout session created");
        Ok(CheckoutSession {
            id: id.to_string(),
            url: url.to_string(),
            simulated: false,
        })
    }

    #[instrument(skip(self))]
    async fn session_is_paid(&self, session_id: &str) -> Result<bool, ServiceError> {
        let body = self
            .get_json(&format!("/v1/checkout/sessions/{}", session_id))
            .await?;
        Ok(body["payment_status"].as_str() == Some("paid"))
    }

    #[instrument(skip(self))]
    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        idempotency_key: &str,
        order_id: Option<Uuid>,
    ) -> Result<ProviderIntent, ServiceError> {
        let mut params = vec![
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), currency.to_string()),
        ];
        if let Some(order_id) = order_id {
            params.push((
                format!("metadata[{}]", METADATA_ORDER_ID),
                order_id.to_string(),
            ));
        }
        let body = self
            .post_form("/v1/payment_intents", &params, Some(idempotency_key))
            .await?;
        let id = body["id"].as_str().ok_or_else(|| {
            ServiceError::ExternalServiceError("intent response missing id".to_string())
        })?;
        Ok(ProviderIntent {
            id: id.to_string(),
            client_secret: body["client_secret"].as_str().map(String::from),
        })
    }
}

/// Stand-in used when no provider credentials are configured.
#[derive(Debug, Clone, Default)]
pub struct SimulatedProvider;

pub const SIMULATED_SESSION_PREFIX: &str = "sim_cs_";

#[async_trait]
impl PaymentProvider for SimulatedProvider {
    fn is_simulated(&self) -> bool {
        true
    }

    async fn create_checkout_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let id = format!("{}{}", SIMULATED_SESSION_PREFIX, Uuid::new_v4().simple());
        let separator = if request.success_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{}session_id={}", request.success_url, separator, id);
        debug!(session_id = %id, reference = %request.reference, "Simulated checkout session");
        Ok(CheckoutSession {
            id,
            url,
            simulated: true,
        })
    }

    async fn session_is_paid(&self, session_id: &str) -> Result<bool, ServiceError> {
        Ok(session_id.starts_with(SIMULATED_SESSION_PREFIX))
    }

    async fn create_payment_intent(
        &self,
        _amount_cents: i64,
        _currency: &str,
        _idempotency_key: &str,
        _order_id: Option<Uuid>,
    ) -> Result<ProviderIntent, ServiceError> {
        let id = format!("sim_pi_{}", Uuid::new_v4().simple());
        Ok(ProviderIntent {
            client_secret: Some(format!("{}_secret", id)),
            id,
        })
    }
}

/// Real provider when a secret key is configured, simulation otherwise.
pub fn create_payment_provider(
    config: &AppConfig,
) -> Result<std::sync::Arc<dyn PaymentProvider>, ServiceError> {
    match config.payment_provider_secret_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => {
            info!(base_url = %config.payment_provider_base_url, "Using Stripe payment provider");
            Ok(std::sync::Arc::new(StripeProvider::new(
                key,
                &config.payment_provider_base_url,
                config.payment_provider_timeout(),
            )?))
        }
        _ => {
            warn!("No payment provider key configured; running in simulation mode");
            Ok(std::sync::Arc::new(SimulatedProvider))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::entities::order::{self, DeliveryMode, OrderStatus};
    use crate::entities::order_item;

    fn snapshot(tip: i64, tax: i64, discount: i64) -> OrderSnapshot {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let items = vec![order_item::Model {
            id: Uuid::new_v4(),
            order_id: id,
            menu_item_id: Uuid::new_v4(),
            name: "Risotto".into(),
            unit_amount_cents: 1_000,
            quantity: 2,
            line_total_cents: 2_000,
            created_at: now,
        }];
        OrderSnapshot {
            order: order::Model {
                id,
                customer_id: None,
                currency: "usd".into(),
                delivery_mode: DeliveryMode::Takeaway,
                subtotal_cents: 2_000,
                tax_cents: tax,
                tip_cents: tip,
                discount_cents: discount,
                total_cents: (2_000 + tax + tip - discount).max(0),
                status: OrderStatus::Created,
                coupon_id: None,
                provider_session_id: None,
                provider_intent_id: None,
                metadata: json!({}),
                stock_committed: false,
                loyalty_accrued: false,
                hooks_dispatched: false,
                paid_at: None,
                created_at: now,
                updated_at: now,
            },
            items,
            extras: vec![],
        }
    }

    #[test]
    fn items_stay_at_full_price_and_discount_is_never_a_line() {
        let req = build_session_request(&snapshot(300, 0, 500), "https://ok", "https://no");
        assert_eq!(req.lines.len(), 2);
        assert_eq!(req.lines[0].unit_amount_cents, 1_000);
        assert_eq!(req.lines[1].name, "Tip");
        assert!(req.lines.iter().all(|l| l.unit_amount_cents > 0));
        assert_eq!(req.discount_cents, 500);
        assert_eq!(req.gross_cents() - req.discount_cents, 1_800);
    }

    #[test]
    fn zero_tip_adds_no_line() {
        let req = build_session_request(&snapshot(0, 0, 0), "https://ok", "https://no");
        assert_eq!(req.lines.len(), 1);
    }

    #[test]
    fn form_carries_coupon_and_metadata() {
        let req = build_session_request(&snapshot(0, 160, 200), "https://ok", "https://no");
        let form = session_form(&req, Some("co_123"));
        assert!(form.contains(&("discounts[0][coupon]".to_string(), "co_123".to_string())));
        assert!(form.contains(&("metadata[kind]".to_string(), "order".to_string())));
        assert!(form
            .iter()
            .any(|(k, v)| k == "line_items[1][price_data][product_data][name]" && v == "Tax"));
    }

    #[tokio::test]
    async fn simulated_session_redirects_to_success_url() {
        let provider = SimulatedProvider;
        let req = build_session_request(&snapshot(0, 0, 0), "https://ok/done?x=1", "https://no");
        let session = provider.create_checkout_session(&req).await.unwrap();
        assert!(session.simulated);
        assert!(session.url.starts_with("https://ok/done?x=1&session_id=sim_cs_"));
        assert!(provider.session_is_paid(&session.id).await.unwrap());
        assert!(!provider.session_is_paid("cs_live_1").await.unwrap());
    }

    #[tokio::test]
    async fn stripe_creates_coupon_before_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/coupons"))
            .and(body_string_contains("amount_off=500"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "co_9"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(body_string_contains("co_9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_test_1",
                "url": "https://checkout.example/cs_test_1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = StripeProvider::new("sk_test", &server.uri(), Duration::from_secs(5)).unwrap();
        let req = build_session_request(&snapshot(300, 0, 500), "https://ok", "https://no");
        let session = provider.create_checkout_session(&req).await.unwrap();
        assert_eq!(session.id, "cs_test_1");
        assert!(!session.simulated);
    }

    #[tokio::test]
    async fn stripe_error_status_is_an_external_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let provider = StripeProvider::new("sk_test", &server.uri(), Duration::from_secs(5)).unwrap();
        let req = build_session_request(&snapshot(0, 0, 0), "https://ok", "https://no");
        let err = provider.create_checkout_session(&req).await.unwrap_err();
        assert_matches!(err, ServiceError::ExternalServiceError(_));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "cs_slow"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let provider =
            StripeProvider::new("sk_test", &server.uri(), Duration::from_millis(50)).unwrap();
        let req = build_session_request(&snapshot(0, 0, 0), "https://ok", "https://no");
        let err = provider.create_checkout_session(&req).await.unwrap_err();
        assert_matches!(err, ServiceError::Timeout(_));
    }

    #[tokio::test]
    async fn payment_intent_sends_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header("Idempotency-Key", "key-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pi_1",
                "client_secret": "pi_1_secret"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = StripeProvider::new("sk_test", &server.uri(), Duration::from_secs(5)).unwrap();
        let intent = provider
            .create_payment_intent(1_000, "usd", "key-1", None)
            .await
            .unwrap();
        assert_eq!(intent.id, "pi_1");
        assert_eq!(intent.client_secret.as_deref(), Some("pi_1_secret"));
    }
}
