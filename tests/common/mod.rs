#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use bistro_api::{
    auth::ROLE_STAFF,
    config::AppConfig,
    db,
    entities::{
        coupon::{self, CouponKind},
        customer, dining_table, loyalty_rank, menu_item,
        order::{self, DeliveryMode, OrderStatus},
    },
    errors::ServiceError,
    message_queue::InMemoryJobQueue,
    notifications::InMemoryNotifier,
    services::payment_provider::{
        CheckoutSession, PaymentProvider, ProviderIntent, SessionRequest, SimulatedProvider,
    },
    AppState,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str =
    "bistro-test-secret-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUV";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Provider that opens sessions without settling them, so payment only
/// happens through webhooks or staff actions.
#[derive(Debug, Default)]
pub struct PendingProvider {
    sessions: AtomicUsize,
}

impl PendingProvider {
    pub fn sessions_opened(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for PendingProvider {
    fn is_simulated(&self) -> bool {
        false
    }

    async fn create_checkout_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{}", n);
        Ok(CheckoutSession {
            url: format!("https://pay.example.test/{}?ref={}", id, request.reference),
            id,
            simulated: false,
        })
    }

    async fn session_is_paid(&self, _session_id: &str) -> Result<bool, ServiceError> {
        Ok(true)
    }

    async fn create_payment_intent(
        &self,
        _amount_cents: i64,
        _currency: &str,
        idempotency_key: &str,
        _order_id: Option<Uuid>,
    ) -> Result<ProviderIntent, ServiceError> {
        Ok(ProviderIntent {
            id: format!("pi_{}", idempotency_key),
            client_secret: None,
        })
    }
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        TEST_JWT_SECRET.to_string(),
        "test".to_string(),
    );
    cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
    cfg.loyalty_tip_threshold_cents = 5_000;
    cfg.loyalty_discount_cents = 500;
    cfg
}

/// Application wired against an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub queue: Arc<InMemoryJobQueue>,
    pub notifier: Arc<InMemoryNotifier>,
}

impl TestApp {
    /// Checkout settles immediately, as with no provider configured.
    pub async fn simulated() -> Self {
        Self::with_provider(test_config(), Arc::new(SimulatedProvider)).await
    }

    /// Checkout leaves orders open until a webhook or staff action pays them.
    pub async fn pending() -> Self {
        Self::with_provider(test_config(), Arc::new(PendingProvider::default())).await
    }

    pub async fn with_provider(cfg: AppConfig, provider: Arc<dyn PaymentProvider>) -> Self {
        Self::with_queue(cfg, provider, Arc::new(InMemoryJobQueue::new())).await
    }

    pub async fn with_queue(
        cfg: AppConfig,
        provider: Arc<dyn PaymentProvider>,
        queue: Arc<InMemoryJobQueue>,
    ) -> Self {
        let pool = db::establish_in_memory()
            .await
            .expect("in-memory database for tests");
        let notifier = Arc::new(InMemoryNotifier::new());
        let state = AppState::new(
            Arc::new(pool),
            cfg,
            provider,
            queue.clone(),
            notifier.clone(),
        );
        Self {
            router: bistro_api::app_router(state.clone()),
            state,
            queue,
            notifier,
        }
    }

    pub fn customer_token(&self, customer_id: Uuid) -> String {
        self.state
            .auth
            .issue_token(&customer_id.to_string(), &[], chrono::Duration::hours(1))
            .expect("customer token")
    }

    pub fn staff_token(&self) -> String {
        self.state
            .auth
            .issue_token("staff-1", &[ROLE_STAFF], chrono::Duration::hours(1))
            .expect("staff token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        self.request_with_headers(method, uri, body, token, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts a raw webhook body with the given `x-signature` header.
    pub async fn post_webhook(&self, body: &[u8], signature: &str) -> axum::response::Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json")
            .header("x-signature", signature)
            .body(Body::from(body.to_vec()))
            .expect("build webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook")
    }

    pub async fn seed_menu_item(&self, name: &str, price_cents: i64, stock: Option<i32>) -> menu_item::Model {
        let now = Utc::now();
        menu_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price_cents: Set(price_cents),
            is_available: Set(true),
            stock_quantity: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed menu item")
    }

    pub async fn seed_unavailable_item(&self, name: &str, price_cents: i64) -> menu_item::Model {
        let now = Utc::now();
        menu_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price_cents: Set(price_cents),
            is_available: Set(false),
            stock_quantity: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed unavailable item")
    }

    pub async fn seed_fixed_coupon(&self, code: &str, value: i64) -> coupon::Model {
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            kind: Set(CouponKind::Fixed),
            value: Set(value),
            is_active: Set(true),
            valid_from: Set(None),
            valid_until: Set(None),
            max_uses: Set(None),
            times_used: Set(0),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon")
    }

    pub async fn seed_rank(&self, name: &str, default_tip_cents: i64) -> loyalty_rank::Model {
        loyalty_rank::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            default_tip_cents: Set(default_tip_cents),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed loyalty rank")
    }

    pub async fn seed_customer(&self, rank_id: Option<Uuid>) -> customer::Model {
        let id = Uuid::new_v4();
        customer::ActiveModel {
            id: Set(id),
            email: Set(format!("guest-{}@example.test", id.simple())),
            name: Set("Test Guest".to_string()),
            loyalty_rank_id: Set(rank_id),
            loyalty_points: Set(0),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed customer")
    }

    pub async fn seed_table(&self, label: &str, capacity: i32) -> dining_table::Model {
        dining_table::ActiveModel {
            id: Set(Uuid::new_v4()),
            label: Set(label.to_string()),
            capacity: Set(capacity),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed table")
    }

    /// A past paid order carrying `tip_cents`, building up tip history.
    pub async fn seed_paid_order_with_tip(&self, customer_id: Uuid, tip_cents: i64) -> order::Model {
        let now = Utc::now();
        order::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(Some(customer_id)),
            currency: Set("usd".to_string()),
            delivery_mode: Set(DeliveryMode::Takeaway),
            subtotal_cents: Set(1_000),
            tax_cents: Set(0),
            tip_cents: Set(tip_cents),
            discount_cents: Set(0),
            total_cents: Set(1_000 + tip_cents),
            status: Set(OrderStatus::Paid),
            coupon_id: Set(None),
            provider_session_id: Set(None),
            provider_intent_id: Set(None),
            metadata: Set(serde_json::json!({})),
            stock_committed: Set(true),
            loyalty_accrued: Set(true),
            hooks_dispatched: Set(true),
            paid_at: Set(Some(now)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed paid order")
    }
}

pub async fn json_body(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body is json")
    };
    (status, value)
}

pub fn cart_line(menu_item_id: Uuid, quantity: i64) -> Value {
    serde_json::json!({ "menu_item_id": menu_item_id, "quantity": quantity })
}
