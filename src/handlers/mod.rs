pub mod checkout;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;
pub mod reservations;
pub mod tables;

use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::debug;

use crate::config::AppConfig;
use crate::events::EventBus;
use crate::message_queue::JobQueue;
use crate::notifications::Notifier;
use crate::services::{
    catalog::{Catalog, DbCatalog},
    checkout::CheckoutService,
    invoicing::InvoiceService,
    loyalty::LoyaltyService,
    orders::OrderService,
    payment_provider::PaymentProvider,
    payments::PaymentService,
    post_payment::HookDispatcher,
    pricing::PricingService,
    reservations::ReservationService,
    webhooks::WebhookService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer used by the HTTP handlers and the background workers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<dyn Catalog>,
    pub pricing: Arc<PricingService>,
    pub loyalty: Arc<LoyaltyService>,
    pub orders: Arc<OrderService>,
    pub invoices: Arc<InvoiceService>,
    pub reservations: Arc<ReservationService>,
    pub dispatcher: Arc<HookDispatcher>,
    pub payments: Arc<PaymentService>,
    pub checkout: Arc<CheckoutService>,
    pub webhooks: Arc<WebhookService>,
}

impl AppServices {
    /// Wires every service over one connection pool, leaves first.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        provider: Arc<dyn PaymentProvider>,
        events: EventBus,
        queue: Arc<dyn JobQueue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let pricing_config = config.pricing();
        let currency = pricing_config.default_currency.clone();

        let catalog: Arc<dyn Catalog> = Arc::new(DbCatalog::new(db.clone()));
        let loyalty = Arc::new(LoyaltyService::new(db.clone()));
        let pricing = Arc::new(PricingService::new(
            db.clone(),
            loyalty.clone(),
            pricing_config.clone(),
        ));
        let orders = Arc::new(OrderService::new(db.clone(), pricing_config.tax_rate));
        let invoices = Arc::new(InvoiceService::new(db.clone()));
        let reservations = Arc::new(ReservationService::new(
            db.clone(),
            provider.clone(),
            events.clone(),
            config.reservation_policy(),
            currency.clone(),
            config.checkout_success_url.clone(),
            config.checkout_cancel_url.clone(),
        ));
        let dispatcher = Arc::new(HookDispatcher::standard(
            db.clone(),
            orders.clone(),
            reservations.clone(),
            events.clone(),
            queue,
            notifier,
        ));
        debug!(hooks = ?dispatcher.hook_names(), "Post-payment hooks registered");
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            provider.clone(),
            invoices.clone(),
            dispatcher.clone(),
            events,
            currency,
        ));
        let checkout = Arc::new(CheckoutService::new(
            catalog.clone(),
            pricing.clone(),
            orders.clone(),
            provider,
            payments.clone(),
            config.checkout_success_url.clone(),
            config.checkout_cancel_url.clone(),
        ));
        let webhooks = Arc::new(WebhookService::new(
            db,
            payments.clone(),
            reservations.clone(),
            config.payment_webhook_secret.clone(),
        ));

        Self {
            catalog,
            pricing,
            loyalty,
            orders,
            invoices,
            reservations,
            dispatcher,
            payments,
            checkout,
            webhooks,
        }
    }
}
