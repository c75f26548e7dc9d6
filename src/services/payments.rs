use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use metrics::counter;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::coupon::{self, Entity as CouponEntity};
use crate::entities::order::{self, Entity as OrderEntity, OrderStatus};
use crate::entities::payment_intent::{self, Entity as PaymentIntentEntity, IntentStatus};
use crate::entities::pending_tip::{self, Entity as PendingTipEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventBus};
use crate::services::invoicing::InvoiceService;
use crate::services::payment_provider::PaymentProvider;
use crate::services::post_payment::{load_paid_order, HookDispatcher};

/// Paid orders whose hooks have not completed after this long are replayed.
pub const HOOK_RECOVERY_GRACE_MINUTES: i64 = 5;

/// Who is asking for the paid transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentSource {
    /// Verified provider webhook
    Webhook { event_id: String },
    /// Staff recorded a cash or card-terminal payment
    Offline { staff_id: String },
    /// No provider configured; checkout settles immediately
    Simulation,
}

impl PaymentSource {
    fn label(&self) -> &'static str {
        match self {
            PaymentSource::Webhook { .. } => "webhook",
            PaymentSource::Offline { .. } => "offline",
            PaymentSource::Simulation => "simulation",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRefs {
    pub session_id: Option<String>,
    pub intent_id: Option<String>,
}

/// Result of an idempotent transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Applied,
    Unchanged,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateIntentRequest {
    pub order_id: Option<Uuid>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
}

/// Payment state machine for orders and provider intents.
///
/// `paid` is only ever written here, and only from `created`.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    provider: Arc<dyn PaymentProvider>,
    invoices: Arc<InvoiceService>,
    dispatcher: Arc<HookDispatcher>,
    events: EventBus,
    default_currency: String,
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        provider: Arc<dyn PaymentProvider>,
        invoices: Arc<InvoiceService>,
        dispatcher: Arc<HookDispatcher>,
        events: EventBus,
        default_currency: String,
    ) -> Self {
        Self {
            db,
            provider,
            invoices,
            dispatcher,
            events,
            default_currency,
        }
    }

    /// Moves a created order to paid. Repeated calls for an already paid
    /// order are no-ops and fire no side effects.
    #[instrument(skip(self, refs), fields(source = source.label()))]
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        source: PaymentSource,
        refs: ProviderRefs,
    ) -> Result<Transition, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        match order.status {
            OrderStatus::Paid => {
                txn.commit().await?;
                debug!(%order_id, "Order already paid");
                return Ok(Transition::Unchanged);
            }
            OrderStatus::Failed | OrderStatus::Cancelled => {
                txn.commit().await?;
                warn!(%order_id, status = %order.status, "Payment reported for closed order; ignored");
                return Ok(Transition::Unchanged);
            }
            OrderStatus::Created => {}
        }

        if let Some(coupon_id) = order.coupon_id {
            let coupon = CouponEntity::find_by_id(coupon_id)
                .lock_exclusive()
                .one(&txn)
                .await?;
            match coupon {
                Some(coupon) if coupon.has_uses_left() => {
                    CouponEntity::update_many()
                        .col_expr(
                            coupon::Column::TimesUsed,
                            Expr::col(coupon::Column::TimesUsed).add(1),
                        )
                        .filter(coupon::Column::Id.eq(coupon_id))
                        .exec(&txn)
                        .await?;
                }
                Some(coupon) => {
                    warn!(%order_id, code = %coupon.code, "Coupon usage cap reached before payment; not counted");
                }
                None => warn!(%order_id, %coupon_id, "Coupon vanished before payment"),
            }
        }

        let now = Utc::now();
        let mut metadata = order.metadata.clone();
        if let (PaymentSource::Offline { staff_id }, Some(map)) = (&source, metadata.as_object_mut()) {
            map.insert(
                "offline_payment".to_string(),
                json!({ "staff_id": staff_id, "recorded_at": now }),
            );
        }

        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Paid);
        active.paid_at = Set(Some(now));
        active.updated_at = Set(now);
        active.metadata = Set(metadata);
        if let Some(session_id) = refs.session_id {
            active.provider_session_id = Set(Some(session_id));
        }
        if let Some(intent_id) = refs.intent_id {
            active.provider_intent_id = Set(Some(intent_id));
        }
        let paid = active.update(&txn).await?;

        txn.commit().await?;
        info!(%order_id, total_cents = paid.total_cents, "Order paid");

        self.events.publish(Event::OrderStatusChanged {
            order_id,
            old_status: OrderStatus::Created.to_string(),
            new_status: OrderStatus::Paid.to_string(),
        });

        self.run_post_payment(&paid).await;
        if let Err(err) = self.claim_hook_dispatch(order_id).await {
            warn!(%order_id, error = %err, "Failed to flag post-payment hooks as dispatched");
        }

        Ok(Transition::Applied)
    }

    /// Best-effort effects of a fresh payment: pending tips, invoice, hooks.
    async fn run_post_payment(&self, paid: &order::Model) {
        let order_id = paid.id;
        if let Some(customer_id) = paid.customer_id {
            if let Err(err) = PendingTipEntity::delete_many()
                .filter(pending_tip::Column::CustomerId.eq(customer_id))
                .exec(&*self.db)
                .await
            {
                warn!(%order_id, error = %err, "Failed to clear pending tips");
            }
        }

        if let Err(err) = self.invoices.generate(paid).await {
            warn!(%order_id, error = %err, "Invoice generation failed");
        }

        match load_paid_order(&self.db, order_id).await {
            Ok(snapshot) => {
                if !self.dispatcher.dispatch(&snapshot).await.all_succeeded() {
                    counter!("bistro_post_payment.partial", 1);
                }
            }
            Err(err) => warn!(%order_id, error = %err, "Could not load paid order for hooks"),
        }
    }

    /// Flips `hooks_dispatched`; false when another caller already did.
    async fn claim_hook_dispatch(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::HooksDispatched, Expr::value(true))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::HooksDispatched.eq(false))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Re-runs post-payment effects for orders paid more than
    /// [`HOOK_RECOVERY_GRACE_MINUTES`] ago whose hooks never completed, e.g.
    /// after a crash between commit and dispatch. Each order is claimed
    /// before it is replayed, so concurrent sweeps do not double up.
    #[instrument(skip(self))]
    pub async fn recover_stalled_dispatches(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let cutoff = now - chrono::Duration::minutes(HOOK_RECOVERY_GRACE_MINUTES);
        let stalled = OrderEntity::find()
            .filter(order::Column::Status.eq(OrderStatus::Paid))
            .filter(order::Column::HooksDispatched.eq(false))
            .filter(order::Column::PaidAt.lt(cutoff))
            .all(&*self.db)
            .await?;

        let mut recovered = 0;
        for paid in stalled {
            if !self.claim_hook_dispatch(paid.id).await? {
                continue;
            }
            warn!(order_id = %paid.id, "Replaying post-payment hooks for stalled order");
            self.run_post_payment(&paid).await;
            recovered += 1;
        }
        if recovered > 0 {
            counter!("bistro_post_payment.recovered", recovered);
        }
        Ok(recovered)
    }

    async fn close_open_order(
        &self,
        order_id: Uuid,
        to: OrderStatus,
    ) -> Result<(OrderStatus, Transition), ServiceError> {
        let txn = self.db.begin().await?;
        let order = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let current = order.status;
        if current != OrderStatus::Created {
            txn.commit().await?;
            return Ok((current, Transition::Unchanged));
        }

        let mut active: order::ActiveModel = order.into();
        active.status = Set(to);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;
        txn.commit().await?;

        self.events.publish(Event::OrderStatusChanged {
            order_id,
            old_status: current.to_string(),
            new_status: to.to_string(),
        });
        Ok((current, Transition::Applied))
    }

    /// `created -> failed`. Late failures for closed orders are ignored.
    #[instrument(skip(self))]
    pub async fn mark_failed(&self, order_id: Uuid, reason: &str) -> Result<Transition, ServiceError> {
        let (previous, transition) = self.close_open_order(order_id, OrderStatus::Failed).await?;
        match transition {
            Transition::Applied => info!(%order_id, reason, "Order payment failed"),
            Transition::Unchanged => debug!(%order_id, status = %previous, "Failure ignored"),
        }
        Ok(transition)
    }

    /// `created -> cancelled`. Cancelling twice is a no-op; a paid or failed
    /// order cannot be cancelled.
    #[instrument(skip(self))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<Transition, ServiceError> {
        let (previous, transition) = self
            .close_open_order(order_id, OrderStatus::Cancelled)
            .await?;
        match (transition, previous) {
            (Transition::Applied, _) => {
                info!(%order_id, "Order cancelled");
                Ok(Transition::Applied)
            }
            (Transition::Unchanged, OrderStatus::Cancelled) => Ok(Transition::Unchanged),
            (Transition::Unchanged, status) => Err(ServiceError::InvalidStatus(format!(
                "Order {} is {} and cannot be cancelled",
                order_id, status
            ))),
        }
    }

    pub async fn get_intent(&self, id: Uuid) -> Result<payment_intent::Model, ServiceError> {
        PaymentIntentEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment intent {} not found", id)))
    }

    async fn find_intent_by_key(
        &self,
        key: &str,
    ) -> Result<Option<payment_intent::Model>, ServiceError> {
        Ok(PaymentIntentEntity::find()
            .filter(payment_intent::Column::IdempotencyKey.eq(key))
            .one(&*self.db)
            .await?)
    }

    pub async fn find_intent_by_provider_id(
        &self,
        provider_intent_id: &str,
    ) -> Result<Option<payment_intent::Model>, ServiceError> {
        Ok(PaymentIntentEntity::find()
            .filter(payment_intent::Column::ProviderIntentId.eq(provider_intent_id))
            .one(&*self.db)
            .await?)
    }

    /// Creates a provider payment intent. A repeated idempotency key returns
    /// the intent created by the first request; the bool reports whether a
    /// new intent was made.
    #[instrument(skip(self, request))]
    pub async fn create_intent(
        &self,
        idempotency_key: Option<String>,
        request: CreateIntentRequest,
    ) -> Result<(payment_intent::Model, bool), ServiceError> {
        let key = idempotency_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(existing) = self.find_intent_by_key(&key).await? {
            debug!(idempotency_key = %key, "Returning existing intent");
            return Ok((existing, false));
        }

        let (amount_cents, currency) = match request.order_id {
            Some(order_id) => {
                let order = OrderEntity::find_by_id(order_id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
                if order.status != OrderStatus::Created {
                    return Err(ServiceError::InvalidStatus(format!(
                        "Order {} is {}",
                        order_id, order.status
                    )));
                }
                (order.total_cents, order.currency)
            }
            None => (
                request.amount_cents.ok_or_else(|| {
                    ServiceError::ValidationError("amount_cents or order_id is required".into())
                })?,
                request
                    .currency
                    .unwrap_or_else(|| self.default_currency.clone())
                    .to_ascii_lowercase(),
            ),
        };
        if amount_cents <= 0 {
            return Err(ServiceError::ValidationError(
                "amount must be positive".to_string(),
            ));
        }

        let remote = self
            .provider
            .create_payment_intent(amount_cents, &currency, &key, request.order_id)
            .await?;

        let now = Utc::now();
        let model = payment_intent::ActiveModel {
            id: Set(Uuid::new_v4()),
            idempotency_key: Set(key.clone()),
            provider_intent_id: Set(remote.id.clone()),
            amount_cents: Set(amount_cents),
            currency: Set(currency),
            status: Set(IntentStatus::RequiresPaymentMethod),
            order_id: Set(request.order_id),
            last_event_id: Set(None),
            attempts: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match model.insert(&*self.db).await {
            Ok(intent) => {
                if let Some(order_id) = request.order_id {
                    OrderEntity::update_many()
                        .col_expr(order::Column::ProviderIntentId, Expr::value(remote.id))
                        .filter(order::Column::Id.eq(order_id))
                        .filter(order::Column::ProviderIntentId.is_null())
                        .exec(&*self.db)
                        .await?;
                }
                info!(intent_id = %intent.id, provider_intent_id = %intent.provider_intent_id, "Payment intent created");
                Ok((intent, true))
            }
            Err(err) if is_unique_violation(&err) => {
                let existing = self.find_intent_by_key(&key).await?.ok_or_else(|| {
                    ServiceError::InternalError(format!("Intent for key {} vanished", key))
                })?;
                Ok((existing, false))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Applies a forward intent status change reported by the provider.
    /// Unknown intents yield `None`.
    #[instrument(skip(self))]
    pub async fn advance_intent(
        &self,
        provider_intent_id: &str,
        next: IntentStatus,
        event_id: Option<&str>,
    ) -> Result<Option<(payment_intent::Model, Transition)>, ServiceError> {
        let txn = self.db.begin().await?;
        let Some(intent) = PaymentIntentEntity::find()
            .filter(payment_intent::Column::ProviderIntentId.eq(provider_intent_id))
            .lock_exclusive()
            .one(&txn)
            .await?
        else {
            txn.commit().await?;
            debug!(provider_intent_id, "No local intent for provider id");
            return Ok(None);
        };

        if !intent.status.can_transition_to(next) {
            txn.commit().await?;
            if intent.status != next {
                warn!(
                    provider_intent_id,
                    current = %intent.status,
                    requested = %next,
                    "Intent transition rejected"
                );
            }
            return Ok(Some((intent, Transition::Unchanged)));
        }

        let mut active: payment_intent::ActiveModel = intent.into();
        active.status = Set(next);
        active.updated_at = Set(Utc::now());
        if let Some(event_id) = event_id {
            active.last_event_id = Set(Some(event_id.to_string()));
        }
        let updated = active.update(&txn).await?;
        txn.commit().await?;
        info!(provider_intent_id, status = %next, "Intent advanced");
        Ok(Some((updated, Transition::Applied)))
    }

    /// Counts a failed attempt on the intent.
    pub async fn record_intent_failure(
        &self,
        provider_intent_id: &str,
        event_id: Option<&str>,
    ) -> Result<(), ServiceError> {
        let mut update = PaymentIntentEntity::update_many()
            .col_expr(
                payment_intent::Column::Attempts,
                Expr::col(payment_intent::Column::Attempts).add(1),
            )
            .col_expr(payment_intent::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(event_id) = event_id {
            update = update.col_expr(payment_intent::Column::LastEventId, Expr::value(event_id));
        }
        update
            .filter(payment_intent::Column::ProviderIntentId.eq(provider_intent_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
