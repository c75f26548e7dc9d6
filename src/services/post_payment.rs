//! Post-payment hook dispatcher.
//!
//! Runs the fixed list of side effects for an order that has just moved to
//! `paid`. The payment state machine calls [`HookDispatcher::dispatch`] only
//! for the transition itself, after its transaction commits, so each hook
//! sees a given order at most once per transition. Hooks are still written to
//! be idempotent because queued jobs are delivered at least once.

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::customer::Entity as CustomerEntity;
use crate::entities::order::{self, DeliveryMode};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::events::{Event, EventBus};
use crate::message_queue::{enqueue_job, Job, JobQueue, QueueError};
use crate::notifications::{NotificationError, Notifier, Receipt};
use crate::services::orders::{load_items, OrderService};
use crate::services::reservations::ReservationService;

#[derive(Debug, Error)]
pub enum HookError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
    #[error("notification: {0}")]
    Notification(#[from] NotificationError),
    #[error("hook panicked: {0}")]
    Panicked(String),
}

/// The order as it was committed by the paid transition.
#[derive(Debug, Clone)]
pub struct PaidOrder {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

impl PaidOrder {
    pub fn id(&self) -> Uuid {
        self.order.id
    }
}

#[async_trait]
pub trait PostPaymentHook: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, paid: &PaidOrder) -> Result<(), HookError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub succeeded: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl DispatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Ordered, fault-isolated hook list.
#[derive(Clone, Default)]
pub struct HookDispatcher {
    hooks: Vec<Arc<dyn PostPaymentHook>>,
}

impl HookDispatcher {
    pub fn new(hooks: Vec<Arc<dyn PostPaymentHook>>) -> Self {
        Self { hooks }
    }

    /// Synchronous effects first (stock, broadcast, turnover hold), then one
    /// enqueue per background job with the receipt first.
    pub fn standard(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderService>,
        reservations: Arc<ReservationService>,
        events: EventBus,
        queue: Arc<dyn JobQueue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let mut hooks: Vec<Arc<dyn PostPaymentHook>> = vec![
            Arc::new(StockDecrementHook { orders }),
            Arc::new(BroadcastHook { events }),
            Arc::new(TurnoverHoldHook { reservations }),
        ];
        for job in Job::post_payment_jobs(Uuid::nil()) {
            let fallback = match job {
                Job::SendReceipt { .. } => Some(InlineReceipt {
                    db: db.clone(),
                    notifier: notifier.clone(),
                }),
                _ => None,
            };
            hooks.push(Arc::new(EnqueueJobHook {
                template: job,
                queue: queue.clone(),
                fallback,
            }));
        }
        Self { hooks }
    }

    pub fn hook_names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    /// Runs every hook in order. A failing or panicking hook is logged and
    /// counted; it never stops the rest and never reaches the caller.
    #[instrument(skip(self, paid), fields(order_id = %paid.id()))]
    pub async fn dispatch(&self, paid: &PaidOrder) -> DispatchReport {
        let mut report = DispatchReport::default();
        for hook in &self.hooks {
            let name = hook.name();
            let outcome = AssertUnwindSafe(hook.run(paid))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(HookError::Panicked(panic_message(payload))));
            match outcome {
                Ok(()) => report.succeeded.push(name),
                Err(err) => {
                    error!(order_id = %paid.id(), hook = name, error = %err, "Post-payment hook failed");
                    counter!("bistro.post_payment.hook_failures", 1, "hook" => name);
                    report.failed.push((name, err.to_string()));
                }
            }
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Post-payment hooks dispatched"
        );
        report
    }
}

/// Decrements tracked stock once per order.
pub struct StockDecrementHook {
    orders: Arc<OrderService>,
}

#[async_trait]
impl PostPaymentHook for StockDecrementHook {
    fn name(&self) -> &'static str {
        "stock_decrement"
    }

    async fn run(&self, paid: &PaidOrder) -> Result<(), HookError> {
        self.orders.commit_stock(paid.id()).await?;
        Ok(())
    }
}

/// Pushes the paid order to live dashboards.
pub struct BroadcastHook {
    events: EventBus,
}

#[async_trait]
impl PostPaymentHook for BroadcastHook {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn run(&self, paid: &PaidOrder) -> Result<(), HookError> {
        self.events.publish(Event::OrderPaid {
            order_id: paid.order.id,
            total_cents: paid.order.total_cents,
            currency: paid.order.currency.clone(),
            paid_at: paid.order.paid_at.unwrap_or(paid.order.updated_at),
        });
        Ok(())
    }
}

/// Keeps the table free for a while after a dine-in order is paid.
pub struct TurnoverHoldHook {
    reservations: Arc<ReservationService>,
}

#[async_trait]
impl PostPaymentHook for TurnoverHoldHook {
    fn name(&self) -> &'static str {
        "turnover_hold"
    }

    async fn run(&self, paid: &PaidOrder) -> Result<(), HookError> {
        if paid.order.delivery_mode != DeliveryMode::DineIn {
            return Ok(());
        }
        let Some(table_id) = paid.order.table_id() else {
            return Ok(());
        };
        self.reservations
            .place_turnover_hold(table_id, paid.order.id)
            .await?;
        Ok(())
    }
}

/// Sends the receipt directly when the queue cannot take the job.
#[derive(Clone)]
pub struct InlineReceipt {
    db: Arc<DatabaseConnection>,
    notifier: Arc<dyn Notifier>,
}

impl InlineReceipt {
    async fn send(&self, paid: &PaidOrder) -> Result<(), HookError> {
        let recipient = match paid.order.customer_id {
            Some(id) => CustomerEntity::find_by_id(id)
                .one(&*self.db)
                .await
                .map_err(ServiceError::from)?
                .map(|c| c.email),
            None => None,
        };
        let receipt = Receipt::from_order(&paid.order, &paid.items, recipient);
        self.notifier.send_receipt(&receipt).await?;
        Ok(())
    }
}

/// Enqueues one background job for the order.
pub struct EnqueueJobHook {
    template: Job,
    queue: Arc<dyn JobQueue>,
    fallback: Option<InlineReceipt>,
}

impl EnqueueJobHook {
    fn job_for(&self, order_id: Uuid) -> Job {
        match self.template {
            Job::SendReceipt { .. } => Job::SendReceipt { order_id },
            Job::NotifyStaff { .. } => Job::NotifyStaff { order_id },
            Job::SyncPos { .. } => Job::SyncPos { order_id },
            Job::RecordAnalytics { .. } => Job::RecordAnalytics { order_id },
            Job::AccrueLoyalty { .. } => Job::AccrueLoyalty { order_id },
            Job::SyncInventory { .. } => Job::SyncInventory { order_id },
        }
    }
}

#[async_trait]
impl PostPaymentHook for EnqueueJobHook {
    fn name(&self) -> &'static str {
        self.template.name()
    }

    async fn run(&self, paid: &PaidOrder) -> Result<(), HookError> {
        let job = self.job_for(paid.id());
        match enqueue_job(self.queue.as_ref(), job).await {
            Ok(()) => Ok(()),
            Err(err) => match &self.fallback {
                Some(fallback) => {
                    warn!(order_id = %paid.id(), job = job.name(), error = %err, "Queue unavailable; running inline");
                    fallback.send(paid).await
                }
                None => Err(err.into()),
            },
        }
    }
}

/// Loads the paid order snapshot handed to hooks.
pub async fn load_paid_order(
    db: &DatabaseConnection,
    order_id: Uuid,
) -> Result<PaidOrder, ServiceError> {
    let order = order::Entity::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
    let items = load_items(db, order_id).await?;
    Ok(PaidOrder { order, items })
}
