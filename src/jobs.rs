//! Background workers: the job consumer draining [`JobQueue`] and the
//! periodic sweep (reservations, stalled post-payment hooks).

use metrics::counter;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::entities::customer::Entity as CustomerEntity;
use crate::errors::ServiceError;
use crate::integrations::{OrderSync, SyncGateway};
use crate::message_queue::{Job, JobEnvelope, JobQueue};
use crate::notifications::{Notifier, Receipt, StaffNotice};
use crate::services::loyalty::LoyaltyService;
use crate::services::payments::PaymentService;
use crate::services::post_payment::{load_paid_order, PaidOrder};
use crate::services::reservations::ReservationService;

fn staff_message(paid: &PaidOrder) -> String {
    let order = &paid.order;
    let mut message = format!(
        "Order {} paid: {} {} ({}, {} item(s))",
        order.id,
        order.total_cents,
        order.currency.to_ascii_uppercase(),
        order.delivery_mode,
        paid.items.iter().map(|i| i.quantity).sum::<i32>(),
    );
    if let Some(table_id) = order.table_id() {
        message.push_str(&format!(", table {}", table_id));
    }
    message
}

/// Outcome of a single poll of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Idle,
    Completed,
    Retried,
    Dropped,
}

#[derive(Clone)]
pub struct JobWorker {
    db: Arc<DatabaseConnection>,
    queue: Arc<dyn JobQueue>,
    notifier: Arc<dyn Notifier>,
    sync: Arc<dyn SyncGateway>,
    loyalty: Arc<LoyaltyService>,
    idle_delay: Duration,
}

impl JobWorker {
    pub fn new(
        db: Arc<DatabaseConnection>,
        queue: Arc<dyn JobQueue>,
        notifier: Arc<dyn Notifier>,
        sync: Arc<dyn SyncGateway>,
        loyalty: Arc<LoyaltyService>,
    ) -> Self {
        Self {
            db,
            queue,
            notifier,
            sync,
            loyalty,
            idle_delay: Duration::from_millis(500),
        }
    }

    /// Executes one job. Every branch is safe to repeat.
    #[instrument(skip(self), fields(job = job.name(), order_id = %job.order_id()))]
    pub async fn execute(&self, job: Job) -> Result<(), ServiceError> {
        match job {
            Job::SendReceipt { order_id } => {
                let paid = load_paid_order(&self.db, order_id).await?;
                let recipient = match paid.order.customer_id {
                    Some(customer_id) => CustomerEntity::find_by_id(customer_id)
                        .one(&*self.db)
                        .await?
                        .map(|c| c.email),
                    None => None,
                };
                let receipt = Receipt::from_order(&paid.order, &paid.items, recipient);
                self.notifier.send_receipt(&receipt).await?;
            }
            Job::NotifyStaff { order_id } => {
                let paid = load_paid_order(&self.db, order_id).await?;
                let notice = StaffNotice {
                    order_id,
                    message: staff_message(&paid),
                };
                self.notifier.notify_staff(&notice).await?;
            }
            Job::SyncPos { order_id } => {
                let paid = load_paid_order(&self.db, order_id).await?;
                self.sync
                    .push_pos_order(&OrderSync::from_order(&paid.order, &paid.items))
                    .await?;
            }
            Job::RecordAnalytics { order_id } => {
                let paid = load_paid_order(&self.db, order_id).await?;
                self.sync
                    .record_sale(&OrderSync::from_order(&paid.order, &paid.items))
                    .await?;
            }
            Job::AccrueLoyalty { order_id } => {
                let credited = self.loyalty.accrue_points(order_id).await?;
                debug!(%order_id, credited, "Loyalty accrual processed");
            }
            Job::SyncInventory { order_id } => {
                let paid = load_paid_order(&self.db, order_id).await?;
                self.sync
                    .push_inventory(&OrderSync::from_order(&paid.order, &paid.items))
                    .await?;
            }
        }
        Ok(())
    }

    /// Takes one job off the queue and runs it, re-enqueueing on failure
    /// until the envelope runs out of attempts.
    pub async fn poll_once(&self) -> Result<Poll, ServiceError> {
        let Some(mut envelope) = self.queue.dequeue().await? else {
            return Ok(Poll::Idle);
        };
        let job = envelope.job;

        match self.execute(job).await {
            Ok(()) => {
                counter!("bistro.jobs.completed", 1, "job" => job.name());
                Ok(Poll::Completed)
            }
            Err(err) => {
                envelope.attempts += 1;
                if envelope.can_retry() {
                    warn!(
                        job = job.name(),
                        order_id = %job.order_id(),
                        attempts = envelope.attempts,
                        error = %err,
                        "Job failed; retrying"
                    );
                    counter!("bistro.jobs.retried", 1, "job" => job.name());
                    self.requeue(envelope).await?;
                    Ok(Poll::Retried)
                } else {
                    error!(
                        job = job.name(),
                        order_id = %job.order_id(),
                        attempts = envelope.attempts,
                        error = %err,
                        "Job failed permanently"
                    );
                    counter!("bistro.jobs.dropped", 1, "job" => job.name());
                    Ok(Poll::Dropped)
                }
            }
        }
    }

    async fn requeue(&self, envelope: JobEnvelope) -> Result<(), ServiceError> {
        self.queue.enqueue(envelope).await.map_err(ServiceError::from)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        info!("Job worker started");
        tokio::spawn(async move {
            loop {
                match self.poll_once().await {
                    Ok(Poll::Idle) => sleep(self.idle_delay).await,
                    Ok(_) => {}
                    Err(e) => {
                        error!("job worker error: {}", e);
                        sleep(self.idle_delay).await;
                    }
                }
            }
        })
    }
}

/// Every `period`: replay of post-payment hooks that never completed, then
/// the no-show and hold-expiry sweep.
pub fn spawn_sweeper(
    reservations: Arc<ReservationService>,
    payments: Arc<PaymentService>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            if let Err(e) = payments.recover_stalled_dispatches(now).await {
                error!("post-payment recovery error: {}", e);
            }
            match reservations.sweep(now).await {
                Ok(report) if report.no_shows > 0 || report.holds_released > 0 => {
                    info!(
                        no_shows = report.no_shows,
                        holds_released = report.holds_released,
                        "Reservation sweep finished"
                    );
                }
                Ok(_) => debug!("Reservation sweep found nothing to do"),
                Err(e) => error!("reservation sweep error: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::MockSyncGateway;
    use crate::message_queue::{enqueue_job, InMemoryJobQueue};
    use crate::notifications::InMemoryNotifier;
    use uuid::Uuid;

    async fn worker_with(
        sync: MockSyncGateway,
    ) -> (JobWorker, Arc<InMemoryJobQueue>) {
        let db = Arc::new(crate::db::establish_in_memory().await.unwrap());
        let queue = Arc::new(InMemoryJobQueue::new());
        let worker = JobWorker::new(
            db.clone(),
            queue.clone(),
            Arc::new(InMemoryNotifier::new()),
            Arc::new(sync),
            Arc::new(LoyaltyService::new(db)),
        );
        (worker, queue)
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let (worker, _queue) = worker_with(MockSyncGateway::new()).await;
        assert_eq!(worker.poll_once().await.unwrap(), Poll::Idle);
    }

    #[tokio::test]
    async fn failing_job_is_retried_then_dropped() {
        let (worker, queue) = worker_with(MockSyncGateway::new()).await;
        // Unknown order: every attempt fails with NotFound.
        enqueue_job(queue.as_ref(), Job::SyncPos { order_id: Uuid::new_v4() })
            .await
            .unwrap();

        assert_eq!(worker.poll_once().await.unwrap(), Poll::Retried);
        assert_eq!(worker.poll_once().await.unwrap(), Poll::Retried);
        assert_eq!(worker.poll_once().await.unwrap(), Poll::Dropped);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn loyalty_job_for_unknown_order_fails() {
        let (worker, _queue) = worker_with(MockSyncGateway::new()).await;
        let result = worker
            .execute(Job::AccrueLoyalty { order_id: Uuid::new_v4() })
            .await;
        assert!(result.is_err());
    }
}
