/*!
 * # Job Queue
 *
 * Fire-and-forget queue for post-payment work that can tolerate latency
 * (emails, staff notifications, POS sync, analytics, loyalty accrual).
 * Delivery is at-least-once, so every job handler must be idempotent.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AppConfig;

/// Job queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Queue is unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::ConnectionError(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::SerializationError(err.to_string())
    }
}

impl From<QueueError> for crate::errors::ServiceError {
    fn from(err: QueueError) -> Self {
        crate::errors::ServiceError::QueueError(err.to_string())
    }
}

/// Work scheduled after an order is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    SendReceipt { order_id: Uuid },
    NotifyStaff { order_id: Uuid },
    SyncPos { order_id: Uuid },
    RecordAnalytics { order_id: Uuid },
    AccrueLoyalty { order_id: Uuid },
    SyncInventory { order_id: Uuid },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::SendReceipt { .. } => "send_receipt",
            Job::NotifyStaff { .. } => "notify_staff",
            Job::SyncPos { .. } => "sync_pos",
            Job::RecordAnalytics { .. } => "record_analytics",
            Job::AccrueLoyalty { .. } => "accrue_loyalty",
            Job::SyncInventory { .. } => "sync_inventory",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match *self {
            Job::SendReceipt { order_id }
            | Job::NotifyStaff { order_id }
            | Job::SyncPos { order_id }
            | Job::RecordAnalytics { order_id }
            | Job::AccrueLoyalty { order_id }
            | Job::SyncInventory { order_id } => order_id,
        }
    }

    /// Every job fanned out for a freshly paid order, receipt first.
    pub fn post_payment_jobs(order_id: Uuid) -> [Job; 6] {
        [
            Job::SendReceipt { order_id },
            Job::NotifyStaff { order_id },
            Job::SyncPos { order_id },
            Job::RecordAnalytics { order_id },
            Job::AccrueLoyalty { order_id },
            Job::SyncInventory { order_id },
        ]
    }
}

/// Envelope stored on the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub job: Job,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl JobEnvelope {
    pub fn new(job: Job) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
            enqueued_at: chrono::Utc::now(),
            attempts: 0,
            max_attempts: 3,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), QueueError>;
    async fn dequeue(&self) -> Result<Option<JobEnvelope>, QueueError>;
    async fn len(&self) -> Result<usize, QueueError>;
}

/// Convenience wrapper for the common single-job case.
pub async fn enqueue_job(queue: &dyn JobQueue, job: Job) -> Result<(), QueueError> {
    debug!(job = job.name(), order_id = %job.order_id(), "Enqueueing job");
    queue.enqueue(JobEnvelope::new(job)).await
}

/// In-memory job queue implementation
#[derive(Debug)]
pub struct InMemoryJobQueue {
    jobs: Mutex<VecDeque<JobEnvelope>>,
    max_size: usize,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::with_max_size(10_000)
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            max_size,
        }
    }

    /// Snapshot of queued jobs, oldest first.
    pub async fn snapshot(&self) -> Vec<Job> {
        self.jobs.lock().await.iter().map(|env| env.job).collect()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.len() >= self.max_size {
            return Err(QueueError::QueueFull);
        }
        jobs.push_back(envelope);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<JobEnvelope>, QueueError> {
        Ok(self.jobs.lock().await.pop_front())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.jobs.lock().await.len())
    }
}

/// Redis list-backed job queue (`LPUSH` / `RPOP`)
#[derive(Clone)]
pub struct RedisJobQueue {
    connection: redis::aio::ConnectionManager,
    key: String,
}

impl RedisJobQueue {
    pub async fn connect(redis_url: &str, namespace: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let connection = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            key: format!("{}:queue", namespace),
        })
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.key)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<JobEnvelope>, QueueError> {
        let mut conn = self.connection.clone();
        let payload: Option<String> = redis::cmd("RPOP")
            .arg(&self.key)
            .query_async(&mut conn)
            .await?;
        payload
            .map(|raw| serde_json::from_str(&raw).map_err(QueueError::from))
            .transpose()
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection.clone();
        let len: usize = redis::cmd("LLEN")
            .arg(&self.key)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}

/// Builds the queue selected by `job_queue_backend`.
pub async fn create_job_queue(config: &AppConfig) -> Result<Arc<dyn JobQueue>, QueueError> {
    match config.job_queue_backend.to_ascii_lowercase().as_str() {
        "redis" => {
            info!(namespace = %config.job_queue_namespace, "Using Redis job queue");
            let queue = RedisJobQueue::connect(&config.redis_url, &config.job_queue_namespace).await?;
            Ok(Arc::new(queue))
        }
        _ => {
            info!("Using in-memory job queue");
            Ok(Arc::new(InMemoryJobQueue::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_queue_is_fifo() {
        let queue = InMemoryJobQueue::new();
        let order_id = Uuid::new_v4();

        enqueue_job(&queue, Job::SendReceipt { order_id }).await.unwrap();
        enqueue_job(&queue, Job::SyncPos { order_id }).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.job, Job::SendReceipt { order_id });
        let second = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(second.job, Job::SyncPos { order_id });
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_memory_queue_rejects_when_full() {
        let queue = InMemoryJobQueue::with_max_size(1);
        let order_id = Uuid::new_v4();

        enqueue_job(&queue, Job::NotifyStaff { order_id }).await.unwrap();
        let err = enqueue_job(&queue, Job::NotifyStaff { order_id })
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::QueueFull));
    }

    #[test]
    fn job_serializes_with_kind_tag() {
        let order_id = Uuid::nil();
        let value = serde_json::to_value(Job::AccrueLoyalty { order_id }).unwrap();
        assert_eq!(value["kind"], "accrue_loyalty");
        assert_eq!(value["order_id"], order_id.to_string());
    }

    #[test]
    fn post_payment_jobs_start_with_receipt() {
        let jobs = Job::post_payment_jobs(Uuid::nil());
        assert_eq!(jobs[0].name(), "send_receipt");
        assert_eq!(jobs.len(), 6);
    }
}
