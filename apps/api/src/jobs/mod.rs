// Deferred dispatch of the resume pipeline.
// The webhook enqueues a job; a worker task consumes it and re-reads the
// conversation before acting, so the payload snapshot is informational only.

pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::conversation::{ChatMessage, Conversation};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Job payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeJob {
    pub conversation_id: String,
    /// Token of the resume claim taken when the job was enqueued.
    pub claim: Uuid,
    pub phone_number: String,
    /// History at enqueue time. Never used for mutation decisions.
    pub messages: Vec<ChatMessage>,
    pub enqueued_at: DateTime<Utc>,
}

impl ResumeJob {
    pub fn for_conversation(conversation: &Conversation, claim: Uuid) -> Self {
        Self {
            conversation_id: conversation.conversation_id.clone(),
            claim,
            phone_number: conversation.phone_number.to_string(),
            messages: conversation.messages.clone(),
            enqueued_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &ResumeJob) -> Result<(), QueueError>;

    /// Waits up to `timeout` for the next job.
    async fn consume(&self, timeout: Duration) -> Result<Option<ResumeJob>, QueueError>;
}

/// FIFO queue on a Redis list: producers `RPUSH`, the worker `BLPOP`s.
///
/// BLPOP parks the connection it runs on, so the consumer keeps its own
/// connection apart from the shared producer one. It is opened in `connect`
/// and only reopened after a Redis error.
#[derive(Clone)]
pub struct RedisJobQueue {
    client: redis::Client,
    producer: redis::aio::MultiplexedConnection,
    consumer: Arc<Mutex<Option<redis::aio::MultiplexedConnection>>>,
    key: String,
}

impl RedisJobQueue {
    pub async fn connect(redis_url: &str, key: String) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let producer = client.get_multiplexed_async_connection().await?;
        let consumer = client.get_multiplexed_async_connection().await?;
        info!("Redis job queue ready on list '{key}'");
        Ok(Self {
            client,
            producer,
            consumer: Arc::new(Mutex::new(Some(consumer))),
            key,
        })
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &ResumeJob) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.producer.clone();
        let depth: i64 = conn.rpush(&self.key, payload).await?;
        debug!(
            "Enqueued resume job for {} (queue depth {depth})",
            job.conversation_id
        );
        Ok(())
    }

    async fn consume(&self, timeout: Duration) -> Result<Option<ResumeJob>, QueueError> {
        let mut slot = self.consumer.lock().await;
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => {
                warn!("Reconnecting resume queue consumer");
                self.client.get_multiplexed_async_connection().await?
            }
        };

        // A connection that errored is dropped here and reopened on the next poll.
        let popped: Option<(String, String)> = conn.blpop(&self.key, timeout.as_secs_f64()).await?;
        *slot = Some(conn);
        match popped {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}
