//! Durable work queue for email jobs, backed by a Redis stream.
//!
//! Delivery is at-least-once: entries stay in the consumer group's pending
//! list until the worker acknowledges them.

use crate::error::{NotificationError, NotificationResult};
use crate::models::EmailJob;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Stream, consumer group and dead-letter names for the email pipeline.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Redis stream name.
    pub stream_name: String,
    /// Consumer group name.
    pub consumer_group: String,
    /// Dead letter queue stream name.
    pub dlq_stream_name: String,
    /// Maximum stream length (for auto-trimming).
    pub max_stream_length: i64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_name: std::env::var("EMAIL_STREAM_NAME")
                .unwrap_or_else(|_| "email:jobs".to_string()),
            consumer_group: std::env::var("EMAIL_CONSUMER_GROUP")
                .unwrap_or_else(|_| "email_workers".to_string()),
            dlq_stream_name: std::env::var("EMAIL_DLQ_STREAM_NAME")
                .unwrap_or_else(|_| "email:dlq".to_string()),
            max_stream_length: 100_000,
        }
    }
}

/// Producer-side queue abstraction.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Publish a job; returns the queue-assigned entry id.
    async fn publish(&self, job: &EmailJob) -> NotificationResult<String>;
}

/// Redis-stream implementation of [`JobQueue`].
pub struct RedisStreamQueue {
    redis: Arc<ConnectionManager>,
    config: StreamConfig,
}

impl RedisStreamQueue {
    pub fn new(redis: ConnectionManager, config: StreamConfig) -> Self {
        Self {
            redis: Arc::new(redis),
            config,
        }
    }

    pub fn with_default_config(redis: ConnectionManager) -> Self {
        Self::new(redis, StreamConfig::default())
    }

    /// Create the consumer group if it does not exist yet.
    pub async fn ensure_consumer_group(&self) -> NotificationResult<()> {
        let mut conn = (*self.redis).clone();

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Consumer group already exists"
                );
                Ok(())
            }
            Err(e) => Err(NotificationError::QueueError(e.to_string())),
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.config.stream_name
    }
}

#[async_trait]
impl JobQueue for RedisStreamQueue {
    async fn publish(&self, job: &EmailJob) -> NotificationResult<String> {
        let mut conn = (*self.redis).clone();

        let job_json = serde_json::to_string(job)?;

        // Add to stream with auto-trim
        let id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_stream_length)
            .arg("*")
            .arg("job")
            .arg(&job_json)
            .query_async(&mut conn)
            .await?;

        debug!(
            job_id = %job.id,
            stream_id = %id,
            kind = %job.kind,
            to = %job.to_email,
            "Queued email job"
        );

        Ok(id)
    }
}

/// In-memory implementation of [`JobQueue`] (for development/testing).
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    jobs: Mutex<Vec<EmailJob>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub fn published(&self) -> Vec<EmailJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn publish(&self, job: &EmailJob) -> NotificationResult<String> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job.clone());
        Ok(format!("0-{}", jobs.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailKind;
    use std::collections::HashMap;

    #[test]
    fn test_stream_config_default() {
        let config = StreamConfig::default();
        assert_eq!(config.stream_name, "email:jobs");
        assert_eq!(config.consumer_group, "email_workers");
        assert_eq!(config.dlq_stream_name, "email:dlq");
        assert_eq!(config.max_stream_length, 100_000);
    }

    #[tokio::test]
    async fn test_in_memory_queue_records_jobs() {
        let queue = InMemoryQueue::new();
        let job = EmailJob::new(
            EmailKind::PasswordReset,
            None,
            "a@b.com".to_string(),
            "Ada".to_string(),
            "noreply@example.com".to_string(),
            "Reset your password".to_string(),
            HashMap::new(),
        );

        let id = queue.publish(&job).await.unwrap();
        assert_eq!(id, "0-1");

        let published = queue.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].to_email, "a@b.com");
    }
}
