//! Email worker: the background consumer of the email job stream.
//!
//! Exactly one worker runs per process. It reads jobs serially from the
//! consumer group, renders and sends each one, and acknowledges on success.
//! Failed jobs are re-queued with a bumped retry count until `max_retries`,
//! then dead-lettered. Connection failures back off and reconnect forever;
//! the loop only exits on the shutdown signal.

use crate::error::{NotificationError, NotificationResult};
use crate::models::EmailJob;
use crate::providers::{EmailContent, EmailProvider};
use crate::templates::TemplateEngine;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for the email worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Redis stream name.
    pub stream_name: String,
    /// Consumer group name.
    pub consumer_group: String,
    /// Worker/consumer ID.
    pub consumer_id: String,
    /// Batch size for reading jobs.
    pub batch_size: usize,
    /// Poll interval in milliseconds between stream reads.
    pub poll_interval_ms: u64,
    /// Maximum retry attempts before moving a job to the DLQ.
    pub max_retries: u32,
    /// Dead letter queue stream name.
    pub dlq_stream_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stream_name: std::env::var("EMAIL_STREAM_NAME")
                .unwrap_or_else(|_| "email:jobs".to_string()),
            consumer_group: std::env::var("EMAIL_CONSUMER_GROUP")
                .unwrap_or_else(|_| "email_workers".to_string()),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            batch_size: 10,
            poll_interval_ms: std::env::var("EMAIL_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            max_retries: std::env::var("EMAIL_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            dlq_stream_name: std::env::var("EMAIL_DLQ_STREAM_NAME")
                .unwrap_or_else(|_| "email:dlq".to_string()),
        }
    }
}

/// Email worker that processes jobs from the Redis stream.
pub struct EmailWorker<P: EmailProvider> {
    redis: Arc<ConnectionManager>,
    provider: Arc<P>,
    templates: Arc<TemplateEngine>,
    config: WorkerConfig,
}

impl<P: EmailProvider + 'static> EmailWorker<P> {
    pub fn new(
        redis: ConnectionManager,
        provider: P,
        templates: TemplateEngine,
        config: WorkerConfig,
    ) -> Self {
        Self {
            redis: Arc::new(redis),
            provider: Arc::new(provider),
            templates: Arc::new(templates),
            config,
        }
    }

    pub fn with_default_config(redis: ConnectionManager, provider: P, templates: TemplateEngine) -> Self {
        Self::new(redis, provider, templates, WorkerConfig::default())
    }

    /// Run the worker loop until the shutdown signal flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> NotificationResult<()> {
        info!(
            consumer_id = %self.config.consumer_id,
            stream = %self.config.stream_name,
            group = %self.config.consumer_group,
            "Starting email worker"
        );

        self.ensure_consumer_group().await?;

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        // Consecutive-error counter drives the reconnect backoff.
        let mut consecutive_errors: u32 = 0;
        const MAX_BACKOFF_SECS: u64 = 30;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            match self.process_batch().await {
                Ok(_) => {
                    if consecutive_errors > 0 {
                        info!("Connection recovered after {} errors", consecutive_errors);
                        consecutive_errors = 0;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let err_str = e.to_string();

                    if err_str.contains("NOGROUP") {
                        warn!("Consumer group missing, recreating...");
                        if let Err(create_err) = self.ensure_consumer_group().await {
                            error!(error = %create_err, "Failed to recreate consumer group");
                        }
                    } else if Self::is_connection_error(&err_str) {
                        let backoff_secs =
                            std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS);
                        warn!(
                            error = %e,
                            consecutive_errors = %consecutive_errors,
                            backoff_secs = %backoff_secs,
                            "Queue connection error, backing off"
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    } else {
                        error!(error = %e, "Error processing batch");
                    }

                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Received shutdown signal, stopping worker");
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!("Email worker stopped");
        Ok(())
    }

    fn is_connection_error(err_str: &str) -> bool {
        let lower = err_str.to_lowercase();
        lower.contains("connection")
            || lower.contains("disconnected")
            || lower.contains("broken pipe")
            || lower.contains("reset by peer")
            || lower.contains("refused")
            || lower.contains("timed out")
            || lower.contains("io error")
    }

    /// Create the consumer group if it does not exist yet.
    async fn ensure_consumer_group(&self) -> NotificationResult<()> {
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
                info!("Created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(NotificationError::QueueError(e.to_string())),
        }
    }

    /// Process one batch: this consumer's pending entries first, then new ones.
    async fn process_batch(&self) -> NotificationResult<()> {
        self.process_stream_entries("0").await?;
        self.process_stream_entries(">").await?;
        Ok(())
    }

    /// Read and process entries starting from `start_id` ("0" = own pending,
    /// ">" = new messages).
    async fn process_stream_entries(&self, start_id: &str) -> NotificationResult<()> {
        let mut conn = (*self.redis).clone();

        let opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_id)
            .count(self.config.batch_size);

        let reply: StreamReadReply = conn
            .xread_options(&[&self.config.stream_name], &[start_id], &opts)
            .await
            .map_err(|e| NotificationError::QueueError(e.to_string()))?;

        for stream_key in reply.keys {
            if !stream_key.ids.is_empty() {
                debug!(count = stream_key.ids.len(), start_id = %start_id, "Processing messages");
            }
            for message in stream_key.ids {
                if let Err(e) = self.process_message(message).await {
                    error!(error = %e, "Error processing message");
                }
            }
        }

        Ok(())
    }

    /// Process a single stream entry: parse, send, acknowledge.
    async fn process_message(&self, message: redis::streams::StreamId) -> NotificationResult<()> {
        let message_id = message.id.clone();

        match self.parse_job(&message.map) {
            Ok(job) => match self.process_job(&job).await {
                Ok(_) => {
                    if let Err(e) = self.ack_message(&message_id).await {
                        error!(message_id = %message_id, error = %e, "Failed to ACK message");
                    }
                }
                Err(e) => {
                    warn!(message_id = %message_id, error = %e, "Job processing failed");
                    if let Err(handler_err) = self.handle_job_error(&job, &message_id, e).await {
                        error!(message_id = %message_id, error = %handler_err, "Failed to handle job error");
                        // Still ACK to prevent an infinite redelivery loop
                        let _ = self.ack_message(&message_id).await;
                    }
                }
            },
            Err(e) => {
                error!(message_id = %message_id, error = %e, "Failed to parse job, moving to DLQ");
                let _ = self.move_to_dlq_raw(&message_id, &message.map).await;
                let _ = self.ack_message(&message_id).await;
            }
        }

        Ok(())
    }

    fn parse_job(&self, map: &HashMap<String, redis::Value>) -> NotificationResult<EmailJob> {
        let job_value = map.get("job").ok_or_else(|| {
            NotificationError::Internal("Missing 'job' field in message".to_string())
        })?;

        let job_str = match job_value {
            redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
            redis::Value::SimpleString(s) => s.clone(),
            _ => {
                return Err(NotificationError::Internal(
                    "Invalid 'job' field type".to_string(),
                ));
            }
        };

        let job: EmailJob = serde_json::from_str(&job_str)?;
        Ok(job)
    }

    /// Render the job's template and send it over the mail transport.
    async fn process_job(&self, job: &EmailJob) -> NotificationResult<()> {
        info!(
            job_id = %job.id,
            kind = %job.kind,
            to = %job.to_email,
            retry_count = %job.retry_count,
            "Processing email job"
        );

        let rendered = self.templates.render_by_kind(&job.kind, &job.variables)?;

        let email = EmailContent {
            to_email: job.to_email.clone(),
            to_name: job.to_name.clone(),
            from_email: job.from_email.clone(),
            subject: job.subject.clone(),
            html_body: rendered.html,
            text_body: rendered.text,
        };

        let result = self.provider.send(&email).await?;

        info!(
            job_id = %job.id,
            kind = %job.kind,
            to = %job.to_email,
            message_id = ?result.message_id,
            "Successfully sent email"
        );

        Ok(())
    }

    /// Re-queue a failed job or dead-letter it once retries are exhausted.
    async fn handle_job_error(
        &self,
        job: &EmailJob,
        message_id: &str,
        error: NotificationError,
    ) -> NotificationResult<()> {
        error!(
            job_id = %job.id,
            message_id = %message_id,
            retry_count = %job.retry_count,
            error = %error,
            "Failed to process email job"
        );

        if job.exceeded_max_retries(self.config.max_retries) {
            warn!(
                job_id = %job.id,
                max_retries = %self.config.max_retries,
                "Job exceeded max retries, moving to DLQ"
            );
            self.move_to_dlq(job, &error.to_string()).await?;
        } else {
            let retry_job = job.with_retry();
            self.requeue_job(&retry_job).await?;
        }

        self.ack_message(message_id).await?;

        Ok(())
    }

    async fn ack_message(&self, message_id: &str) -> NotificationResult<()> {
        let mut conn = (*self.redis).clone();

        let _: () = conn
            .xack(
                &self.config.stream_name,
                &self.config.consumer_group,
                &[message_id],
            )
            .await?;

        debug!(message_id = %message_id, "Acknowledged message");
        Ok(())
    }

    async fn requeue_job(&self, job: &EmailJob) -> NotificationResult<()> {
        let mut conn = (*self.redis).clone();

        let job_json = serde_json::to_string(job)?;

        let _: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&job_json)
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %job.id, retry_count = %job.retry_count, "Re-queued job for retry");
        Ok(())
    }

    async fn move_to_dlq(&self, job: &EmailJob, error: &str) -> NotificationResult<()> {
        let mut conn = (*self.redis).clone();

        let dlq_entry = serde_json::json!({
            "job": job,
            "error": error,
            "failed_at": chrono::Utc::now().to_rfc3339(),
        });

        let _: String = redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("data")
            .arg(dlq_entry.to_string())
            .query_async(&mut conn)
            .await?;

        warn!(job_id = %job.id, "Moved job to DLQ");
        Ok(())
    }

    async fn move_to_dlq_raw(
        &self,
        message_id: &str,
        map: &HashMap<String, redis::Value>,
    ) -> NotificationResult<()> {
        let mut conn = (*self.redis).clone();

        let dlq_entry = serde_json::json!({
            "raw_message": format!("{:?}", map),
            "original_id": message_id,
            "error": "Failed to parse job",
            "failed_at": chrono::Utc::now().to_rfc3339(),
        });

        let _: String = redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("data")
            .arg(dlq_entry.to_string())
            .query_async(&mut conn)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.stream_name, "email:jobs");
        assert_eq!(config.consumer_group, "email_workers");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 3);
        assert!(config.consumer_id.starts_with("worker-"));
    }

    #[test]
    fn test_connection_error_detection() {
        assert!(EmailWorker::<crate::providers::SmtpProvider>::is_connection_error(
            "Connection refused (os error 111)"
        ));
        assert!(EmailWorker::<crate::providers::SmtpProvider>::is_connection_error(
            "broken pipe"
        ));
        assert!(!EmailWorker::<crate::providers::SmtpProvider>::is_connection_error(
            "template not found"
        ));
    }
}
