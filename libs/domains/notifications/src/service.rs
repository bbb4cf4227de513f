//! Producer side of the notification pipeline.
//!
//! Composes lifecycle emails and publishes them to the work queue. Callers
//! get an answer as soon as the job is queued; delivery happens in the
//! background worker.

use crate::error::NotificationResult;
use crate::models::{EmailJob, EmailKind};
use crate::queue::JobQueue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Configuration for composing notification emails.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Base URL for links embedded in emails.
    pub frontend_url: String,
    /// Sender email address.
    pub from_email: String,
    /// Sender display name.
    pub from_name: String,
    /// Email verification token expiry in hours (shown in the email copy).
    pub verification_expiry_hours: i64,
    /// Password reset token expiry in hours (shown in the email copy).
    pub password_reset_expiry_hours: i64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            from_email: std::env::var("EMAIL_FROM_ADDRESS")
                .unwrap_or_else(|_| "noreply@localhost".to_string()),
            from_name: std::env::var("EMAIL_FROM_NAME").unwrap_or_else(|_| "Auth API".to_string()),
            verification_expiry_hours: std::env::var("EMAIL_VERIFICATION_EXPIRY_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            password_reset_expiry_hours: std::env::var("PASSWORD_RESET_EXPIRY_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
        }
    }
}

/// Service for queueing lifecycle notification emails.
pub struct NotificationService<Q: JobQueue> {
    queue: Arc<Q>,
    config: NotificationConfig,
}

impl<Q: JobQueue> NotificationService<Q> {
    pub fn new(queue: Arc<Q>, config: NotificationConfig) -> Self {
        Self { queue, config }
    }

    pub fn with_default_config(queue: Arc<Q>) -> Self {
        Self::new(queue, NotificationConfig::default())
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Queue an email-verification message for a freshly issued token.
    pub async fn queue_verification_email(
        &self,
        account_id: Uuid,
        email: &str,
        name: &str,
        token: &str,
    ) -> NotificationResult<String> {
        let link = format!("{}/auth/verify-email?token={}", self.config.frontend_url, token);

        let variables = HashMap::from([
            ("name".to_string(), name.to_string()),
            ("link".to_string(), link),
            (
                "expiry_hours".to_string(),
                self.config.verification_expiry_hours.to_string(),
            ),
        ]);

        let job = EmailJob::new(
            EmailKind::Verification,
            Some(account_id),
            email.to_string(),
            name.to_string(),
            self.config.from_email.clone(),
            "Verify your email address".to_string(),
            variables,
        );

        let stream_id = self.queue.publish(&job).await?;

        info!(
            account_id = %account_id,
            email = %email,
            "Queued verification email"
        );

        Ok(stream_id)
    }

    /// Queue a password-reset message for a freshly issued token.
    pub async fn queue_password_reset_email(
        &self,
        account_id: Uuid,
        email: &str,
        name: &str,
        token: &str,
    ) -> NotificationResult<String> {
        let link = format!(
            "{}/auth/reset-password?token={}",
            self.config.frontend_url, token
        );

        let variables = HashMap::from([
            ("name".to_string(), name.to_string()),
            ("link".to_string(), link),
            (
                "expiry_hours".to_string(),
                self.config.password_reset_expiry_hours.to_string(),
            ),
        ]);

        let job = EmailJob::new(
            EmailKind::PasswordReset,
            Some(account_id),
            email.to_string(),
            name.to_string(),
            self.config.from_email.clone(),
            "Reset your password".to_string(),
            variables,
        );

        let stream_id = self.queue.publish(&job).await?;

        info!(
            account_id = %account_id,
            email = %email,
            "Queued password reset email"
        );

        Ok(stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;

    fn service() -> (Arc<InMemoryQueue>, NotificationService<InMemoryQueue>) {
        let queue = Arc::new(InMemoryQueue::new());
        let config = NotificationConfig {
            frontend_url: "https://app.example.com".to_string(),
            from_email: "noreply@example.com".to_string(),
            from_name: "Auth API".to_string(),
            verification_expiry_hours: 24,
            password_reset_expiry_hours: 1,
        };
        (queue.clone(), NotificationService::new(queue, config))
    }

    #[tokio::test]
    async fn test_verification_email_carries_tokenized_link() {
        let (queue, service) = service();
        let account_id = Uuid::new_v4();

        service
            .queue_verification_email(account_id, "a@b.com", "Ada", "deadbeef")
            .await
            .unwrap();

        let jobs = queue.published();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.kind, EmailKind::Verification);
        assert_eq!(job.account_id, Some(account_id));
        assert_eq!(job.to_email, "a@b.com");
        assert_eq!(job.from_email, "noreply@example.com");
        assert_eq!(
            job.variables["link"],
            "https://app.example.com/auth/verify-email?token=deadbeef"
        );
        assert_eq!(job.variables["expiry_hours"], "24");
    }

    #[tokio::test]
    async fn test_password_reset_email_carries_tokenized_link() {
        let (queue, service) = service();

        service
            .queue_password_reset_email(Uuid::new_v4(), "a@b.com", "Ada", "cafebabe")
            .await
            .unwrap();

        let job = &queue.published()[0];
        assert_eq!(job.kind, EmailKind::PasswordReset);
        assert_eq!(job.subject, "Reset your password");
        assert_eq!(
            job.variables["link"],
            "https://app.example.com/auth/reset-password?token=cafebabe"
        );
        assert_eq!(job.variables["expiry_hours"], "1");
    }
}
