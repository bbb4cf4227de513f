//! Data models for the notifications domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kinds of lifecycle emails. The wire name doubles as the template name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    /// Email-address verification after sign-up.
    Verification,
    /// Password reset link.
    PasswordReset,
}

impl EmailKind {
    /// Template base name registered with the template engine.
    pub fn template_name(&self) -> &'static str {
        match self {
            EmailKind::Verification => "verification",
            EmailKind::PasswordReset => "password_reset",
        }
    }
}

impl std::fmt::Display for EmailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.template_name())
    }
}

/// An email job published to the work queue and processed by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailJob {
    /// Unique job identifier.
    pub id: Uuid,
    /// Kind of email (selects the template).
    pub kind: EmailKind,
    /// Owning account, if any.
    pub account_id: Option<Uuid>,
    /// Recipient email address.
    pub to_email: String,
    /// Recipient name (for personalization).
    pub to_name: String,
    /// Sender email address.
    pub from_email: String,
    /// Email subject line.
    pub subject: String,
    /// Template variables for rendering.
    pub variables: HashMap<String, String>,
    /// Number of retry attempts so far.
    pub retry_count: u32,
    /// Job creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl EmailJob {
    pub fn new(
        kind: EmailKind,
        account_id: Option<Uuid>,
        to_email: String,
        to_name: String,
        from_email: String,
        subject: String,
        variables: HashMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            account_id,
            to_email,
            to_name,
            from_email,
            subject,
            variables,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Clone the job for re-queueing with a fresh id and bumped retry count.
    pub fn with_retry(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    pub fn exceeded_max_retries(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> EmailJob {
        EmailJob::new(
            EmailKind::Verification,
            Some(Uuid::new_v4()),
            "a@b.com".to_string(),
            "Ada".to_string(),
            "noreply@example.com".to_string(),
            "Verify your email address".to_string(),
            HashMap::from([("name".to_string(), "Ada".to_string())]),
        )
    }

    #[test]
    fn test_email_kind_template_names() {
        assert_eq!(EmailKind::Verification.template_name(), "verification");
        assert_eq!(EmailKind::PasswordReset.template_name(), "password_reset");
    }

    #[test]
    fn test_job_roundtrips_through_json() {
        let job = job();
        let encoded = serde_json::to_string(&job).unwrap();
        let decoded: EmailJob = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.kind, EmailKind::Verification);
        assert_eq!(decoded.to_email, "a@b.com");
        assert_eq!(decoded.variables["name"], "Ada");
    }

    #[test]
    fn test_with_retry_bumps_count_and_changes_id() {
        let job = job();
        let retried = job.with_retry();
        assert_ne!(retried.id, job.id);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.to_email, job.to_email);
        assert!(!retried.exceeded_max_retries(3));
        assert!(retried.with_retry().with_retry().exceeded_max_retries(3));
    }
}
