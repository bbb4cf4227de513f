use thiserror::Error;

pub type AccountResult<T> = Result<T, AccountError>;

/// Error taxonomy for every lifecycle operation.
///
/// Everything below the engine boundary is mapped into one of these kinds
/// before it crosses back to the caller. Token and credential errors carry
/// deliberately uninformative messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccountError {
    /// Malformed input (bad email shape, weak password, missing field).
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Token or account lookup miss, or an expired token. The outward
    /// message is identical for both cases; `expired` only lets a client
    /// offer "resend" for an expired link.
    #[error("Invalid or expired link")]
    NotFoundOrExpired { expired: bool },

    /// Bad credentials or invalid session. Uniform wording regardless of
    /// which factor failed.
    #[error("Invalid email or password")]
    AuthenticationFailure,

    /// Duplicate email on sign-up, duplicate role name or assignment pair.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Store/cache/queue/transport failure. The cause is logged, never
    /// shown to the caller.
    #[error("Service temporarily unavailable")]
    Dependency(String),
}

impl AccountError {
    pub fn not_found() -> Self {
        AccountError::NotFoundOrExpired { expired: false }
    }

    pub fn expired() -> Self {
        AccountError::NotFoundOrExpired { expired: true }
    }

    pub fn dependency(cause: impl std::fmt::Display) -> Self {
        AccountError::Dependency(cause.to_string())
    }
}

impl From<domain_notifications::NotificationError> for AccountError {
    fn from(err: domain_notifications::NotificationError) -> Self {
        AccountError::Dependency(err.to_string())
    }
}
