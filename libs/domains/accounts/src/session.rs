//! Signed session credentials.
//!
//! HS256 claims over the account id and email with a fixed 48-hour validity
//! window, carried by the client in a bearer header. The engine only issues
//! and verifies these; transport is the HTTP layer's problem.

use crate::error::{AccountError, AccountResult};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session credential time-to-live: 48 hours.
pub const SESSION_TTL_SECONDS: i64 = 48 * 60 * 60;

/// Claims carried by the session credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Account id.
    pub sub: String,
    pub email: String,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiration (unix seconds).
    pub exp: i64,
}

impl SessionClaims {
    pub fn account_id(&self) -> AccountResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AccountError::AuthenticationFailure)
    }
}

/// Symmetric signing key for session credentials.
#[derive(Clone)]
pub struct SessionKey {
    secret: String,
}

impl SessionKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn from_env() -> Self {
        let secret = std::env::var("SESSION_SECRET")
            .unwrap_or_else(|_| "default-secret-key-change-me-in-production".to_string());
        Self::new(secret)
    }

    /// Issue a signed session credential for an account.
    pub fn issue(&self, account_id: Uuid, email: &str) -> AccountResult<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: account_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(SESSION_TTL_SECONDS)).timestamp(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(AccountError::dependency)
    }

    /// Verify signature and expiry; any failure is an authentication failure.
    pub fn verify(&self, token: &str) -> AccountResult<SessionClaims> {
        decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|_| AccountError::AuthenticationFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let key = SessionKey::new("test-secret");
        let account_id = Uuid::now_v7();

        let token = key.issue(account_id, "a@b.com").unwrap();
        let claims = key.verify(&token).unwrap();

        assert_eq!(claims.account_id().unwrap(), account_id);
        assert_eq!(claims.email, "a@b.com");
        assert_eq!(claims.exp - claims.iat, SESSION_TTL_SECONDS);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let key = SessionKey::new("test-secret");
        let token = key.issue(Uuid::now_v7(), "a@b.com").unwrap();

        let mut tampered = token.clone();
        tampered.push('x');

        assert_eq!(
            key.verify(&tampered).unwrap_err(),
            AccountError::AuthenticationFailure
        );
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = SessionKey::new("key-one")
            .issue(Uuid::now_v7(), "a@b.com")
            .unwrap();

        assert_eq!(
            SessionKey::new("key-two").verify(&token).unwrap_err(),
            AccountError::AuthenticationFailure
        );
    }

    #[test]
    fn test_garbage_token_rejected() {
        let key = SessionKey::new("test-secret");
        assert_eq!(
            key.verify("not-a-token").unwrap_err(),
            AccountError::AuthenticationFailure
        );
    }
}
