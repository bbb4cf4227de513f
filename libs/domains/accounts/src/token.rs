//! Single-use lifecycle tokens for email verification and password reset.
//!
//! Issuance is pure with respect to the store: the engine persists the
//! `(token, expiry)` pair onto the account in the same sparse update as the
//! rest of the transition.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Raw token entropy; hex-encoding doubles the length on the wire.
pub const TOKEN_BYTES: usize = 32;

/// What a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    VerifyEmail,
    ResetPassword,
}

/// Expiry windows per token purpose. Policy values, not protocol-fixed.
#[derive(Debug, Clone)]
pub struct TokenPolicy {
    pub verification_window: Duration,
    pub reset_window: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        let verification_hours = std::env::var("EMAIL_VERIFICATION_EXPIRY_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24);
        let reset_hours = std::env::var("PASSWORD_RESET_EXPIRY_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        Self {
            verification_window: Duration::hours(verification_hours),
            reset_window: Duration::hours(reset_hours),
        }
    }
}

impl TokenPolicy {
    pub fn window(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::VerifyEmail => self.verification_window,
            TokenPurpose::ResetPassword => self.reset_window,
        }
    }
}

/// A freshly issued token with its expiry instant.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Generates unguessable single-use tokens.
#[derive(Debug, Clone, Default)]
pub struct TokenIssuer {
    policy: TokenPolicy,
}

impl TokenIssuer {
    pub fn new(policy: TokenPolicy) -> Self {
        Self { policy }
    }

    /// Issue a token: fixed-length random bytes, hex-encoded, with
    /// `expiry = now + window(purpose)`. Never derived from account identity.
    pub fn issue(&self, purpose: TokenPurpose) -> IssuedToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);

        IssuedToken {
            token: const_hex::encode(bytes),
            expires_at: Utc::now() + self.policy.window(purpose),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_hex_and_fixed_length() {
        let issued = TokenIssuer::default().issue(TokenPurpose::VerifyEmail);
        assert_eq!(issued.token.len(), TOKEN_BYTES * 2);
        assert!(issued.token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_unique() {
        let issuer = TokenIssuer::default();
        let a = issuer.issue(TokenPurpose::VerifyEmail);
        let b = issuer.issue(TokenPurpose::VerifyEmail);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_expiry_follows_purpose_window() {
        let issuer = TokenIssuer::new(TokenPolicy {
            verification_window: Duration::hours(24),
            reset_window: Duration::hours(1),
        });

        let now = Utc::now();
        let verify = issuer.issue(TokenPurpose::VerifyEmail);
        let reset = issuer.issue(TokenPurpose::ResetPassword);

        assert!(verify.expires_at > now + Duration::hours(23));
        assert!(verify.expires_at <= now + Duration::hours(25));
        assert!(reset.expires_at > now + Duration::minutes(59));
        assert!(reset.expires_at <= now + Duration::minutes(61));
    }
}
