//! Federated login capability.
//!
//! The provider exchange is a black box to the engine: a code goes in, a
//! verified external profile comes out.

use crate::error::{AccountError, AccountResult};
use async_trait::async_trait;
use serde::Deserialize;

/// Verified external profile returned by a federated identity provider.
#[derive(Debug, Clone)]
pub struct SsoProfile {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub picture: Option<String>,
    /// Whether the provider itself has verified the email address.
    pub email_verified: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SsoProvider: Send + Sync {
    /// Exchange the authorization code for a provider access token.
    async fn exchange_code(&self, code: &str) -> AccountResult<String>;

    /// Fetch the external profile for an access token.
    async fn fetch_profile(&self, access_token: &str) -> AccountResult<SsoProfile>;
}

/// Google OAuth configuration.
#[derive(Debug, Clone)]
pub struct GoogleSsoConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

impl GoogleSsoConfig {
    pub fn from_env() -> Self {
        Self {
            client_id: std::env::var("GOOGLE_CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("GOOGLE_CLIENT_SECRET").unwrap_or_default(),
            redirect_url: std::env::var("FRONTEND_URL").unwrap_or_default(),
        }
    }
}

/// Google implementation of [`SsoProvider`].
pub struct GoogleSso {
    config: GoogleSsoConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: String,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
    verified_email: Option<bool>,
}

impl GoogleSso {
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";
    const USERINFO_URL: &'static str = "https://www.googleapis.com/oauth2/v2/userinfo";

    pub fn new(config: GoogleSsoConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(GoogleSsoConfig::from_env())
    }
}

#[async_trait]
impl SsoProvider for GoogleSso {
    async fn exchange_code(&self, code: &str) -> AccountResult<String> {
        let response = self
            .http
            .post(Self::TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
                ("redirect_uri", &self.config.redirect_url),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AccountError::Dependency(format!("token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Provider rejected authorization code");
            return Err(AccountError::AuthenticationFailure);
        }

        let token: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| AccountError::Dependency(format!("token decode failed: {}", e)))?;

        Ok(token.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> AccountResult<SsoProfile> {
        let response = self
            .http
            .get(Self::USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AccountError::Dependency(format!("profile fetch failed: {}", e)))?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Provider rejected access token");
            return Err(AccountError::AuthenticationFailure);
        }

        let info: GoogleUserInfo = response
            .json()
            .await
            .map_err(|e| AccountError::Dependency(format!("profile decode failed: {}", e)))?;

        Ok(SsoProfile {
            email: info.email,
            first_name: info.given_name,
            last_name: info.family_name,
            picture: info.picture,
            email_verified: info.verified_email.unwrap_or(false),
        })
    }
}
