//! Account lifecycle engine.
//!
//! Composes the credential store, token issuer, notification queue, cache
//! and the federated-login/storage capabilities into the account state
//! machine. All collaborators are injected at construction; the service
//! itself is stateless per request.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use domain_notifications::{JobQueue, NotificationService};
use rand::RngExt;
use rand::distr::Alphanumeric;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::{Validate, ValidateEmail};

use crate::cache::{ACCOUNT_LIST_KEY, ProjectionCache};
use crate::error::{AccountError, AccountResult};
use crate::models::{
    Account, AccountPatch, AccountResponse, Credentials, DEFAULT_ROLE, LoginResponse,
    ProfileUpdate, Role, SignUpReceipt, SignUpRequest,
};
use crate::repository::AccountRepository;
use crate::session::SessionKey;
use crate::sso::SsoProvider;
use crate::storage::ObjectStorage;
use crate::token::{TokenIssuer, TokenPurpose};

/// Service layer for the account lifecycle state machine.
pub struct AccountService<R, C, Q>
where
    R: AccountRepository,
    C: ProjectionCache,
    Q: JobQueue,
{
    repository: Arc<R>,
    cache: Arc<C>,
    notifications: NotificationService<Q>,
    sso: Arc<dyn SsoProvider>,
    storage: Arc<dyn ObjectStorage>,
    sessions: SessionKey,
    tokens: TokenIssuer,
}

impl<R, C, Q> AccountService<R, C, Q>
where
    R: AccountRepository,
    C: ProjectionCache,
    Q: JobQueue,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<R>,
        cache: Arc<C>,
        notifications: NotificationService<Q>,
        sso: Arc<dyn SsoProvider>,
        storage: Arc<dyn ObjectStorage>,
        sessions: SessionKey,
        tokens: TokenIssuer,
    ) -> Self {
        Self {
            repository,
            cache,
            notifications,
            sso,
            storage,
            sessions,
            tokens,
        }
    }

    /// Seed the base role catalog. Called once at process start.
    pub async fn ensure_role_catalog(&self) -> AccountResult<()> {
        self.repository.ensure_roles().await
    }

    // Lifecycle transitions

    /// Register a new account with local credentials.
    ///
    /// Creates the account unverified, assigns the default role, issues a
    /// verification token and queues the verification email. The receipt
    /// never echoes the password digest. A publish failure surfaces as a
    /// dependency error but does not roll back the persisted token.
    pub async fn sign_up(&self, input: SignUpRequest) -> AccountResult<SignUpReceipt> {
        input
            .validate()
            .map_err(|e| AccountError::Validation(e.to_string()))?;
        self.validate_password(&input.password)?;

        if self.repository.email_exists(&input.email).await? {
            return Err(AccountError::Conflict(format!(
                "account with email '{}' already exists",
                input.email
            )));
        }

        let password_hash = self.hash_password(&input.password)?;

        let mut account = Account::new(input.username, input.email, password_hash);
        account.first_name = input.first_name;
        account.last_name = input.last_name;
        account.phone_number = input.phone_number;
        account.address = input.address;

        let account = self.repository.insert(account).await?;
        self.assign_default_role(account.id).await?;

        let issued = self.tokens.issue(TokenPurpose::VerifyEmail);
        self.repository
            .partial_update(
                account.id,
                AccountPatch::verification(issued.token.clone(), issued.expires_at),
            )
            .await?;

        self.notifications
            .queue_verification_email(
                account.id,
                &account.email,
                &account.display_name(),
                &issued.token,
            )
            .await?;

        info!(account_id = %account.id, email = %account.email, "Registered account");

        Ok(SignUpReceipt {
            id: account.id,
            email: account.email,
        })
    }

    /// Consume an email-verification token.
    ///
    /// Marks the account verified and clears the token fields in the same
    /// update, so a replayed link fails deterministically.
    pub async fn verify_email(&self, token: &str) -> AccountResult<()> {
        if token.is_empty() {
            return Err(AccountError::Validation("token is required".to_string()));
        }

        let account = self
            .repository
            .get_by_verify_token(token)
            .await?
            .ok_or_else(AccountError::not_found)?;

        let expires_at = account
            .verify_token_expires_at
            .ok_or_else(AccountError::not_found)?;
        if Utc::now() > expires_at {
            return Err(AccountError::expired());
        }

        self.repository
            .partial_update(account.id, AccountPatch::consume_verification())
            .await?;

        info!(account_id = %account.id, "Email verified");
        Ok(())
    }

    /// Authenticate with local credentials or a federated code; both paths
    /// converge on a signed 48-hour session credential.
    pub async fn login(&self, credentials: Credentials) -> AccountResult<LoginResponse> {
        let account = match credentials {
            Credentials::Password { email, password } => {
                self.password_login(&email, &password).await?
            }
            Credentials::Federated { code } => self.federated_login(&code).await?,
        };

        let token = self.sessions.issue(account.id, &account.email)?;

        Ok(LoginResponse {
            account: account.into(),
            token,
        })
    }

    /// Issue a reset token and queue the reset email.
    ///
    /// An unknown email still responds success so the endpoint cannot be
    /// used to enumerate accounts.
    pub async fn request_password_reset(&self, email: &str) -> AccountResult<()> {
        if !email.validate_email() {
            return Err(AccountError::Validation("invalid email".to_string()));
        }

        let Some(account) = self.repository.get_by_email(email).await? else {
            debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let issued = self.tokens.issue(TokenPurpose::ResetPassword);
        self.repository
            .partial_update(
                account.id,
                AccountPatch::reset_request(issued.token.clone(), issued.expires_at),
            )
            .await?;

        self.notifications
            .queue_password_reset_email(
                account.id,
                &account.email,
                &account.display_name(),
                &issued.token,
            )
            .await?;

        info!(account_id = %account.id, "Password reset requested");
        Ok(())
    }

    /// Consume a reset token: re-hash and persist the new password and clear
    /// the reset fields in the same update.
    pub async fn change_password(&self, token: &str, new_password: &str) -> AccountResult<()> {
        if token.is_empty() {
            return Err(AccountError::Validation("token is required".to_string()));
        }

        let account = self
            .repository
            .get_by_reset_token(token)
            .await?
            .ok_or_else(AccountError::not_found)?;

        let expires_at = account
            .reset_token_expires_at
            .ok_or_else(AccountError::not_found)?;
        if Utc::now() > expires_at {
            return Err(AccountError::expired());
        }

        self.validate_password(new_password)?;
        let password_hash = self.hash_password(new_password)?;

        self.repository
            .partial_update(account.id, AccountPatch::consume_reset(password_hash))
            .await?;

        info!(account_id = %account.id, "Password changed");
        Ok(())
    }

    /// Authenticated partial update restricted to profile fields.
    pub async fn update_profile(
        &self,
        id: Uuid,
        input: ProfileUpdate,
    ) -> AccountResult<AccountResponse> {
        input
            .validate()
            .map_err(|e| AccountError::Validation(e.to_string()))?;

        let account = self
            .repository
            .get_by_id(id)
            .await?
            .ok_or_else(AccountError::not_found)?;

        if let Some(new_email) = &input.email
            && !new_email.eq_ignore_ascii_case(&account.email)
            && self.repository.email_exists(new_email).await?
        {
            return Err(AccountError::Conflict(format!(
                "account with email '{}' already exists",
                new_email
            )));
        }

        let patch = input.into_patch();
        if patch.is_empty() {
            return Ok(account.into());
        }

        let updated = self.repository.partial_update(id, patch).await?;
        Ok(updated.into())
    }

    /// Store a profile picture and persist its public URL.
    pub async fn upload_picture(
        &self,
        id: Uuid,
        bytes: Vec<u8>,
        suggested_name: &str,
    ) -> AccountResult<AccountResponse> {
        let account = self
            .repository
            .get_by_id(id)
            .await?
            .ok_or_else(AccountError::not_found)?;

        let stored_name = self.storage.upload(bytes, suggested_name).await?;
        let url = self.storage.public_url(&stored_name);

        let updated = self
            .repository
            .partial_update(
                account.id,
                AccountPatch {
                    picture: Some(url),
                    ..Default::default()
                },
            )
            .await?;

        Ok(updated.into())
    }

    // Reads (cache-aside)

    /// Fetch one account projection, cache first. Cache failures fall
    /// through to the store and are only logged.
    pub async fn get_account(&self, id: Uuid) -> AccountResult<AccountResponse> {
        match self.cache.get_account(id).await {
            Ok(Some(projection)) => return Ok(projection),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Cache read failed, falling back to store"),
        }

        let account = self
            .repository
            .get_by_id(id)
            .await?
            .ok_or_else(AccountError::not_found)?;
        let projection: AccountResponse = account.into();

        if let Err(e) = self.cache.set_account(id, &projection).await {
            warn!(error = %e, "Cache write failed");
        }

        Ok(projection)
    }

    /// Resolve the bearer session credential and fetch the account.
    pub async fn current_account(&self, bearer: &str) -> AccountResult<AccountResponse> {
        let token = bearer.strip_prefix("Bearer ").unwrap_or(bearer).trim();
        let claims = self.sessions.verify(token)?;
        self.get_account(claims.account_id()?).await
    }

    /// Page through account projections, cache first under the fixed list
    /// key.
    pub async fn list_accounts(
        &self,
        page: u64,
        page_size: u64,
    ) -> AccountResult<Vec<AccountResponse>> {
        match self.cache.get_account_list(ACCOUNT_LIST_KEY).await {
            Ok(Some(list)) => return Ok(list),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Cache read failed, falling back to store"),
        }

        let accounts = self.repository.list(page, page_size).await?;
        let list: Vec<AccountResponse> = accounts.into_iter().map(|a| a.into()).collect();

        if let Err(e) = self.cache.set_account_list(ACCOUNT_LIST_KEY, &list).await {
            warn!(error = %e, "Cache write failed");
        }

        Ok(list)
    }

    // Role management

    pub async fn create_role(&self, name: &str) -> AccountResult<Role> {
        if name.trim().is_empty() {
            return Err(AccountError::Validation("role name is required".to_string()));
        }
        self.repository.insert_role(Role::new(name.trim())).await
    }

    pub async fn get_role(&self, id: Uuid) -> AccountResult<Role> {
        self.repository
            .get_role_by_id(id)
            .await?
            .ok_or_else(AccountError::not_found)
    }

    pub async fn list_roles(&self) -> AccountResult<Vec<Role>> {
        self.repository.list_roles().await
    }

    pub async fn update_role(&self, id: Uuid, name: &str) -> AccountResult<Role> {
        if name.trim().is_empty() {
            return Err(AccountError::Validation("role name is required".to_string()));
        }
        self.repository
            .update_role(Role {
                id,
                name: name.trim().to_string(),
            })
            .await
    }

    pub async fn delete_role(&self, id: Uuid) -> AccountResult<()> {
        if self.repository.delete_role(id).await? {
            Ok(())
        } else {
            Err(AccountError::not_found())
        }
    }

    pub async fn assign_role(&self, account_id: Uuid, role_id: Uuid) -> AccountResult<()> {
        self.repository.assign_role(account_id, role_id).await
    }

    pub async fn unassign_role(&self, account_id: Uuid, role_id: Uuid) -> AccountResult<()> {
        if self.repository.unassign_role(account_id, role_id).await? {
            Ok(())
        } else {
            Err(AccountError::not_found())
        }
    }

    // Login paths

    /// Password login. Missing account, inactive account, federated-only
    /// account and digest mismatch all fail identically.
    async fn password_login(&self, email: &str, password: &str) -> AccountResult<Account> {
        let account = self
            .repository
            .get_by_email(email)
            .await?
            .ok_or(AccountError::AuthenticationFailure)?;

        if !account.is_active || account.password_hash.is_empty() {
            return Err(AccountError::AuthenticationFailure);
        }

        if !self.verify_password(password, &account.password_hash)? {
            return Err(AccountError::AuthenticationFailure);
        }

        Ok(account)
    }

    /// Federated login: exchange the code, then provision or refresh the
    /// local account from the provider profile.
    async fn federated_login(&self, code: &str) -> AccountResult<Account> {
        let access_token = self.sso.exchange_code(code).await?;
        let profile = self.sso.fetch_profile(&access_token).await?;

        match self.repository.get_by_email(&profile.email).await? {
            None => {
                let mut account =
                    Account::new(random_username(), profile.email.clone(), String::new());
                account.first_name = profile.first_name;
                account.last_name = profile.last_name;
                account.picture = profile.picture;
                account.email_verified = profile.email_verified;

                let account = self.repository.insert(account).await?;
                self.assign_default_role(account.id).await?;

                info!(account_id = %account.id, email = %account.email, "Provisioned account from federated login");

                self.repository
                    .get_by_id(account.id)
                    .await?
                    .ok_or_else(|| AccountError::dependency("provisioned account vanished"))
            }
            Some(account) => {
                // Opportunistically refresh from the provider when the local
                // record is missing a picture or still unverified.
                if account.picture.is_none() || !account.email_verified {
                    let updated = self
                        .repository
                        .partial_update(
                            account.id,
                            AccountPatch {
                                picture: profile.picture,
                                email_verified: Some(profile.email_verified),
                                ..Default::default()
                            },
                        )
                        .await?;
                    return Ok(updated);
                }

                Ok(account)
            }
        }
    }

    async fn assign_default_role(&self, account_id: Uuid) -> AccountResult<()> {
        let role = self
            .repository
            .get_role_by_name(DEFAULT_ROLE)
            .await?
            .ok_or_else(|| AccountError::dependency("default role missing from catalog"))?;

        self.repository.assign_role(account_id, role.id).await
    }

    // Password helpers

    fn hash_password(&self, password: &str) -> AccountResult<String> {
        let salt = SaltString::generate(&mut OsRng);

        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AccountError::Dependency(format!("password hashing failed: {}", e)))
    }

    fn verify_password(&self, password: &str, hash: &str) -> AccountResult<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AccountError::Dependency(format!("stored digest malformed: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    fn validate_password(&self, password: &str) -> AccountResult<()> {
        if password.len() < 8 {
            return Err(AccountError::Validation(
                "Password must be at least 8 characters".to_string(),
            ));
        }

        if password.len() > 128 {
            return Err(AccountError::Validation(
                "Password cannot exceed 128 characters".to_string(),
            ));
        }

        if !password.chars().any(|c| c.is_uppercase()) {
            return Err(AccountError::Validation(
                "Password must contain at least one uppercase letter".to_string(),
            ));
        }

        if !password.chars().any(|c| c.is_lowercase()) {
            return Err(AccountError::Validation(
                "Password must contain at least one lowercase letter".to_string(),
            ));
        }

        if !password.chars().any(|c| c.is_numeric()) {
            return Err(AccountError::Validation(
                "Password must contain at least one digit".to_string(),
            ));
        }

        let special_chars = "!@#$%^&*()_+-=[]{}|;:,.<>?";
        if !password.chars().any(|c| special_chars.contains(c)) {
            return Err(AccountError::Validation(
                "Password must contain at least one special character".to_string(),
            ));
        }

        Ok(())
    }
}

/// Placeholder username for accounts provisioned from a federated profile.
fn random_username() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryProjectionCache;
    use crate::repository::InMemoryAccountRepository;
    use crate::sso::{MockSsoProvider, SsoProfile};
    use crate::storage::InMemoryObjectStorage;
    use crate::token::TokenPolicy;
    use chrono::Duration;
    use domain_notifications::{EmailKind, InMemoryQueue, NotificationConfig};

    type TestService = AccountService<InMemoryAccountRepository, InMemoryProjectionCache, InMemoryQueue>;

    struct Harness {
        repo: Arc<InMemoryAccountRepository>,
        queue: Arc<InMemoryQueue>,
    }

    async fn service_with_sso(sso: MockSsoProvider) -> (TestService, Harness) {
        let repo = Arc::new(InMemoryAccountRepository::new());
        repo.ensure_roles().await.unwrap();

        let queue = Arc::new(InMemoryQueue::new());
        let notifications = NotificationService::new(
            queue.clone(),
            NotificationConfig {
                frontend_url: "https://app.example.com".to_string(),
                from_email: "noreply@example.com".to_string(),
                from_name: "Auth API".to_string(),
                verification_expiry_hours: 24,
                password_reset_expiry_hours: 1,
            },
        );

        let service = AccountService::new(
            repo.clone(),
            Arc::new(InMemoryProjectionCache::new(std::time::Duration::from_secs(60))),
            notifications,
            Arc::new(sso),
            Arc::new(InMemoryObjectStorage::new("https://cdn.example.com")),
            SessionKey::new("test-secret"),
            TokenIssuer::new(TokenPolicy {
                verification_window: Duration::hours(24),
                reset_window: Duration::hours(1),
            }),
        );

        (service, Harness { repo, queue })
    }

    async fn service() -> (TestService, Harness) {
        service_with_sso(MockSsoProvider::new()).await
    }

    fn sign_up_request(email: &str) -> SignUpRequest {
        SignUpRequest {
            email: email.to_string(),
            password: "Secret1!".to_string(),
            username: "ada".to_string(),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            phone_number: None,
            address: None,
        }
    }

    fn password_login(email: &str, password: &str) -> Credentials {
        Credentials::Password {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_sign_up_creates_unverified_account_with_default_role() {
        let (service, h) = service().await;

        let before = Utc::now();
        let receipt = service.sign_up(sign_up_request("a@b.com")).await.unwrap();
        assert_eq!(receipt.email, "a@b.com");

        let account = h.repo.get_by_id(receipt.id).await.unwrap().unwrap();
        assert!(account.is_active);
        assert!(!account.email_verified);
        assert_eq!(account.roles.len(), 1);
        assert_eq!(account.roles[0].name, "user");

        // One outstanding verification token with expiry = issuance + window
        let token = account.verify_token.expect("verification token");
        assert_eq!(token.len(), 64);
        let expires_at = account.verify_token_expires_at.unwrap();
        assert!(expires_at > before + Duration::hours(23));
        assert!(expires_at < before + Duration::hours(25));

        // One queued verification message addressed to the account
        let jobs = h.queue.published();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, EmailKind::Verification);
        assert_eq!(jobs[0].to_email, "a@b.com");
        assert!(jobs[0].variables["link"].contains(&token));
    }

    #[tokio::test]
    async fn test_sign_up_duplicate_email_conflicts() {
        let (service, _h) = service().await;

        service.sign_up(sign_up_request("a@b.com")).await.unwrap();
        let result = service.sign_up(sign_up_request("a@b.com")).await;

        assert!(matches!(result, Err(AccountError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_sign_up_rejects_malformed_email() {
        let (service, h) = service().await;

        let result = service.sign_up(sign_up_request("not-an-email")).await;

        assert!(matches!(result, Err(AccountError::Validation(_))));
        assert!(h.queue.published().is_empty());
    }

    #[tokio::test]
    async fn test_sign_up_rejects_weak_password() {
        let (service, _h) = service().await;

        let mut request = sign_up_request("a@b.com");
        request.password = "alllowercase1!".to_string();

        let result = service.sign_up(request).await;
        assert!(matches!(result, Err(AccountError::Validation(_))));
    }

    #[tokio::test]
    async fn test_verify_email_consumes_token_once() {
        let (service, h) = service().await;

        let receipt = service.sign_up(sign_up_request("a@b.com")).await.unwrap();
        let token = h
            .repo
            .get_by_id(receipt.id)
            .await
            .unwrap()
            .unwrap()
            .verify_token
            .unwrap();

        service.verify_email(&token).await.unwrap();

        let account = h.repo.get_by_id(receipt.id).await.unwrap().unwrap();
        assert!(account.email_verified);
        assert!(account.verify_token.is_none());
        assert!(account.verify_token_expires_at.is_none());

        // Replay fails: the token no longer matches any account
        assert_eq!(
            service.verify_email(&token).await.unwrap_err(),
            AccountError::NotFoundOrExpired { expired: false }
        );
    }

    #[tokio::test]
    async fn test_verify_email_expired_token_fails_without_mutation() {
        let (service, h) = service().await;

        let receipt = service.sign_up(sign_up_request("a@b.com")).await.unwrap();
        let token = h
            .repo
            .get_by_id(receipt.id)
            .await
            .unwrap()
            .unwrap()
            .verify_token
            .unwrap();

        h.repo
            .partial_update(
                receipt.id,
                AccountPatch {
                    verify_token_expires_at: Some(Some(Utc::now() - Duration::hours(2))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(
            service.verify_email(&token).await.unwrap_err(),
            AccountError::NotFoundOrExpired { expired: true }
        );

        let account = h.repo.get_by_id(receipt.id).await.unwrap().unwrap();
        assert!(!account.email_verified);
        assert_eq!(account.verify_token.as_deref(), Some(token.as_str()));
    }

    #[tokio::test]
    async fn test_verify_email_unknown_token() {
        let (service, _h) = service().await;
        assert_eq!(
            service.verify_email("no-such-token").await.unwrap_err(),
            AccountError::NotFoundOrExpired { expired: false }
        );
    }

    #[tokio::test]
    async fn test_login_failure_is_uniform_across_factors() {
        let (service, _h) = service().await;
        service.sign_up(sign_up_request("a@b.com")).await.unwrap();

        let wrong_password = service
            .login(password_login("a@b.com", "Wrong1!pw"))
            .await
            .unwrap_err();
        let unknown_email = service
            .login(password_login("missing@b.com", "Secret1!"))
            .await
            .unwrap_err();

        assert_eq!(wrong_password, AccountError::AuthenticationFailure);
        assert_eq!(wrong_password, unknown_email);
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
    }

    #[tokio::test]
    async fn test_login_issues_usable_session() {
        let (service, _h) = service().await;
        service.sign_up(sign_up_request("a@b.com")).await.unwrap();

        let response = service
            .login(password_login("a@b.com", "Secret1!"))
            .await
            .unwrap();
        assert_eq!(response.account.email, "a@b.com");
        assert!(!response.token.is_empty());

        let me = service
            .current_account(&format!("Bearer {}", response.token))
            .await
            .unwrap();
        assert_eq!(me.email, "a@b.com");
        assert_eq!(me.roles, vec!["user".to_string()]);
    }

    #[tokio::test]
    async fn test_current_account_rejects_bad_session() {
        let (service, _h) = service().await;
        assert_eq!(
            service.current_account("Bearer garbage").await.unwrap_err(),
            AccountError::AuthenticationFailure
        );
    }

    #[tokio::test]
    async fn test_password_reset_flow_rotates_credentials() {
        let (service, h) = service().await;
        let receipt = service.sign_up(sign_up_request("a@b.com")).await.unwrap();

        service.request_password_reset("a@b.com").await.unwrap();

        let account = h.repo.get_by_id(receipt.id).await.unwrap().unwrap();
        let token = account.reset_token.expect("reset token");
        assert!(account.reset_token_expires_at.is_some());

        let jobs = h.queue.published();
        assert_eq!(jobs.len(), 2); // verification + reset
        assert_eq!(jobs[1].kind, EmailKind::PasswordReset);

        service.change_password(&token, "NewSecret1!").await.unwrap();

        // Old password no longer authenticates, the new one does
        assert_eq!(
            service
                .login(password_login("a@b.com", "Secret1!"))
                .await
                .unwrap_err(),
            AccountError::AuthenticationFailure
        );
        service
            .login(password_login("a@b.com", "NewSecret1!"))
            .await
            .unwrap();

        // Token fields were cleared; the token cannot be replayed
        let account = h.repo.get_by_id(receipt.id).await.unwrap().unwrap();
        assert!(account.reset_token.is_none());
        assert_eq!(
            service
                .change_password(&token, "Another1!pw")
                .await
                .unwrap_err(),
            AccountError::NotFoundOrExpired { expired: false }
        );
    }

    #[tokio::test]
    async fn test_password_reset_unknown_email_responds_success() {
        let (service, h) = service().await;

        service.request_password_reset("ghost@b.com").await.unwrap();

        assert!(h.queue.published().is_empty());
    }

    #[tokio::test]
    async fn test_change_password_expired_token_rejected() {
        let (service, h) = service().await;
        let receipt = service.sign_up(sign_up_request("a@b.com")).await.unwrap();

        service.request_password_reset("a@b.com").await.unwrap();
        let token = h
            .repo
            .get_by_id(receipt.id)
            .await
            .unwrap()
            .unwrap()
            .reset_token
            .unwrap();

        h.repo
            .partial_update(
                receipt.id,
                AccountPatch {
                    reset_token_expires_at: Some(Some(Utc::now() - Duration::minutes(5))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(
            service.change_password(&token, "NewSecret1!").await.unwrap_err(),
            AccountError::NotFoundOrExpired { expired: true }
        );
    }

    #[tokio::test]
    async fn test_get_account_second_read_within_ttl_skips_store() {
        let (service, h) = service().await;
        let receipt = service.sign_up(sign_up_request("a@b.com")).await.unwrap();

        let before_first = h.repo.read_count();
        service.get_account(receipt.id).await.unwrap();
        let after_first = h.repo.read_count();
        assert_eq!(after_first, before_first + 1);

        let cached = service.get_account(receipt.id).await.unwrap();
        assert_eq!(h.repo.read_count(), after_first);
        assert_eq!(cached.email, "a@b.com");
    }

    #[tokio::test]
    async fn test_list_accounts_cache_aside() {
        let (service, h) = service().await;
        service.sign_up(sign_up_request("a@b.com")).await.unwrap();

        let before = h.repo.read_count();
        let first = service.list_accounts(1, 100).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(h.repo.read_count(), before + 1);

        let second = service.list_accounts(1, 100).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(h.repo.read_count(), before + 1);
    }

    #[tokio::test]
    async fn test_federated_login_provisions_account() {
        let mut sso = MockSsoProvider::new();
        sso.expect_exchange_code()
            .returning(|_| Ok("provider-token".to_string()));
        sso.expect_fetch_profile().returning(|_| {
            Ok(SsoProfile {
                email: "fed@example.com".to_string(),
                first_name: Some("Fe".to_string()),
                last_name: Some("Derated".to_string()),
                picture: Some("https://pics.example.com/fe.png".to_string()),
                email_verified: true,
            })
        });
        let (service, h) = service_with_sso(sso).await;

        let response = service
            .login(Credentials::Federated {
                code: "auth-code".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(response.account.email, "fed@example.com");
        assert!(response.account.email_verified);

        // Exactly one account, empty digest, default role
        let accounts = h.repo.list(1, 100).await.unwrap();
        assert_eq!(accounts.len(), 1);
        let account = &accounts[0];
        assert!(account.password_hash.is_empty());
        assert!(account.email_verified);
        assert_eq!(account.roles.len(), 1);
        assert_eq!(account.roles[0].name, "user");

        // A federated-only account cannot password-login
        assert_eq!(
            service
                .login(password_login("fed@example.com", "Secret1!"))
                .await
                .unwrap_err(),
            AccountError::AuthenticationFailure
        );
    }

    #[tokio::test]
    async fn test_federated_login_refreshes_existing_account() {
        let mut sso = MockSsoProvider::new();
        sso.expect_exchange_code()
            .returning(|_| Ok("provider-token".to_string()));
        sso.expect_fetch_profile().returning(|_| {
            Ok(SsoProfile {
                email: "a@b.com".to_string(),
                first_name: None,
                last_name: None,
                picture: Some("https://pics.example.com/ada.png".to_string()),
                email_verified: true,
            })
        });
        let (service, h) = service_with_sso(sso).await;

        let receipt = service.sign_up(sign_up_request("a@b.com")).await.unwrap();

        let response = service
            .login(Credentials::Federated {
                code: "auth-code".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(response.account.id, receipt.id);
        assert!(response.account.email_verified);
        assert_eq!(
            response.account.picture.as_deref(),
            Some("https://pics.example.com/ada.png")
        );

        // Still exactly one account
        assert_eq!(h.repo.list(1, 100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_profile_never_touches_credentials() {
        let (service, h) = service().await;
        let receipt = service.sign_up(sign_up_request("a@b.com")).await.unwrap();
        let before = h.repo.get_by_id(receipt.id).await.unwrap().unwrap();

        let updated = service
            .update_profile(
                receipt.id,
                ProfileUpdate {
                    first_name: Some("Augusta".to_string()),
                    phone_number: Some("+44 20 0000 0000".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.first_name.as_deref(), Some("Augusta"));

        let after = h.repo.get_by_id(receipt.id).await.unwrap().unwrap();
        assert_eq!(after.password_hash, before.password_hash);
        assert_eq!(after.verify_token, before.verify_token);
        assert_eq!(after.roles, before.roles);
    }

    #[tokio::test]
    async fn test_update_profile_duplicate_email_conflicts() {
        let (service, _h) = service().await;
        service.sign_up(sign_up_request("a@b.com")).await.unwrap();
        let receipt = service.sign_up(sign_up_request("b@b.com")).await.unwrap();

        let result = service
            .update_profile(
                receipt.id,
                ProfileUpdate {
                    email: Some("a@b.com".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(AccountError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_upload_picture_persists_public_url() {
        let (service, _h) = service().await;
        let receipt = service.sign_up(sign_up_request("a@b.com")).await.unwrap();

        let updated = service
            .upload_picture(receipt.id, vec![0xFF, 0xD8], "avatar.jpg")
            .await
            .unwrap();

        let picture = updated.picture.unwrap();
        assert!(picture.starts_with("https://cdn.example.com/"));
        assert!(picture.ends_with("avatar.jpg"));
    }

    #[tokio::test]
    async fn test_role_assignment_roundtrip() {
        let (service, h) = service().await;
        let receipt = service.sign_up(sign_up_request("a@b.com")).await.unwrap();
        let admin = h.repo.get_role_by_name("admin").await.unwrap().unwrap();

        service.assign_role(receipt.id, admin.id).await.unwrap();

        let account = h.repo.get_by_id(receipt.id).await.unwrap().unwrap();
        let names: Vec<&str> = account.roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["admin", "user"]);

        service.unassign_role(receipt.id, admin.id).await.unwrap();
        assert_eq!(
            service.unassign_role(receipt.id, admin.id).await.unwrap_err(),
            AccountError::not_found()
        );
    }

    #[tokio::test]
    async fn test_role_crud() {
        let (service, _h) = service().await;

        let role = service.create_role("auditor").await.unwrap();
        assert_eq!(service.get_role(role.id).await.unwrap().name, "auditor");

        let renamed = service.update_role(role.id, "auditors").await.unwrap();
        assert_eq!(renamed.name, "auditors");

        service.delete_role(role.id).await.unwrap();
        assert_eq!(
            service.get_role(role.id).await.unwrap_err(),
            AccountError::not_found()
        );

        // Base catalog remains intact
        let names: Vec<String> = service
            .list_roles()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["admin", "guest", "superadmin", "user"]);
    }
}
