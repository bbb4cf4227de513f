use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Role names guaranteed to exist, seeded idempotently at startup.
pub const BASE_ROLES: [&str; 4] = ["superadmin", "admin", "user", "guest"];

/// Role assigned to every new account.
pub const DEFAULT_ROLE: &str = "user";

/// Authorization tag assignable to accounts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: Uuid,
    /// Unique role name.
    pub name: String,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
        }
    }
}

/// Account entity. The canonical representation: profile fields and token
/// fields are `Option` and map one-to-one onto nullable store columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier, generated at creation.
    pub id: Uuid,
    pub username: String,
    /// Unique email address.
    pub email: String,
    /// Argon2 digest; empty for federated-only accounts. Never exposed in
    /// API responses.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    /// Public picture URL (from upload or federated profile).
    pub picture: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
    /// False until a verification token is consumed before its expiry.
    pub email_verified: bool,
    /// Outstanding email-verification token, at most one at a time.
    pub verify_token: Option<String>,
    pub verify_token_expires_at: Option<DateTime<Utc>>,
    /// Outstanding password-reset token, at most one at a time.
    pub reset_token: Option<String>,
    pub reset_token_expires_at: Option<DateTime<Utc>>,
    /// Assigned roles, eagerly attached on every store read.
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new active, unverified account (password already hashed by
    /// the service layer; empty for federated accounts).
    pub fn new(username: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            username,
            email,
            password_hash,
            first_name: None,
            last_name: None,
            phone_number: None,
            picture: None,
            address: None,
            is_active: true,
            email_verified: false,
            verify_token: None,
            verify_token_expires_at: None,
            reset_token: None,
            reset_token_expires_at: None,
            roles: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Name used in email salutations: first/last name when present,
    /// username otherwise.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            _ => self.username.clone(),
        }
    }

    /// Apply a sparse patch in place (used by the in-memory repository; the
    /// Postgres repository translates the same patch into one UPDATE).
    pub fn apply_patch(&mut self, patch: AccountPatch) {
        if let Some(v) = patch.username {
            self.username = v;
        }
        if let Some(v) = patch.email {
            self.email = v;
        }
        if let Some(v) = patch.password_hash {
            self.password_hash = v;
        }
        if let Some(v) = patch.first_name {
            self.first_name = Some(v);
        }
        if let Some(v) = patch.last_name {
            self.last_name = Some(v);
        }
        if let Some(v) = patch.phone_number {
            self.phone_number = Some(v);
        }
        if let Some(v) = patch.picture {
            self.picture = Some(v);
        }
        if let Some(v) = patch.address {
            self.address = Some(v);
        }
        if let Some(v) = patch.is_active {
            self.is_active = v;
        }
        if let Some(v) = patch.email_verified {
            self.email_verified = v;
        }
        if let Some(v) = patch.verify_token {
            self.verify_token = v;
        }
        if let Some(v) = patch.verify_token_expires_at {
            self.verify_token_expires_at = v;
        }
        if let Some(v) = patch.reset_token {
            self.reset_token = v;
        }
        if let Some(v) = patch.reset_token_expires_at {
            self.reset_token_expires_at = v;
        }
        self.updated_at = Utc::now();
    }
}

/// Sparse update applied as a single atomic statement scoped to one account.
///
/// `None` leaves a field untouched. Token fields are doubly optional so that
/// clearing (`Some(None)`) is distinct from not touching (`None`).
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub picture: Option<String>,
    pub address: Option<String>,
    pub is_active: Option<bool>,
    pub email_verified: Option<bool>,
    pub verify_token: Option<Option<String>>,
    pub verify_token_expires_at: Option<Option<DateTime<Utc>>>,
    pub reset_token: Option<Option<String>>,
    pub reset_token_expires_at: Option<Option<DateTime<Utc>>>,
}

impl AccountPatch {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.password_hash.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.phone_number.is_none()
            && self.picture.is_none()
            && self.address.is_none()
            && self.is_active.is_none()
            && self.email_verified.is_none()
            && self.verify_token.is_none()
            && self.verify_token_expires_at.is_none()
            && self.reset_token.is_none()
            && self.reset_token_expires_at.is_none()
    }

    /// Store a freshly issued verification token; overwrites any prior one.
    pub fn verification(token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            verify_token: Some(Some(token)),
            verify_token_expires_at: Some(Some(expires_at)),
            ..Default::default()
        }
    }

    /// Consume a verification token: mark verified and clear the token
    /// fields in the same mutation so replay fails.
    pub fn consume_verification() -> Self {
        Self {
            email_verified: Some(true),
            verify_token: Some(None),
            verify_token_expires_at: Some(None),
            ..Default::default()
        }
    }

    /// Store a freshly issued reset token; overwrites any prior one.
    pub fn reset_request(token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            reset_token: Some(Some(token)),
            reset_token_expires_at: Some(Some(expires_at)),
            ..Default::default()
        }
    }

    /// Consume a reset token: swap the digest and clear the token fields in
    /// the same mutation so replay fails.
    pub fn consume_reset(new_password_hash: String) -> Self {
        Self {
            password_hash: Some(new_password_hash),
            reset_token: Some(None),
            reset_token_expires_at: Some(None),
            ..Default::default()
        }
    }
}

/// Account projection served to clients and cached: the digest and token
/// fields are stripped, roles are flattened to names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub picture: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
    pub email_verified: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            phone_number: account.phone_number,
            picture: account.picture,
            address: account.address,
            is_active: account.is_active,
            email_verified: account.email_verified,
            roles: account.roles.into_iter().map(|r| r.name).collect(),
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// DTO for password sign-up.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignUpRequest {
    #[validate(email, length(max = 255))]
    pub email: String,
    pub password: String,
    #[validate(length(min = 1, max = 100))]
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

/// Minimal sign-up receipt; the raw account is never echoed back.
#[derive(Debug, Clone, Serialize)]
pub struct SignUpReceipt {
    pub id: Uuid,
    pub email: String,
}

/// Login input: local credentials or a federated authorization code.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Credentials {
    Password { email: String, password: String },
    Federated { code: String },
}

/// Response after a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub account: AccountResponse,
    /// Signed session credential, valid for 48 hours.
    pub token: String,
}

/// DTO for authenticated profile updates. Restricted to profile fields;
/// password, verification and role state are never reachable through this.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 100))]
    pub username: Option<String>,
    #[validate(email, length(max = 255))]
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

impl ProfileUpdate {
    pub(crate) fn into_patch(self) -> AccountPatch {
        AccountPatch {
            username: self.username,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            phone_number: self.phone_number,
            address: self.address,
            ..Default::default()
        }
    }
}
