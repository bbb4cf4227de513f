//! Accounts Domain
//!
//! Account lifecycle and verification engine: sign-up, login (password or
//! federated), email verification, password reset, profile updates and role
//! management, composed over a credential store, a projection cache and the
//! notification queue.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  AccountService  │  ← lifecycle state machine, token protocol
//! └───┬────┬────┬────┘
//!     │    │    │
//!     │    │    └────────────────┐
//! ┌───▼────────┐ ┌───────────┐ ┌─▼────────────┐
//! │ Repository │ │   Cache   │ │ Notification │
//! │ (Postgres) │ │  (Redis)  │ │ queue (Redis │
//! │            │ │           │ │   stream)    │
//! └────────────┘ └───────────┘ └──────────────┘
//! ```
//!
//! All coordination relies on the store's row-level atomicity: issuing and
//! consuming tokens are single sparse updates scoped to one account.

pub mod cache;
pub mod error;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod service;
pub mod session;
pub mod sso;
pub mod storage;
pub mod token;

pub use cache::{ACCOUNT_LIST_KEY, InMemoryProjectionCache, ProjectionCache, RedisProjectionCache};
pub use error::{AccountError, AccountResult};
pub use models::{
    Account, AccountPatch, AccountResponse, Credentials, LoginResponse, ProfileUpdate, Role,
    SignUpReceipt, SignUpRequest,
};
pub use postgres::PostgresAccountRepository;
pub use repository::{AccountRepository, InMemoryAccountRepository};
pub use service::AccountService;
pub use session::{SessionClaims, SessionKey};
pub use sso::{GoogleSso, GoogleSsoConfig, SsoProfile, SsoProvider};
pub use storage::{InMemoryObjectStorage, ObjectStorage};
pub use token::{IssuedToken, TokenIssuer, TokenPolicy, TokenPurpose};
