//! Credential store contract and the in-memory implementation.
//!
//! Lookups return `Ok(None)` for a miss and `Err(Dependency)` for a store
//! outage: the engine treats the two very differently. Every account read
//! eagerly attaches the role set.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AccountError, AccountResult};
use crate::models::{Account, AccountPatch, BASE_ROLES, Role};

/// Repository trait for account and role persistence.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Create a new account. Duplicate email is a conflict.
    async fn insert(&self, account: Account) -> AccountResult<Account>;

    async fn get_by_id(&self, id: Uuid) -> AccountResult<Option<Account>>;

    async fn get_by_email(&self, email: &str) -> AccountResult<Option<Account>>;

    async fn get_by_verify_token(&self, token: &str) -> AccountResult<Option<Account>>;

    async fn get_by_reset_token(&self, token: &str) -> AccountResult<Option<Account>>;

    /// Full replace of the mutable fields.
    async fn update(&self, account: Account) -> AccountResult<Account>;

    /// Apply only the set fields of the patch as one atomic statement scoped
    /// to this account. This is the primitive lifecycle transitions use.
    async fn partial_update(&self, id: Uuid, patch: AccountPatch) -> AccountResult<Account>;

    /// Page through accounts, newest first. `page` is 1-based.
    async fn list(&self, page: u64, page_size: u64) -> AccountResult<Vec<Account>>;

    async fn email_exists(&self, email: &str) -> AccountResult<bool>;

    // Roles

    async fn insert_role(&self, role: Role) -> AccountResult<Role>;

    async fn get_role_by_id(&self, id: Uuid) -> AccountResult<Option<Role>>;

    async fn get_role_by_name(&self, name: &str) -> AccountResult<Option<Role>>;

    async fn update_role(&self, role: Role) -> AccountResult<Role>;

    /// Returns false when no such role existed.
    async fn delete_role(&self, id: Uuid) -> AccountResult<bool>;

    async fn list_roles(&self) -> AccountResult<Vec<Role>>;

    /// Add an assignment pair; the pair is unique.
    async fn assign_role(&self, account_id: Uuid, role_id: Uuid) -> AccountResult<()>;

    /// Remove exactly one assignment pair. Returns false when absent.
    async fn unassign_role(&self, account_id: Uuid, role_id: Uuid) -> AccountResult<bool>;

    /// Seed the base role catalog, create-if-absent by name. Idempotent and
    /// tolerant of concurrent seeding.
    async fn ensure_roles(&self) -> AccountResult<()> {
        for name in BASE_ROLES {
            if self.get_role_by_name(name).await?.is_none() {
                match self.insert_role(Role::new(name)).await {
                    Ok(_) | Err(AccountError::Conflict(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

/// In-memory implementation of [`AccountRepository`] (for development and
/// testing). Tracks account reads so tests can observe cache effectiveness.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAccountRepository {
    accounts: Arc<RwLock<HashMap<Uuid, Account>>>,
    roles: Arc<RwLock<HashMap<Uuid, Role>>>,
    assignments: Arc<RwLock<HashSet<(Uuid, Uuid)>>>,
    reads: Arc<AtomicUsize>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of account reads served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn attach_roles(&self, account: &mut Account) {
        let assignments = self.assignments.read().await;
        let roles = self.roles.read().await;

        let mut attached: Vec<Role> = assignments
            .iter()
            .filter(|(account_id, _)| *account_id == account.id)
            .filter_map(|(_, role_id)| roles.get(role_id).cloned())
            .collect();
        attached.sort_by(|a, b| a.name.cmp(&b.name));

        account.roles = attached;
    }

    async fn find_account<F>(&self, predicate: F) -> Option<Account>
    where
        F: Fn(&Account) -> bool,
    {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let accounts = self.accounts.read().await;
        let mut found = accounts.values().find(|a| predicate(a)).cloned()?;
        drop(accounts);
        self.attach_roles(&mut found).await;
        Some(found)
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn insert(&self, account: Account) -> AccountResult<Account> {
        let mut accounts = self.accounts.write().await;

        let email_exists = accounts
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(&account.email));
        if email_exists {
            return Err(AccountError::Conflict(format!(
                "account with email '{}' already exists",
                account.email
            )));
        }

        accounts.insert(account.id, account.clone());

        tracing::info!(account_id = %account.id, email = %account.email, "Created account");
        Ok(account)
    }

    async fn get_by_id(&self, id: Uuid) -> AccountResult<Option<Account>> {
        Ok(self.find_account(|a| a.id == id).await)
    }

    async fn get_by_email(&self, email: &str) -> AccountResult<Option<Account>> {
        Ok(self
            .find_account(|a| a.email.eq_ignore_ascii_case(email))
            .await)
    }

    async fn get_by_verify_token(&self, token: &str) -> AccountResult<Option<Account>> {
        Ok(self
            .find_account(|a| a.verify_token.as_deref() == Some(token))
            .await)
    }

    async fn get_by_reset_token(&self, token: &str) -> AccountResult<Option<Account>> {
        Ok(self
            .find_account(|a| a.reset_token.as_deref() == Some(token))
            .await)
    }

    async fn update(&self, account: Account) -> AccountResult<Account> {
        let mut accounts = self.accounts.write().await;

        if !accounts.contains_key(&account.id) {
            return Err(AccountError::not_found());
        }

        let email_exists = accounts
            .values()
            .any(|a| a.id != account.id && a.email.eq_ignore_ascii_case(&account.email));
        if email_exists {
            return Err(AccountError::Conflict(format!(
                "account with email '{}' already exists",
                account.email
            )));
        }

        accounts.insert(account.id, account.clone());
        drop(accounts);

        let mut updated = account;
        self.attach_roles(&mut updated).await;

        tracing::info!(account_id = %updated.id, "Updated account");
        Ok(updated)
    }

    async fn partial_update(&self, id: Uuid, patch: AccountPatch) -> AccountResult<Account> {
        let mut accounts = self.accounts.write().await;

        let account = accounts.get_mut(&id).ok_or_else(AccountError::not_found)?;
        account.apply_patch(patch);
        let mut updated = account.clone();
        drop(accounts);

        self.attach_roles(&mut updated).await;
        Ok(updated)
    }

    async fn list(&self, page: u64, page_size: u64) -> AccountResult<Vec<Account>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let accounts = self.accounts.read().await;

        let mut all: Vec<Account> = accounts.values().cloned().collect();
        drop(accounts);

        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let page = page.max(1);
        let offset = ((page - 1) * page_size) as usize;
        let mut result: Vec<Account> = all
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();

        for account in &mut result {
            self.attach_roles(account).await;
        }

        Ok(result)
    }

    async fn email_exists(&self, email: &str) -> AccountResult<bool> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(email)))
    }

    async fn insert_role(&self, role: Role) -> AccountResult<Role> {
        let mut roles = self.roles.write().await;

        if roles.values().any(|r| r.name == role.name) {
            return Err(AccountError::Conflict(format!(
                "role '{}' already exists",
                role.name
            )));
        }

        roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn get_role_by_id(&self, id: Uuid) -> AccountResult<Option<Role>> {
        let roles = self.roles.read().await;
        Ok(roles.get(&id).cloned())
    }

    async fn get_role_by_name(&self, name: &str) -> AccountResult<Option<Role>> {
        let roles = self.roles.read().await;
        Ok(roles.values().find(|r| r.name == name).cloned())
    }

    async fn update_role(&self, role: Role) -> AccountResult<Role> {
        let mut roles = self.roles.write().await;

        if !roles.contains_key(&role.id) {
            return Err(AccountError::not_found());
        }

        roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn delete_role(&self, id: Uuid) -> AccountResult<bool> {
        let mut roles = self.roles.write().await;
        let removed = roles.remove(&id).is_some();
        drop(roles);

        if removed {
            let mut assignments = self.assignments.write().await;
            assignments.retain(|(_, role_id)| *role_id != id);
        }

        Ok(removed)
    }

    async fn list_roles(&self) -> AccountResult<Vec<Role>> {
        let roles = self.roles.read().await;
        let mut all: Vec<Role> = roles.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn assign_role(&self, account_id: Uuid, role_id: Uuid) -> AccountResult<()> {
        let mut assignments = self.assignments.write().await;

        if !assignments.insert((account_id, role_id)) {
            return Err(AccountError::Conflict(
                "role already assigned to account".to_string(),
            ));
        }

        Ok(())
    }

    async fn unassign_role(&self, account_id: Uuid, role_id: Uuid) -> AccountResult<bool> {
        let mut assignments = self.assignments.write().await;
        Ok(assignments.remove(&(account_id, role_id)))
    }
}
