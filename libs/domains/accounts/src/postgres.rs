//! PostgreSQL implementation of [`AccountRepository`] using SeaORM.
//!
//! `AccountRow` is the explicit mapping layer between nullable columns and
//! the canonical `Account` representation.

use crate::error::{AccountError, AccountResult};
use crate::models::{Account, AccountPatch, Role};
use crate::repository::AccountRepository;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ConnectionTrait, DbBackend, FromQueryResult, Statement, Value};
use uuid::Uuid;

#[derive(Clone)]
pub struct PostgresAccountRepository {
    db: sea_orm::DatabaseConnection,
}

impl PostgresAccountRepository {
    pub fn new(db: sea_orm::DatabaseConnection) -> Self {
        Self { db }
    }
}

/// Helper struct for deserializing account rows from the database.
#[derive(Debug, FromQueryResult)]
struct AccountRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    first_name: Option<String>,
    last_name: Option<String>,
    phone_number: Option<String>,
    picture: Option<String>,
    address: Option<String>,
    is_active: bool,
    email_verified: bool,
    verify_token: Option<String>,
    verify_token_expires_at: Option<chrono::DateTime<Utc>>,
    reset_token: Option<String>,
    reset_token_expires_at: Option<chrono::DateTime<Utc>>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            phone_number: row.phone_number,
            picture: row.picture,
            address: row.address,
            is_active: row.is_active,
            email_verified: row.email_verified,
            verify_token: row.verify_token,
            verify_token_expires_at: row.verify_token_expires_at,
            reset_token: row.reset_token,
            reset_token_expires_at: row.reset_token_expires_at,
            roles: Vec::new(), // attached separately on every read
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct RoleRow {
    id: Uuid,
    name: String,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: row.id,
            name: row.name,
        }
    }
}

fn db_err(e: sea_orm::DbErr) -> AccountError {
    AccountError::Dependency(format!("database error: {}", e))
}

fn is_unique_violation(e: &sea_orm::DbErr) -> bool {
    let err_str = e.to_string();
    err_str.contains("duplicate key") || err_str.contains("unique constraint")
}

impl PostgresAccountRepository {
    async fn load_roles(&self, account_id: Uuid) -> AccountResult<Vec<Role>> {
        let sql = r#"
            SELECT roles.id, roles.name
            FROM roles
            INNER JOIN account_roles ON roles.id = account_roles.role_id
            WHERE account_roles.account_id = $1
            ORDER BY roles.name
        "#;

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [account_id.into()]);

        let rows = RoleRow::find_by_statement(stmt)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn fetch_one<I>(&self, sql: &str, values: I) -> AccountResult<Option<Account>>
    where
        I: IntoIterator<Item = Value>,
    {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);

        let row = AccountRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => {
                let mut account: Account = row.into();
                account.roles = self.load_roles(account.id).await?;
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn insert(&self, account: Account) -> AccountResult<Account> {
        let sql = r#"
            INSERT INTO accounts (
                id, username, email, password_hash,
                first_name, last_name, phone_number, picture, address,
                is_active, email_verified, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                account.id.into(),
                account.username.clone().into(),
                account.email.clone().into(),
                account.password_hash.clone().into(),
                account.first_name.clone().into(),
                account.last_name.clone().into(),
                account.phone_number.clone().into(),
                account.picture.clone().into(),
                account.address.clone().into(),
                account.is_active.into(),
                account.email_verified.into(),
                account.created_at.into(),
                account.updated_at.into(),
            ],
        );

        let row = AccountRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AccountError::Conflict(format!(
                        "account with email '{}' already exists",
                        account.email
                    ))
                } else {
                    db_err(e)
                }
            })?
            .ok_or_else(|| AccountError::Dependency("insert returned no row".to_string()))?;

        tracing::info!(account_id = %row.id, email = %row.email, "Created account");
        Ok(row.into())
    }

    async fn get_by_id(&self, id: Uuid) -> AccountResult<Option<Account>> {
        self.fetch_one("SELECT * FROM accounts WHERE id = $1", [id.into()])
            .await
    }

    async fn get_by_email(&self, email: &str) -> AccountResult<Option<Account>> {
        self.fetch_one("SELECT * FROM accounts WHERE email = $1", [email.into()])
            .await
    }

    async fn get_by_verify_token(&self, token: &str) -> AccountResult<Option<Account>> {
        self.fetch_one(
            "SELECT * FROM accounts WHERE verify_token = $1",
            [token.into()],
        )
        .await
    }

    async fn get_by_reset_token(&self, token: &str) -> AccountResult<Option<Account>> {
        self.fetch_one(
            "SELECT * FROM accounts WHERE reset_token = $1",
            [token.into()],
        )
        .await
    }

    async fn update(&self, account: Account) -> AccountResult<Account> {
        let sql = r#"
            UPDATE accounts
            SET username = $2, email = $3, password_hash = $4,
                first_name = $5, last_name = $6, phone_number = $7,
                picture = $8, address = $9, is_active = $10,
                email_verified = $11, verify_token = $12,
                verify_token_expires_at = $13, reset_token = $14,
                reset_token_expires_at = $15, updated_at = $16
            WHERE id = $1
            RETURNING *
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                account.id.into(),
                account.username.clone().into(),
                account.email.clone().into(),
                account.password_hash.clone().into(),
                account.first_name.clone().into(),
                account.last_name.clone().into(),
                account.phone_number.clone().into(),
                account.picture.clone().into(),
                account.address.clone().into(),
                account.is_active.into(),
                account.email_verified.into(),
                account.verify_token.clone().into(),
                account.verify_token_expires_at.into(),
                account.reset_token.clone().into(),
                account.reset_token_expires_at.into(),
                Utc::now().into(),
            ],
        );

        let row = AccountRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(db_err)?
            .ok_or_else(AccountError::not_found)?;

        let mut updated: Account = row.into();
        updated.roles = self.load_roles(updated.id).await?;
        Ok(updated)
    }

    async fn partial_update(&self, id: Uuid, patch: AccountPatch) -> AccountResult<Account> {
        if patch.is_empty() {
            return self
                .get_by_id(id)
                .await?
                .ok_or_else(AccountError::not_found);
        }

        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        macro_rules! set_field {
            ($value:expr, $column:literal) => {
                if let Some(v) = $value {
                    values.push(v.into());
                    sets.push(format!(concat!($column, " = ${}"), values.len()));
                }
            };
        }

        set_field!(patch.username, "username");
        set_field!(patch.email, "email");
        set_field!(patch.password_hash, "password_hash");
        set_field!(patch.first_name, "first_name");
        set_field!(patch.last_name, "last_name");
        set_field!(patch.phone_number, "phone_number");
        set_field!(patch.picture, "picture");
        set_field!(patch.address, "address");
        set_field!(patch.is_active, "is_active");
        set_field!(patch.email_verified, "email_verified");
        set_field!(patch.verify_token, "verify_token");
        set_field!(patch.verify_token_expires_at, "verify_token_expires_at");
        set_field!(patch.reset_token, "reset_token");
        set_field!(patch.reset_token_expires_at, "reset_token_expires_at");

        values.push(Utc::now().into());
        sets.push(format!("updated_at = ${}", values.len()));

        values.push(id.into());
        let sql = format!(
            "UPDATE accounts SET {} WHERE id = ${} RETURNING *",
            sets.join(", "),
            values.len()
        );

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);

        let row = AccountRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AccountError::Conflict("email already in use".to_string())
                } else {
                    db_err(e)
                }
            })?
            .ok_or_else(AccountError::not_found)?;

        let mut updated: Account = row.into();
        updated.roles = self.load_roles(updated.id).await?;
        Ok(updated)
    }

    async fn list(&self, page: u64, page_size: u64) -> AccountResult<Vec<Account>> {
        let page = page.max(1);
        let offset = (page - 1) * page_size;

        let sql = r#"
            SELECT * FROM accounts
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [(page_size as i64).into(), (offset as i64).into()],
        );

        let rows = AccountRow::find_by_statement(stmt)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            let mut account: Account = row.into();
            account.roles = self.load_roles(account.id).await?;
            accounts.push(account);
        }

        Ok(accounts)
    }

    async fn email_exists(&self, email: &str) -> AccountResult<bool> {
        let sql = "SELECT EXISTS(SELECT 1 FROM accounts WHERE email = $1) as exists";

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [email.into()]);

        #[derive(FromQueryResult)]
        struct ExistsResult {
            exists: bool,
        }

        let result = ExistsResult::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(db_err)?;

        Ok(result.map(|r| r.exists).unwrap_or(false))
    }

    async fn insert_role(&self, role: Role) -> AccountResult<Role> {
        let sql = "INSERT INTO roles (id, name) VALUES ($1, $2) RETURNING id, name";

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [role.id.into(), role.name.clone().into()],
        );

        let row = RoleRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AccountError::Conflict(format!("role '{}' already exists", role.name))
                } else {
                    db_err(e)
                }
            })?
            .ok_or_else(|| AccountError::Dependency("insert returned no row".to_string()))?;

        Ok(row.into())
    }

    async fn get_role_by_id(&self, id: Uuid) -> AccountResult<Option<Role>> {
        let sql = "SELECT id, name FROM roles WHERE id = $1";
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [id.into()]);

        let row = RoleRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(db_err)?;

        Ok(row.map(|r| r.into()))
    }

    async fn get_role_by_name(&self, name: &str) -> AccountResult<Option<Role>> {
        let sql = "SELECT id, name FROM roles WHERE name = $1";
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [name.into()]);

        let row = RoleRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(db_err)?;

        Ok(row.map(|r| r.into()))
    }

    async fn update_role(&self, role: Role) -> AccountResult<Role> {
        let sql = "UPDATE roles SET name = $2 WHERE id = $1 RETURNING id, name";

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [role.id.into(), role.name.into()],
        );

        let row = RoleRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(db_err)?
            .ok_or_else(AccountError::not_found)?;

        Ok(row.into())
    }

    async fn delete_role(&self, id: Uuid) -> AccountResult<bool> {
        let sql = "DELETE FROM roles WHERE id = $1";
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [id.into()]);

        let result = self.db.execute_raw(stmt).await.map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_roles(&self) -> AccountResult<Vec<Role>> {
        let sql = "SELECT id, name FROM roles ORDER BY name";
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, []);

        let rows = RoleRow::find_by_statement(stmt)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn assign_role(&self, account_id: Uuid, role_id: Uuid) -> AccountResult<()> {
        let sql = "INSERT INTO account_roles (account_id, role_id) VALUES ($1, $2)";

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [account_id.into(), role_id.into()],
        );

        self.db.execute_raw(stmt).await.map_err(|e| {
            if is_unique_violation(&e) {
                AccountError::Conflict("role already assigned to account".to_string())
            } else {
                db_err(e)
            }
        })?;

        Ok(())
    }

    async fn unassign_role(&self, account_id: Uuid, role_id: Uuid) -> AccountResult<bool> {
        let sql = "DELETE FROM account_roles WHERE account_id = $1 AND role_id = $2";

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [account_id.into(), role_id.into()],
        );

        let result = self.db.execute_raw(stmt).await.map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
