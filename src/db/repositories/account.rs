//! Account repository
//!
//! This module provides:
//! - `AccountRepository` trait defining the interface for account data access
//! - `SqlxAccountRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Account;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Account repository trait
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Create a new account
    async fn create(&self, account: &Account) -> Result<Account>;

    /// Get account by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Account>>;

    /// Get account by email
    async fn get_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Count registered accounts
    async fn count(&self) -> Result<i64>;
}

/// SQLx-based account repository implementation
pub struct SqlxAccountRepository {
    pool: DynDatabasePool,
}

impl SqlxAccountRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AccountRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl AccountRepository for SqlxAccountRepository {
    async fn create(&self, account: &Account) -> Result<Account> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_account_sqlite(self.pool.sqlite()?, account).await,
            DatabaseDriver::Mysql => create_account_mysql(self.pool.mysql()?, account).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Account>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_account_by_id_sqlite(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_account_by_id_mysql(self.pool.mysql()?, id).await,
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_account_by_email_sqlite(self.pool.sqlite()?, email).await
            }
            DatabaseDriver::Mysql => get_account_by_email_mysql(self.pool.mysql()?, email).await,
        }
    }

    async fn count(&self) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => count_accounts_sqlite(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => count_accounts_mysql(self.pool.mysql()?).await,
        }
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_account_sqlite(pool: &SqlitePool, account: &Account) -> Result<Account> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO accounts (name, email, password_hash, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&account.name)
    .bind(&account.email)
    .bind(&account.password_hash)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create account")?;

    Ok(Account {
        id: result.last_insert_rowid(),
        created_at: now,
        ..account.clone()
    })
}

async fn get_account_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Account>> {
    let row = sqlx::query(
        "SELECT id, name, email, password_hash, created_at FROM accounts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get account by ID")?;

    Ok(row.as_ref().map(row_to_account_sqlite))
}

async fn get_account_by_email_sqlite(pool: &SqlitePool, email: &str) -> Result<Option<Account>> {
    let row = sqlx::query(
        "SELECT id, name, email, password_hash, created_at FROM accounts WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .context("Failed to get account by email")?;

    Ok(row.as_ref().map(row_to_account_sqlite))
}

async fn count_accounts_sqlite(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM accounts")
        .fetch_one(pool)
        .await
        .context("Failed to count accounts")?;

    Ok(row.get("count"))
}

fn row_to_account_sqlite(row: &sqlx::sqlite::SqliteRow) -> Account {
    Account {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_account_mysql(pool: &MySqlPool, account: &Account) -> Result<Account> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO accounts (name, email, password_hash, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&account.name)
    .bind(&account.email)
    .bind(&account.password_hash)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create account")?;

    Ok(Account {
        id: result.last_insert_id() as i64,
        created_at: now,
        ..account.clone()
    })
}

async fn get_account_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Account>> {
    let row = sqlx::query(
        "SELECT id, name, email, password_hash, created_at FROM accounts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get account by ID")?;

    Ok(row.as_ref().map(row_to_account_mysql))
}

async fn get_account_by_email_mysql(pool: &MySqlPool, email: &str) -> Result<Option<Account>> {
    let row = sqlx::query(
        "SELECT id, name, email, password_hash, created_at FROM accounts WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .context("Failed to get account by email")?;

    Ok(row.as_ref().map(row_to_account_mysql))
}

async fn count_accounts_mysql(pool: &MySqlPool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM accounts")
        .fetch_one(pool)
        .await
        .context("Failed to count accounts")?;

    Ok(row.get("count"))
}

fn row_to_account_mysql(row: &sqlx::mysql::MySqlRow) -> Account {
    Account {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
    }
}
