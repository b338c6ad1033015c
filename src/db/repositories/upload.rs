//! Upload repository
//!
//! Uploads are insert-only. Listings are ordered newest first, with the id
//! breaking ties between uploads stored in the same instant.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{CreateUploadInput, Upload};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Upload repository trait
#[async_trait]
pub trait UploadRepository: Send + Sync {
    /// Record a new upload
    async fn create(&self, input: &CreateUploadInput) -> Result<Upload>;

    /// List uploads owned by an account, newest first
    async fn list_by_account(&self, account_id: i64) -> Result<Vec<Upload>>;

    /// List every upload, newest first
    async fn list_all(&self) -> Result<Vec<Upload>>;
}

/// SQLx-based upload repository implementation
pub struct SqlxUploadRepository {
    pool: DynDatabasePool,
}

impl SqlxUploadRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UploadRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UploadRepository for SqlxUploadRepository {
    async fn create(&self, input: &CreateUploadInput) -> Result<Upload> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_upload_sqlite(self.pool.sqlite()?, input).await,
            DatabaseDriver::Mysql => create_upload_mysql(self.pool.mysql()?, input).await,
        }
    }

    async fn list_by_account(&self, account_id: i64) -> Result<Vec<Upload>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_uploads_sqlite(self.pool.sqlite()?, Some(account_id)).await
            }
            DatabaseDriver::Mysql => list_uploads_mysql(self.pool.mysql()?, Some(account_id)).await,
        }
    }

    async fn list_all(&self) -> Result<Vec<Upload>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_uploads_sqlite(self.pool.sqlite()?, None).await,
            DatabaseDriver::Mysql => list_uploads_mysql(self.pool.mysql()?, None).await,
        }
    }
}

const SELECT_UPLOADS: &str = r#"
    SELECT id, stored_name, path, uploaded_at, prediction, account_id
    FROM uploads
"#;

fn list_query(by_account: bool) -> String {
    let filter = if by_account { "WHERE account_id = ?" } else { "" };
    format!(
        "{} {} ORDER BY uploaded_at DESC, id DESC",
        SELECT_UPLOADS, filter
    )
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_upload_sqlite(pool: &SqlitePool, input: &CreateUploadInput) -> Result<Upload> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO uploads (stored_name, path, uploaded_at, prediction, account_id)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&input.stored_name)
    .bind(&input.path)
    .bind(now)
    .bind(&input.prediction)
    .bind(input.account_id)
    .execute(pool)
    .await
    .context("Failed to record upload")?;

    Ok(Upload {
        id: result.last_insert_rowid(),
        stored_name: input.stored_name.clone(),
        path: input.path.clone(),
        uploaded_at: now,
        prediction: input.prediction.clone(),
        account_id: input.account_id,
    })
}

async fn list_uploads_sqlite(pool: &SqlitePool, account_id: Option<i64>) -> Result<Vec<Upload>> {
    let sql = list_query(account_id.is_some());
    let mut query = sqlx::query(&sql);
    if let Some(account_id) = account_id {
        query = query.bind(account_id);
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to list uploads")?;

    Ok(rows
        .iter()
        .map(|row| Upload {
            id: row.get("id"),
            stored_name: row.get("stored_name"),
            path: row.get("path"),
            uploaded_at: row.get("uploaded_at"),
            prediction: row.get("prediction"),
            account_id: row.get("account_id"),
        })
        .collect())
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_upload_mysql(pool: &MySqlPool, input: &CreateUploadInput) -> Result<Upload> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO uploads (stored_name, path, uploaded_at, prediction, account_id)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&input.stored_name)
    .bind(&input.path)
    .bind(now)
    .bind(&input.prediction)
    .bind(input.account_id)
    .execute(pool)
    .await
    .context("Failed to record upload")?;

    Ok(Upload {
        id: result.last_insert_id() as i64,
        stored_name: input.stored_name.clone(),
        path: input.path.clone(),
        uploaded_at: now,
        prediction: input.prediction.clone(),
        account_id: input.account_id,
    })
}

async fn list_uploads_mysql(pool: &MySqlPool, account_id: Option<i64>) -> Result<Vec<Upload>> {
    let sql = list_query(account_id.is_some());
    let mut query = sqlx::query(&sql);
    if let Some(account_id) = account_id {
        query = query.bind(account_id);
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to list uploads")?;

    Ok(rows
        .iter()
        .map(|row| Upload {
            id: row.get("id"),
            stored_name: row.get("stored_name"),
            path: row.get("path"),
            uploaded_at: row.get("uploaded_at"),
            prediction: row.get("prediction"),
            account_id: row.get("account_id"),
        })
        .collect())
}
