//! Upload service
//!
//! Stores submitted images on disk under a collision-free name and records
//! them, together with their prediction, in the `uploads` table.

use crate::db::repositories::UploadRepository;
use crate::models::{upload_url, CreateUploadInput, Upload, UploadHistory};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

/// Error types for upload service operations
#[derive(Debug, thiserror::Error)]
pub enum UploadServiceError {
    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("Failed to store file: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// An image written to the upload directory.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    /// `<uuid hex>_<client filename>`
    pub stored_name: String,
    /// Location on disk
    pub path: PathBuf,
}

impl StoredFile {
    /// URL under which the file is served
    pub fn public_url(&self) -> String {
        upload_url(&self.stored_name)
    }
}

pub struct UploadService {
    upload_repo: Arc<dyn UploadRepository>,
    upload_dir: PathBuf,
}

impl UploadService {
    pub fn new(upload_repo: Arc<dyn UploadRepository>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_repo,
            upload_dir: upload_dir.into(),
        }
    }

    /// Write the bytes to the upload directory under a fresh unique name.
    pub async fn store_file(
        &self,
        client_filename: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, UploadServiceError> {
        let base = sanitize_filename(client_filename)
            .ok_or_else(|| UploadServiceError::InvalidFilename(client_filename.to_string()))?;

        fs::create_dir_all(&self.upload_dir).await?;

        let stored_name = format!("{}_{}", Uuid::new_v4().simple(), base);
        let path = self.upload_dir.join(&stored_name);
        fs::write(&path, bytes).await?;

        tracing::debug!("Stored upload {} ({} bytes)", stored_name, bytes.len());
        Ok(StoredFile { stored_name, path })
    }

    /// Record a stored file and its prediction for an account.
    pub async fn record(
        &self,
        account_id: i64,
        file: &StoredFile,
        prediction: String,
    ) -> Result<Upload, UploadServiceError> {
        let input = CreateUploadInput {
            stored_name: file.stored_name.clone(),
            path: file.path.to_string_lossy().into_owned(),
            prediction: Some(prediction),
            account_id,
        };

        let upload = self
            .upload_repo
            .create(&input)
            .await
            .context("Failed to record upload")?;

        Ok(upload)
    }

    /// Persisted uploads of one account, newest first.
    pub async fn history(&self, account_id: i64) -> Result<UploadHistory, UploadServiceError> {
        let uploads = self
            .upload_repo
            .list_by_account(account_id)
            .await
            .context("Failed to list uploads")?;

        Ok(UploadHistory::persisted(uploads))
    }

    /// Every upload in the system, newest first.
    pub async fn list_all(&self) -> Result<Vec<Upload>, UploadServiceError> {
        Ok(self
            .upload_repo
            .list_all()
            .await
            .context("Failed to list uploads")?)
    }
}

/// Strip any directory part from a client-supplied filename.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let base: String = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    let base = base.trim();

    if base.is_empty() || base == "." || base == ".." {
        return None;
    }

    Some(base.to_string())
}
