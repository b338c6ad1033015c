//! Model artifact download
//!
//! When the artifact is missing and a download URL is configured, fetch it
//! once before the server starts accepting requests.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

/// What [`ensure_artifact`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    /// The file was already on disk
    Present,
    /// The file was fetched from the URL
    Downloaded,
    /// Missing, and no URL to fetch it from
    Missing,
}

/// Make sure the artifact exists at `path`, downloading it from `url` if needed.
pub async fn ensure_artifact(path: &Path, url: Option<&str>) -> Result<ArtifactStatus> {
    if path.is_file() {
        return Ok(ArtifactStatus::Present);
    }

    let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
        return Ok(ArtifactStatus::Missing);
    };

    tracing::info!("Downloading model artifact from {}", url);

    let client = reqwest::Client::builder()
        .user_agent("tumorscan")
        .timeout(Duration::from_secs(600))
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}", response.status());
    }

    let bytes = response
        .bytes()
        .await
        .context("Failed to read response body")?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    // A partial download never sits at `path`.
    let partial = path.with_extension("part");
    tokio::fs::write(&partial, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    tokio::fs::rename(&partial, path)
        .await
        .with_context(|| format!("Failed to move artifact into {}", path.display()))?;

    tracing::info!("Saved model artifact to {} ({} bytes)", path.display(), bytes.len());
    Ok(ArtifactStatus::Downloaded)
}
