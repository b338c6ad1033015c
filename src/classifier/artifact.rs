//! Model artifact
//!
//! A trained classifier is stored as one gzip-compressed tar file:
//! - `metadata.json`: variant, class labels, input size, test accuracy
//! - `model.bin`: network parameters

use super::network::{NetworkError, TumorNet, TumorNetConfig};
use super::Variant;
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use chrono::{DateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Model artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Entry '{0}' missing from artifact")]
    MissingEntry(&'static str),

    #[error("Failed to (de)serialize weights: {0}")]
    Recorder(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub variant: Variant,
    /// Output labels, indexed by class
    pub classes: Vec<String>,
    pub image_size: usize,
    #[serde(default)]
    pub test_accuracy: Option<f32>,
    #[serde(default)]
    pub epochs: usize,
    pub trained_at: DateTime<Utc>,
}

impl ArtifactMetadata {
    pub fn new(variant: Variant, image_size: usize) -> Self {
        Self {
            variant,
            classes: variant.labels().iter().map(|l| l.to_string()).collect(),
            image_size,
            test_accuracy: None,
            epochs: 0,
            trained_at: Utc::now(),
        }
    }

    /// Network shape this artifact's weights were recorded with
    pub fn network_config(&self) -> TumorNetConfig {
        TumorNetConfig::new(self.variant.num_outputs(), self.variant.conv_channels())
            .with_image_size(self.image_size)
    }
}

/// Metadata plus serialized weights
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub metadata: ArtifactMetadata,
    weights: Vec<u8>,
}

impl ModelArtifact {
    /// Serialize a trained network.
    pub fn from_model<B: Backend>(
        model: TumorNet<B>,
        metadata: ArtifactMetadata,
    ) -> Result<Self, ArtifactError> {
        let weights = BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(model.into_record(), ())
            .map_err(|e| ArtifactError::Recorder(format!("{:?}", e)))?;

        Ok(Self { metadata, weights })
    }

    /// Rebuild the network on `device`.
    pub fn into_model<B: Backend>(self, device: &B::Device) -> Result<TumorNet<B>, ArtifactError> {
        let model = self.metadata.network_config().init::<B>(device)?;

        let record = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(self.weights, device)
            .map_err(|e| ArtifactError::Recorder(format!("{:?}", e)))?;

        Ok(model.load_record(record))
    }

    /// Write the artifact as a `.tar.gz`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let encoder = GzEncoder::new(File::create(path)?, Compression::default());
        let mut builder = Builder::new(encoder);

        let metadata = serde_json::to_vec_pretty(&self.metadata)?;
        append_entry(&mut builder, METADATA_ENTRY, &metadata)?;
        append_entry(&mut builder, MODEL_ENTRY, &self.weights)?;

        builder.into_inner()?.finish()?;

        tracing::info!(
            "Saved {} model artifact to {} ({} bytes of weights)",
            self.metadata.variant,
            path.display(),
            self.weights.len()
        );
        Ok(())
    }

    /// Read an artifact written by [`ModelArtifact::save`].
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        if !path.is_file() {
            return Err(ArtifactError::NotFound(path.to_path_buf()));
        }

        let mut metadata = None;
        let mut weights = None;

        let mut archive = Archive::new(GzDecoder::new(File::open(path)?));
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();

            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;

            match name.as_str() {
                METADATA_ENTRY => metadata = Some(serde_json::from_slice(&bytes)?),
                MODEL_ENTRY => weights = Some(bytes),
                other => tracing::debug!("Ignoring artifact entry {}", other),
            }
        }

        Ok(Self {
            metadata: metadata.ok_or(ArtifactError::MissingEntry(METADATA_ENTRY))?,
            weights: weights.ok_or(ArtifactError::MissingEntry(MODEL_ENTRY))?,
        })
    }
}

fn append_entry<W: std::io::Write>(
    builder: &mut Builder<W>,
    name: &str,
    bytes: &[u8],
) -> Result<(), ArtifactError> {
    let mut header = Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)?;
    Ok(())
}
