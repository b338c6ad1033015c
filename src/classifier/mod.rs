//! Brain MRI classifier
//!
//! This module provides:
//! - Dataset preprocessing (labeled directory tree to numeric arrays)
//! - The convolutional network and its training loop
//! - The on-disk model artifact
//! - The inference service used by the web app

pub mod artifact;
pub mod download;
pub mod inference;
pub mod network;
pub mod preprocess;
pub mod training;

pub use artifact::{ArtifactError, ArtifactMetadata, ModelArtifact};
pub use inference::{InferenceError, InferenceService};
pub use network::{TumorNet, TumorNetConfig};

use serde::{Deserialize, Serialize};

/// Side length of the square network input
pub const IMAGE_SIZE: usize = 150;

/// Number of color channels fed to the network
pub const CHANNELS: usize = 3;

/// Class directories of the binary dataset, in label order
pub const BINARY_CLASS_DIRS: [&str; 2] = ["no", "yes"];

/// Display labels of the binary classifier, in label order
pub const BINARY_LABELS: [&str; 2] = ["No se detecta tumor", "Tumor detectado"];

/// Categories of the multiclass classifier, in label order
pub const MULTICLASS_LABELS: [&str; 4] = ["glioma", "meningioma", "notumor", "pituitary"];

/// Which classifier a dataset or artifact belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Tumor / no tumor
    Binary,
    /// Four tumor categories
    Multiclass,
}

impl Variant {
    /// Where `prepare-data` looks for the raw dataset by default
    pub fn default_raw_dir(&self) -> &'static str {
        match self {
            Variant::Binary => "data/raw/brain_tumor_dataset",
            Variant::Multiclass => "data/raw/brain_tumor_multiclass",
        }
    }

    /// Subdirectory names under the dataset root, indexed by label
    pub fn class_dirs(&self) -> &'static [&'static str] {
        match self {
            Variant::Binary => &BINARY_CLASS_DIRS,
            Variant::Multiclass => &MULTICLASS_LABELS,
        }
    }

    /// Human readable labels, indexed by label
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            Variant::Binary => &BINARY_LABELS,
            Variant::Multiclass => &MULTICLASS_LABELS,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_dirs().len()
    }

    /// Width of the network's output layer
    pub fn num_outputs(&self) -> usize {
        match self {
            Variant::Binary => 1,
            Variant::Multiclass => MULTICLASS_LABELS.len(),
        }
    }

    /// Output channels of each convolution block
    pub fn conv_channels(&self) -> Vec<usize> {
        match self {
            Variant::Binary => vec![32, 64],
            Variant::Multiclass => vec![32, 64, 128],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Binary => "binary",
            Variant::Multiclass => "multiclass",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binary" | "binario" => Ok(Variant::Binary),
            "multiclass" | "multiclase" => Ok(Variant::Multiclass),
            other => Err(format!("unknown variant: {}", other)),
        }
    }
}

/// Outcome of classifying one image
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Thresholded sigmoid output
    Binary { tumor: bool },
    /// Arg-max category and its probability in [0, 1]
    Multiclass { label: String, probability: f32 },
}

impl Prediction {
    pub fn label(&self) -> &str {
        match self {
            Prediction::Binary { tumor: true } => BINARY_LABELS[1],
            Prediction::Binary { tumor: false } => BINARY_LABELS[0],
            Prediction::Multiclass { label, .. } => label,
        }
    }
}

/// Pick a class from one row of network probabilities.
///
/// A single value is a sigmoid output thresholded at 0.5; otherwise the
/// arg-max wins. Returns the class index and its probability.
pub fn decide(probabilities: &[f32]) -> (usize, f32) {
    if let [p] = probabilities {
        return (usize::from(*p > 0.5), *p);
    }

    probabilities
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best })
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Prediction::Binary { .. } => f.write_str(self.label()),
            Prediction::Multiclass { label, probability } => {
                write!(f, "{} ({:.2}%)", label, probability * 100.0)
            }
        }
    }
}
