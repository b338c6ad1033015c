//! Inference service
//!
//! The model artifact is loaded on the first prediction and kept for the
//! lifetime of the service. A failed load is not remembered, so the next
//! prediction tries again (for example after the artifact was downloaded).

use super::artifact::{ArtifactError, ArtifactMetadata, ModelArtifact};
use super::network::TumorNet;
use super::preprocess::load_image;
use super::{decide, Prediction, Variant, CHANNELS};
use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::tensor::Tensor;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

type InferenceBackend = NdArray;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model artifact not available at {0}")]
    ModelUnavailable(PathBuf),

    #[error("Failed to load model: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to read network output: {0}")]
    Tensor(String),

    #[error("Inference task failed: {0}")]
    Task(String),
}

struct LoadedClassifier {
    metadata: ArtifactMetadata,
    network: TumorNet<InferenceBackend>,
    device: NdArrayDevice,
}

impl LoadedClassifier {
    fn predict(&self, image_path: &Path) -> Result<Prediction, InferenceError> {
        let size = self.metadata.image_size;
        let pixels = load_image(image_path, size)?;

        let input = Tensor::<InferenceBackend, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([1, CHANNELS, size, size]);
        let probabilities = self
            .network
            .probabilities(input)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| InferenceError::Tensor(format!("{:?}", e)))?;

        let (class, probability) = decide(&probabilities);
        Ok(match self.metadata.variant {
            Variant::Binary => Prediction::Binary { tumor: class == 1 },
            Variant::Multiclass => Prediction::Multiclass {
                label: self
                    .metadata
                    .classes
                    .get(class)
                    .cloned()
                    .unwrap_or_else(|| class.to_string()),
                probability,
            },
        })
    }
}

pub struct InferenceService {
    artifact_path: PathBuf,
    classifier: OnceCell<Mutex<LoadedClassifier>>,
}

impl InferenceService {
    pub fn new(artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            classifier: OnceCell::new(),
        }
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// Whether the model has been loaded into memory
    pub fn is_loaded(&self) -> bool {
        self.classifier.get().is_some()
    }

    fn classifier(&self) -> Result<&Mutex<LoadedClassifier>, InferenceError> {
        self.classifier.get_or_try_init(|| {
            if !self.artifact_path.is_file() {
                return Err(InferenceError::ModelUnavailable(self.artifact_path.clone()));
            }

            let device = NdArrayDevice::default();
            let artifact = ModelArtifact::load(&self.artifact_path)?;
            let metadata = artifact.metadata.clone();
            let network = artifact.into_model::<InferenceBackend>(&device)?;

            tracing::info!(
                "Loaded {} model from {} ({}x{} input)",
                metadata.variant,
                self.artifact_path.display(),
                metadata.image_size,
                metadata.image_size
            );

            Ok(Mutex::new(LoadedClassifier {
                metadata,
                network,
                device,
            }))
        })
    }

    /// Classify one image, loading the model first if needed.
    ///
    /// Blocks the calling thread; use [`InferenceService::predict_blocking`]
    /// from async code.
    pub fn predict(&self, image_path: &Path) -> Result<Prediction, InferenceError> {
        let classifier = self.classifier()?;
        let guard = classifier
            .lock()
            .map_err(|_| InferenceError::Task("classifier lock poisoned".to_string()))?;
        guard.predict(image_path)
    }

    /// Run [`InferenceService::predict`] on the blocking thread pool.
    pub async fn predict_blocking(
        self: Arc<Self>,
        image_path: PathBuf,
    ) -> Result<Prediction, InferenceError> {
        tokio::task::spawn_blocking(move || self.predict(&image_path))
            .await
            .map_err(|e| InferenceError::Task(e.to_string()))?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::classifier::preprocess::tests::write_images;
    use crate::classifier::MULTICLASS_LABELS;

    /// Save a randomly initialized artifact with a small input size.
    pub(crate) fn write_test_artifact(path: &Path, variant: Variant) {
        let metadata = ArtifactMetadata::new(variant, 24);
        let model = metadata
            .network_config()
            .init::<InferenceBackend>(&NdArrayDevice::default())
            .unwrap();
        ModelArtifact::from_model(model, metadata)
            .unwrap()
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_missing_artifact_is_unavailable() {
        let temp = tempfile::tempdir().unwrap();
        write_images(temp.path(), 1, 120);
        let service = InferenceService::new(temp.path().join("missing.tar.gz"));

        let result = service.predict(&temp.path().join("img_00.jpg"));

        assert!(matches!(result, Err(InferenceError::ModelUnavailable(_))));
        assert!(!service.is_loaded());
    }

    #[test]
    fn test_failed_load_is_retried() {
        let temp = tempfile::tempdir().unwrap();
        write_images(temp.path(), 1, 120);
        let artifact = temp.path().join("model.tar.gz");
        let service = InferenceService::new(&artifact);
        let image = temp.path().join("img_00.jpg");

        assert!(service.predict(&image).is_err());

        write_test_artifact(&artifact, Variant::Multiclass);
        let prediction = service.predict(&image).unwrap();

        assert!(service.is_loaded());
        assert!(MULTICLASS_LABELS.contains(&prediction.label()));
    }

    #[test]
    fn test_multiclass_prediction_format() {
        let temp = tempfile::tempdir().unwrap();
        write_images(temp.path(), 1, 90);
        let artifact = temp.path().join("model.tar.gz");
        write_test_artifact(&artifact, Variant::Multiclass);
        let service = InferenceService::new(&artifact);

        let prediction = service.predict(&temp.path().join("img_00.jpg")).unwrap();

        let Prediction::Multiclass { label, probability } = &prediction else {
            panic!("expected a multiclass prediction, got {:?}", prediction);
        };
        assert!(MULTICLASS_LABELS.contains(&label.as_str()));
        assert!(*probability >= 0.25 && *probability <= 1.0);
        let rendered = prediction.to_string();
        assert!(rendered.starts_with(label.as_str()));
        assert!(rendered.ends_with("%)"));
    }

    #[test]
    fn test_binary_prediction_label() {
        let temp = tempfile::tempdir().unwrap();
        write_images(temp.path(), 1, 200);
        let artifact = temp.path().join("binary.tar.gz");
        write_test_artifact(&artifact, Variant::Binary);
        let service = InferenceService::new(&artifact);

        let prediction = service.predict(&temp.path().join("img_00.jpg")).unwrap();

        assert!(matches!(prediction, Prediction::Binary { .. }));
        assert!(["No se detecta tumor", "Tumor detectado"].contains(&prediction.to_string().as_str()));
    }

    #[test]
    fn test_undecodable_image() {
        let temp = tempfile::tempdir().unwrap();
        let artifact = temp.path().join("model.tar.gz");
        write_test_artifact(&artifact, Variant::Multiclass);
        let bogus = temp.path().join("bogus.jpg");
        std::fs::write(&bogus, b"nope").unwrap();
        let service = InferenceService::new(&artifact);

        let result = service.predict(&bogus);

        assert!(matches!(result, Err(InferenceError::Image(_))));
    }

    #[tokio::test]
    async fn test_predict_blocking_loads_once() {
        let temp = tempfile::tempdir().unwrap();
        write_images(temp.path(), 2, 60);
        let artifact = temp.path().join("model.tar.gz");
        write_test_artifact(&artifact, Variant::Multiclass);
        let service = Arc::new(InferenceService::new(&artifact));

        let (a, b) = tokio::join!(
            service.clone().predict_blocking(temp.path().join("img_00.jpg")),
            service.clone().predict_blocking(temp.path().join("img_01.jpg")),
        );

        assert!(a.is_ok() && b.is_ok());
        assert!(service.is_loaded());
    }
}
