//! Training loop
//!
//! Fits a [`TumorNet`] on a [`ProcessedDataset`] with Adam, holding out the
//! last part of the training partition for validation, then measures
//! accuracy on the test partition.

use super::network::{to_probabilities, NetworkError, TumorNet, TumorNetConfig};
use super::preprocess::{FeatureArray, ProcessedDataset};
use super::{decide, ArtifactMetadata, Variant, CHANNELS};
use burn::{
    config::Config,
    module::AutodiffModule,
    nn::loss::{BinaryCrossEntropyLossConfig, CrossEntropyLossConfig},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use chrono::Utc;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = 10)]
    pub epochs: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// Share of the training partition used for validation (taken from the end)
    #[config(default = 0.2)]
    pub validation_split: f64,
    /// Seed of the per-epoch shuffle
    #[config(default = 42)]
    pub seed: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Training partition is empty")]
    EmptyDataset,

    #[error("Batch size must be positive")]
    InvalidBatchSize,

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Failed to read tensor data: {0}")]
    Tensor(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub epochs: Vec<EpochStats>,
    /// `None` when the test partition is empty
    pub test_accuracy: Option<f32>,
}

/// Result of a training run, on the inference (non-autodiff) backend
pub struct TrainedModel<B: Backend> {
    pub model: TumorNet<B>,
    pub metadata: ArtifactMetadata,
    pub report: TrainingReport,
}

/// Loss of a batch of logits.
///
/// Binary: logits `[n, 1]` against 0/1 targets with sigmoid cross-entropy.
/// Multiclass: logits `[n, classes]` against class indices.
pub fn batch_loss<B: Backend>(
    variant: Variant,
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let device = logits.device();
    match variant {
        Variant::Binary => {
            let [n, _] = logits.dims();
            BinaryCrossEntropyLossConfig::new()
                .with_logits(true)
                .init(&device)
                .forward(logits.reshape([n]), targets)
        }
        Variant::Multiclass => CrossEntropyLossConfig::new()
            .init(&device)
            .forward(logits, targets),
    }
}

fn batch<B: Backend>(
    x: &FeatureArray,
    y: &[i64],
    indices: &[usize],
    device: &B::Device,
) -> (Tensor<B, 4>, Tensor<B, 1, Int>) {
    let size = x.shape[2];
    let mut pixels = Vec::with_capacity(indices.len() * x.sample_len());
    let mut targets = Vec::with_capacity(indices.len());
    for &i in indices {
        pixels.extend_from_slice(x.sample(i));
        targets.push(y[i]);
    }

    let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), device)
        .reshape([indices.len(), CHANNELS, size, size]);
    let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), device);

    (images, targets)
}

/// Mean loss and accuracy of `model` over the given samples.
pub fn evaluate<B: Backend>(
    model: &TumorNet<B>,
    variant: Variant,
    x: &FeatureArray,
    y: &[i64],
    indices: &[usize],
    batch_size: usize,
    device: &B::Device,
) -> Result<(f64, f32), TrainingError> {
    let mut loss_sum = 0.0;
    let mut correct = 0usize;

    for chunk in indices.chunks(batch_size.max(1)) {
        let (images, targets) = batch::<B>(x, y, chunk, device);
        let logits = model.forward(images);

        let loss = batch_loss(variant, logits.clone(), targets);
        loss_sum += loss.into_scalar().elem::<f64>() * chunk.len() as f64;

        let outputs = logits.dims()[1];
        let values = to_probabilities(logits)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| TrainingError::Tensor(format!("{:?}", e)))?;

        for (row, &i) in values.chunks(outputs).zip(chunk) {
            if decide(row).0 as i64 == y[i] {
                correct += 1;
            }
        }
    }

    let n = indices.len().max(1);
    Ok((loss_sum / n as f64, correct as f32 / n as f32))
}

/// Train a network from scratch on `dataset`.
pub fn train<B: AutodiffBackend>(
    dataset: &ProcessedDataset,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<TrainedModel<B::InnerBackend>, TrainingError> {
    if config.batch_size == 0 {
        return Err(TrainingError::InvalidBatchSize);
    }
    if dataset.y_train.is_empty() {
        return Err(TrainingError::EmptyDataset);
    }

    let variant = dataset.variant();
    let net_config = TumorNetConfig::new(variant.num_outputs(), variant.conv_channels())
        .with_image_size(dataset.image_size());
    let mut model: TumorNet<B> = net_config.init(device)?;
    let mut optimizer = AdamConfig::new().init::<B, TumorNet<B>>();

    let total = dataset.y_train.len();
    let val_len = ((total as f64) * config.validation_split).floor() as usize;
    let fit_len = (total - val_len).max(1).min(total);
    let fit_indices: Vec<usize> = (0..fit_len).collect();
    let val_indices: Vec<usize> = (fit_len..total).collect();

    tracing::info!(
        "Training {} classifier: {} fit / {} validation samples, {} epochs",
        variant,
        fit_indices.len(),
        val_indices.len(),
        config.epochs
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut history = Vec::with_capacity(config.epochs);

    for epoch in 1..=config.epochs {
        let mut order = fit_indices.clone();
        order.shuffle(&mut rng);

        let mut loss_sum = 0.0;
        for chunk in order.chunks(config.batch_size) {
            let (images, targets) = batch::<B>(&dataset.x_train, &dataset.y_train, chunk, device);
            let logits = model.forward(images);
            let loss = batch_loss(variant, logits, targets);
            loss_sum += loss.clone().into_scalar().elem::<f64>() * chunk.len() as f64;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.learning_rate, model, grads);
        }
        let train_loss = loss_sum / order.len() as f64;

        let (val_loss, val_accuracy) = if val_indices.is_empty() {
            (None, None)
        } else {
            let (loss, accuracy) = evaluate(
                &model.valid(),
                variant,
                &dataset.x_train,
                &dataset.y_train,
                &val_indices,
                config.batch_size,
                device,
            )?;
            (Some(loss), Some(accuracy))
        };

        tracing::info!(
            "Epoch {}/{}: loss {:.4}, val_loss {}, val_accuracy {}",
            epoch,
            config.epochs,
            train_loss,
            val_loss.map_or("-".to_string(), |v| format!("{:.4}", v)),
            val_accuracy.map_or("-".to_string(), |v| format!("{:.4}", v))
        );

        history.push(EpochStats {
            epoch,
            train_loss,
            val_loss,
            val_accuracy,
        });
    }

    let model = model.valid();

    let test_accuracy = if dataset.y_test.is_empty() {
        tracing::warn!("Test partition is empty, skipping evaluation");
        None
    } else {
        let test_indices: Vec<usize> = (0..dataset.y_test.len()).collect();
        let (_, accuracy) = evaluate(
            &model,
            variant,
            &dataset.x_test,
            &dataset.y_test,
            &test_indices,
            config.batch_size,
            device,
        )?;
        tracing::info!("Test accuracy: {:.4}", accuracy);
        Some(accuracy)
    };

    let metadata = ArtifactMetadata {
        test_accuracy,
        epochs: config.epochs,
        trained_at: Utc::now(),
        ..ArtifactMetadata::new(variant, dataset.image_size())
    };

    Ok(TrainedModel {
        model,
        metadata,
        report: TrainingReport {
            epochs: history,
            test_accuracy,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::preprocess::{prepare, tests::write_images, PrepareOptions};
    use burn::backend::{Autodiff, NdArray};

    type TrainBackend = Autodiff<NdArray>;

    fn tiny_dataset(variant: Variant) -> (tempfile::TempDir, ProcessedDataset) {
        let temp = tempfile::tempdir().unwrap();
        for (i, class) in variant.class_dirs().iter().enumerate() {
            write_images(&temp.path().join(class), 5, 40 + 60 * i as u8);
        }
        let dataset = prepare(temp.path(), &PrepareOptions::new(variant).with_image_size(24)).unwrap();
        (temp, dataset)
    }

    #[test]
    fn test_batch_loss_is_scalar() {
        let device = Default::default();
        let logits = Tensor::<NdArray, 2>::zeros([4, 1], &device);
        let targets = Tensor::<NdArray, 1, Int>::from_ints([0, 1, 1, 0], &device);

        let loss = batch_loss(Variant::Binary, logits, targets);

        let value = loss.into_scalar().elem::<f64>();
        assert!((value - std::f64::consts::LN_2).abs() < 1e-4);
    }

    #[test]
    fn test_train_binary_reports_every_epoch() {
        let (_temp, dataset) = tiny_dataset(Variant::Binary);
        let config = TrainingConfig::new().with_epochs(2).with_batch_size(4);

        let trained = train::<TrainBackend>(&dataset, &config, &Default::default()).unwrap();

        assert_eq!(trained.report.epochs.len(), 2);
        assert!(trained.report.epochs.iter().all(|e| e.train_loss.is_finite()));
        let accuracy = trained.report.test_accuracy.unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
        assert_eq!(trained.metadata.variant, Variant::Binary);
        assert_eq!(trained.metadata.epochs, 2);
    }

    #[test]
    fn test_train_multiclass_produces_probabilities() {
        let (_temp, dataset) = tiny_dataset(Variant::Multiclass);
        let config = TrainingConfig::new().with_epochs(1).with_batch_size(8);

        let trained = train::<TrainBackend>(&dataset, &config, &Default::default()).unwrap();

        let device = Default::default();
        let probs = trained
            .model
            .probabilities(Tensor::<NdArray, 4>::zeros([1, 3, 24, 24], &device))
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(probs.len(), 4);
        assert_eq!(trained.metadata.classes.len(), 4);
    }

    #[test]
    fn test_train_rejects_zero_batch() {
        let (_temp, dataset) = tiny_dataset(Variant::Binary);
        let config = TrainingConfig::new().with_batch_size(0);

        let result = train::<TrainBackend>(&dataset, &config, &Default::default());

        assert!(matches!(result, Err(TrainingError::InvalidBatchSize)));
    }
}
