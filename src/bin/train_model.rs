//! Model training
//!
//! Fits the classifier on the arrays written by `prepare-data` and saves the
//! artifact served by the web app.

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tumorscan::classifier::preprocess::ProcessedDataset;
use tumorscan::classifier::training::{self, TrainingConfig};
use tumorscan::classifier::ModelArtifact;

type TrainingBackend = Autodiff<NdArray>;

/// Train the brain MRI classifier
#[derive(Parser)]
#[command(name = "train-model")]
#[command(version)]
struct Cli {
    /// Directory written by prepare-data
    #[arg(short, long, default_value = "data/processed")]
    data: PathBuf,

    /// Path of the model artifact
    #[arg(short, long, default_value = "models/modelo_tumor_multiclase.tar.gz")]
    output: PathBuf,

    /// Number of training epochs
    #[arg(short, long, default_value = "10")]
    epochs: usize,

    /// Batch size for training
    #[arg(short, long, default_value = "32")]
    batch_size: usize,

    /// Learning rate
    #[arg(short, long, default_value = "0.001")]
    learning_rate: f64,

    /// Seed of the per-epoch shuffle
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("tumorscan=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tumorscan=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let dataset = ProcessedDataset::load(&cli.data)
        .with_context(|| format!("Failed to load dataset from {}", cli.data.display()))?;
    tracing::info!(
        "Loaded {} dataset: {} training / {} test samples",
        dataset.variant(),
        dataset.y_train.len(),
        dataset.y_test.len()
    );

    let config = TrainingConfig::new()
        .with_epochs(cli.epochs)
        .with_batch_size(cli.batch_size)
        .with_learning_rate(cli.learning_rate)
        .with_seed(cli.seed);

    let device = NdArrayDevice::default();
    let trained = training::train::<TrainingBackend>(&dataset, &config, &device)
        .context("Training failed")?;

    match trained.report.test_accuracy {
        Some(accuracy) => tracing::info!("Test accuracy: {:.2}%", accuracy * 100.0),
        None => tracing::warn!("Test partition is empty; accuracy not measured"),
    }

    let artifact = ModelArtifact::from_model(trained.model, trained.metadata)
        .context("Failed to serialize model")?;
    artifact
        .save(&cli.output)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;

    Ok(())
}
