//! Dataset preparation
//!
//! Turns a directory tree with one subdirectory per class into the arrays
//! consumed by `train-model`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tumorscan::classifier::preprocess::{self, PrepareOptions, DEFAULT_SEED, DEFAULT_TEST_FRACTION};
use tumorscan::classifier::{Variant, IMAGE_SIZE};

/// Prepare a labeled MRI image dataset for training
#[derive(Parser)]
#[command(name = "prepare-data")]
#[command(version)]
struct Cli {
    /// Root directory with one subdirectory per class
    /// [default: data/raw/brain_tumor_dataset for binary,
    /// data/raw/brain_tumor_multiclass for multiclass]
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory the arrays and manifest are written to
    #[arg(short, long, default_value = "data/processed")]
    output: PathBuf,

    /// Classifier the dataset is for: binary (no/yes) or multiclass
    #[arg(long, default_value = "multiclass")]
    variant: Variant,

    /// Side length images are resized to
    #[arg(long, default_value_t = IMAGE_SIZE)]
    image_size: usize,

    /// Share of samples held out for testing
    #[arg(long, default_value_t = DEFAULT_TEST_FRACTION)]
    test_fraction: f64,

    /// Seed of the train/test split
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// The `--input` directory, or the variant's default dataset location
    fn input_dir(&self) -> PathBuf {
        self.input
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.variant.default_raw_dir()))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("tumorscan=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tumorscan=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let input = cli.input_dir();

    let mut options = PrepareOptions::new(cli.variant).with_image_size(cli.image_size);
    options.test_fraction = cli.test_fraction;
    options.seed = cli.seed;

    tracing::info!(
        "Preparing {} dataset from {}",
        cli.variant,
        input.display()
    );

    let dataset = preprocess::prepare(&input, &options)
        .with_context(|| format!("Failed to prepare {}", input.display()))?;
    dataset
        .save(&cli.output)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;

    tracing::info!(
        "Wrote {} training and {} test samples to {}",
        dataset.manifest.train_samples,
        dataset.manifest.test_samples,
        cli.output.display()
    );
    if dataset.manifest.skipped_files > 0 {
        tracing::warn!("Skipped {} undecodable files", dataset.manifest.skipped_files);
    }

    Ok(())
}
