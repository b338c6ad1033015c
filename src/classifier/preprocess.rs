//! Dataset preprocessing
//!
//! Turns a directory tree with one subdirectory per class into four
//! bincode-encoded arrays (`X_train.bin`, `y_train.bin`, `X_test.bin`,
//! `y_test.bin`) plus a `dataset.json` manifest.

use super::{Variant, CHANNELS, IMAGE_SIZE};
use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

pub const X_TRAIN_FILE: &str = "X_train.bin";
pub const Y_TRAIN_FILE: &str = "y_train.bin";
pub const X_TEST_FILE: &str = "X_test.bin";
pub const Y_TEST_FILE: &str = "y_test.bin";
pub const MANIFEST_FILE: &str = "dataset.json";

/// Default seed of the train/test shuffle
pub const DEFAULT_SEED: u64 = 42;

/// Default share of samples held out for testing
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Dataset directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("No decodable images found under {0}")]
    EmptyDataset(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode array: {0}")]
    Encode(#[from] bincode::Error),

    #[error("Invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Array shape mismatch: {0}")]
    Shape(String),
}

/// Flat `f32` array with an explicit shape, `[samples, channels, height, width]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureArray {
    pub shape: [usize; 4],
    pub data: Vec<f32>,
}

impl FeatureArray {
    pub fn empty(image_size: usize) -> Self {
        Self {
            shape: [0, CHANNELS, image_size, image_size],
            data: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of values in one sample
    pub fn sample_len(&self) -> usize {
        self.shape[1] * self.shape[2] * self.shape[3]
    }

    pub fn sample(&self, index: usize) -> &[f32] {
        let stride = self.sample_len();
        &self.data[index * stride..(index + 1) * stride]
    }

    fn push(&mut self, pixels: &[f32]) {
        self.data.extend_from_slice(pixels);
        self.shape[0] += 1;
    }

    fn check(&self) -> Result<(), PreprocessError> {
        if self.data.len() != self.len() * self.sample_len() {
            return Err(PreprocessError::Shape(format!(
                "shape {:?} holds {} values, found {}",
                self.shape,
                self.len() * self.sample_len(),
                self.data.len()
            )));
        }
        Ok(())
    }
}

/// Contents of `dataset.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub variant: Variant,
    pub classes: Vec<String>,
    pub image_size: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub skipped_files: usize,
    pub created_at: DateTime<Utc>,
}

/// The four arrays of a prepared dataset
#[derive(Debug, Clone)]
pub struct ProcessedDataset {
    pub manifest: DatasetManifest,
    pub x_train: FeatureArray,
    pub y_train: Vec<i64>,
    pub x_test: FeatureArray,
    pub y_test: Vec<i64>,
}

/// Preprocessing parameters
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    pub variant: Variant,
    pub image_size: usize,
    pub test_fraction: f64,
    pub seed: u64,
}

impl PrepareOptions {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            image_size: IMAGE_SIZE,
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: DEFAULT_SEED,
        }
    }

    pub fn with_image_size(mut self, image_size: usize) -> Self {
        self.image_size = image_size;
        self
    }
}

/// One decoded image and its label
#[derive(Debug, Clone)]
struct Sample {
    pixels: Vec<f32>,
    label: i64,
}

/// Decode an image file and turn it into a normalized CHW vector.
///
/// The image is converted to RGB, resized to `size`x`size` with a bilinear
/// filter and scaled to `[0, 1]`.
pub fn load_image(path: &Path, size: usize) -> Result<Vec<f32>, image::ImageError> {
    let img = image::open(path)?;
    Ok(image_to_chw(&img, size))
}

pub fn image_to_chw(img: &image::DynamicImage, size: usize) -> Vec<f32> {
    let side = size as u32;
    let rgb = img.resize_exact(side, side, FilterType::Triangle).to_rgb8();

    let mut data = Vec::with_capacity(CHANNELS * size * size);
    for channel in 0..CHANNELS {
        for y in 0..side {
            for x in 0..side {
                data.push(rgb.get_pixel(x, y)[channel] as f32 / 255.0);
            }
        }
    }
    data
}

/// Read every image under `root/<class>/`.
///
/// Files that fail to decode are logged and skipped.
fn collect_samples(
    root: &Path,
    options: &PrepareOptions,
) -> Result<(Vec<Sample>, usize), PreprocessError> {
    if !root.is_dir() {
        return Err(PreprocessError::MissingDirectory(root.to_path_buf()));
    }

    let mut samples = Vec::new();
    let mut skipped = 0;

    for (label, class) in options.variant.class_dirs().iter().enumerate() {
        let class_dir = root.join(class);
        if !class_dir.is_dir() {
            return Err(PreprocessError::MissingDirectory(class_dir));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&class_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let before = samples.len();
        for file in files {
            match load_image(&file, options.image_size) {
                Ok(pixels) => samples.push(Sample {
                    pixels,
                    label: label as i64,
                }),
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", file.display(), e);
                    skipped += 1;
                }
            }
        }

        tracing::info!("Class '{}': {} images", class, samples.len() - before);
    }

    if samples.is_empty() {
        return Err(PreprocessError::EmptyDataset(root.to_path_buf()));
    }

    Ok((samples, skipped))
}

/// Number of held-out samples for a group of `len` (rounded up).
fn test_count(len: usize, test_fraction: f64) -> usize {
    ((len as f64) * test_fraction - 1e-9).ceil().max(0.0) as usize
}

/// Shuffle and split into `(train, test)` indices.
///
/// With `stratify` every label keeps its share in both partitions.
fn split_indices(
    labels: &[i64],
    test_fraction: f64,
    seed: u64,
    stratify: bool,
) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);

    if !stratify {
        let mut indices: Vec<usize> = (0..labels.len()).collect();
        indices.shuffle(&mut rng);
        let test_len = test_count(indices.len(), test_fraction).min(indices.len());
        let train = indices.split_off(test_len);
        return (train, indices);
    }

    let mut distinct: Vec<i64> = labels.to_vec();
    distinct.sort_unstable();
    distinct.dedup();

    let mut train = Vec::new();
    let mut test = Vec::new();
    for label in distinct {
        let mut group: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == label).collect();
        group.shuffle(&mut rng);
        let test_len = test_count(group.len(), test_fraction).min(group.len());
        test.extend_from_slice(&group[..test_len]);
        train.extend_from_slice(&group[test_len..]);
    }
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);

    (train, test)
}

fn gather(samples: &[Sample], indices: &[usize], image_size: usize) -> (FeatureArray, Vec<i64>) {
    let mut x = FeatureArray::empty(image_size);
    let mut y = Vec::with_capacity(indices.len());
    for &i in indices {
        x.push(&samples[i].pixels);
        y.push(samples[i].label);
    }
    (x, y)
}

/// Decode, resize, normalize and split a labeled dataset.
pub fn prepare(root: &Path, options: &PrepareOptions) -> Result<ProcessedDataset, PreprocessError> {
    let (samples, skipped) = collect_samples(root, options)?;

    let labels: Vec<i64> = samples.iter().map(|s| s.label).collect();
    let stratify = options.variant == Variant::Multiclass;
    let (train_idx, test_idx) = split_indices(&labels, options.test_fraction, options.seed, stratify);

    let (x_train, y_train) = gather(&samples, &train_idx, options.image_size);
    let (x_test, y_test) = gather(&samples, &test_idx, options.image_size);

    tracing::info!(
        "Prepared {} training and {} test samples ({} skipped)",
        y_train.len(),
        y_test.len(),
        skipped
    );

    Ok(ProcessedDataset {
        manifest: DatasetManifest {
            variant: options.variant,
            classes: options
                .variant
                .class_dirs()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            image_size: options.image_size,
            train_samples: y_train.len(),
            test_samples: y_test.len(),
            skipped_files: skipped,
            created_at: Utc::now(),
        },
        x_train,
        y_train,
        x_test,
        y_test,
    })
}

fn write_bin<T: Serialize>(path: &Path, value: &T) -> Result<(), PreprocessError> {
    let writer = BufWriter::new(fs::File::create(path)?);
    bincode::serialize_into(writer, value)?;
    Ok(())
}

fn read_bin<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PreprocessError> {
    if !path.is_file() {
        return Err(PreprocessError::MissingDirectory(path.to_path_buf()));
    }
    let reader = BufReader::new(fs::File::open(path)?);
    Ok(bincode::deserialize_from(reader)?)
}

impl ProcessedDataset {
    /// Write the arrays and manifest into `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<(), PreprocessError> {
        fs::create_dir_all(dir)?;

        write_bin(&dir.join(X_TRAIN_FILE), &self.x_train)?;
        write_bin(&dir.join(Y_TRAIN_FILE), &self.y_train)?;
        write_bin(&dir.join(X_TEST_FILE), &self.x_test)?;
        write_bin(&dir.join(Y_TEST_FILE), &self.y_test)?;
        fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&self.manifest)?,
        )?;

        tracing::info!("Saved dataset to {}", dir.display());
        Ok(())
    }

    /// Read a dataset previously written with [`ProcessedDataset::save`].
    pub fn load(dir: &Path) -> Result<Self, PreprocessError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(PreprocessError::MissingDirectory(manifest_path));
        }
        let manifest: DatasetManifest = serde_json::from_str(&fs::read_to_string(&manifest_path)?)?;

        let dataset = Self {
            manifest,
            x_train: read_bin(&dir.join(X_TRAIN_FILE))?,
            y_train: read_bin(&dir.join(Y_TRAIN_FILE))?,
            x_test: read_bin(&dir.join(X_TEST_FILE))?,
            y_test: read_bin(&dir.join(Y_TEST_FILE))?,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    fn validate(&self) -> Result<(), PreprocessError> {
        self.x_train.check()?;
        self.x_test.check()?;

        if self.x_train.len() != self.y_train.len() || self.x_test.len() != self.y_test.len() {
            return Err(PreprocessError::Shape(format!(
                "features/labels disagree: train {}/{}, test {}/{}",
                self.x_train.len(),
                self.y_train.len(),
                self.x_test.len(),
                self.y_test.len()
            )));
        }

        let size = self.manifest.image_size;
        if self.x_train.shape[2] != size || self.x_test.shape[2] != size {
            return Err(PreprocessError::Shape(format!(
                "manifest image size {} does not match arrays",
                size
            )));
        }
        Ok(())
    }

    pub fn variant(&self) -> Variant {
        self.manifest.variant
    }

    pub fn image_size(&self) -> usize {
        self.manifest.image_size
    }
}
