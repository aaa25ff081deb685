use std::path::PathBuf;
use thiserror::Error;

/// Convolution kernels (Gaussian, Laplacian-of-Gaussian, derivatives) and
/// the correlation routine used to apply them.
pub mod kernel;
pub use kernel::{Axis, Kernel};

/// sRGB to CIE L*a*b* conversion.
pub mod color;

/// The fixed multi-scale filter bank and per-pixel response extraction.
pub mod filterbank;
pub use filterbank::{FilterBank, FilterBankParams, ResponseMatrix};

/// Lloyd's k-means over filter responses.
pub mod kmeans;

/// Implementation of the visual dictionary, which provides the main
/// functionality of this crate: learning visual words and quantizing
/// responses into word maps.
pub mod dictionary;
pub use dictionary::{DictionaryParams, VisualDictionary, WordMap};

/// Word-occurrence histograms.
pub mod histogram;
pub use histogram::{compute_histogram, HistogramExt};

/// Histogram-intersection k-nearest-neighbour classification.
pub mod classifier;
pub use classifier::{Classifier, ClassifierParams, ConfusionMatrix, LabeledHistogramSet};

/// Batch orchestration over image lists: parallel per-image work with
/// per-item failure isolation.
pub mod pipeline;

/// Image/label list files and on-disk persistence helpers.
pub mod io;

/// Scoped elapsed-time measurement.
pub mod timer;
pub use timer::Stopwatch;

/// Bag-of-visual-words histogram of an image.
///
/// Index: visual word id in the dictionary.
///
/// Value: fraction of the image's pixels assigned to that word.
pub type Histogram = Vec<f64>;

/// Build the random source used by dictionary construction.
///
/// A fixed seed gives reproducible dictionaries; `None` draws from system entropy.
pub fn seeded_rng(seed: Option<u64>) -> rand::rngs::StdRng {
    use rand::SeedableRng;
    match seed {
        Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
        None => rand::rngs::StdRng::from_entropy(),
    }
}

pub type BowResult<T> = std::result::Result<T, BowErr>;

#[derive(Error, Debug)]
pub enum BowErr {
    #[error("Io Error")]
    Io(#[from] std::io::Error),
    #[error("Image decode error")]
    Image(#[from] image::ImageError),
    #[cfg(feature = "bincode")]
    #[error("Serialization Error")]
    Bincode(#[from] bincode::Error),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("alpha ({alpha}) exceeds the pixel count of the image ({pixels})")]
    AlphaTooLarge { alpha: usize, pixels: usize },
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Word id {word} outside of vocabulary of size {k}")]
    WordOutOfRange { word: usize, k: usize },
    #[error("Cannot compute a histogram of an empty word map")]
    EmptyWordMap,
    #[error("Clustering input has zero variance")]
    DegenerateSamples,
    #[error("Matrix is empty")]
    EmptyMatrix,
    #[error("Matrix rows have different lengths")]
    RaggedMatrix,
    #[error("{histograms} histograms but {labels} labels")]
    LabelCountMismatch { histograms: usize, labels: usize },
    #[error("{paths} image paths but {labels} labels")]
    PathCountMismatch { paths: usize, labels: usize },
    #[error("Training row {row} has no label ({labels} labels)")]
    RowOutOfRange { row: usize, labels: usize },
    #[error("No training histograms to compare against")]
    NoNeighbours,
    #[error("Failed to process image {path:?}")]
    ImageFailed {
        path: PathBuf,
        #[source]
        source: Box<BowErr>,
    },
    #[error("No images were successfully processed during {operation}")]
    NoImagesProcessed { operation: &'static str },
    #[error("Could not parse line {line} of {path:?}")]
    ListParse { path: PathBuf, line: usize },
}

impl BowErr {
    /// Errors caused by inconsistent parameters rather than by one bad input.
    ///
    /// Batch processing aborts on these instead of skipping the item.
    pub fn is_configuration(&self) -> bool {
        match self {
            BowErr::InvalidParameter(_)
            | BowErr::AlphaTooLarge { .. }
            | BowErr::DimensionMismatch { .. } => true,
            BowErr::ImageFailed { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}
