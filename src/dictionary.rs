use image::RgbImage;
use log::{debug, info};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::kmeans::{kmeans, nearest_center, KMeansCriteria};
use crate::*;

/// Parameters of dictionary construction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DictionaryParams {
    /// Responses sampled per training image (50 to 150 is typical).
    pub alpha: usize,
    /// Number of visual words K (100 to 300 is typical).
    pub words: usize,
    pub attempts: usize,
    pub epsilon: f64,
    pub max_iterations: usize,
}

impl Default for DictionaryParams {
    fn default() -> Self {
        let criteria = KMeansCriteria::default();
        Self {
            alpha: 50,
            words: 150,
            attempts: criteria.attempts,
            epsilon: criteria.epsilon,
            max_iterations: criteria.max_iterations,
        }
    }
}

impl DictionaryParams {
    pub fn criteria(&self) -> KMeansCriteria {
        KMeansCriteria {
            attempts: self.attempts,
            epsilon: self.epsilon,
            max_iterations: self.max_iterations,
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Clone)]
/// Visual vocabulary learned from filter responses. Can be:
/// 1. Built from training images (or pre-sampled responses).
/// 2. Saved to a file & loaded from a file (requires bincode feature, enabled by default).
/// 3. Used to turn an image into a [`WordMap`] of nearest visual words.
pub struct VisualDictionary {
    centers: Vec<Vec<f64>>,
}

/// Per-pixel visual word ids, row-major, same shape as the source image.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct WordMap {
    width: usize,
    height: usize,
    words: Vec<u32>,
}

/// On-disk layout: the centers under a single named field.
#[cfg(feature = "bincode")]
#[derive(Serialize, Deserialize)]
struct DictionaryFile {
    dictionary: Vec<Vec<f64>>,
}

/// Pick `alpha` distinct rows of `response` uniformly at random.
///
/// A full permutation of the row indices is shuffled and its first `alpha` entries are kept.
pub fn sample_responses<R: Rng>(
    response: &ResponseMatrix,
    alpha: usize,
    rng: &mut R,
) -> BowResult<Vec<Vec<f64>>> {
    if alpha > response.rows() {
        return Err(BowErr::AlphaTooLarge {
            alpha,
            pixels: response.rows(),
        });
    }
    let mut order: Vec<usize> = (0..response.rows()).collect();
    order.shuffle(rng);
    Ok(order[..alpha]
        .iter()
        .map(|&i| response.row(i).to_vec())
        .collect())
}

/// Dictionary API
impl VisualDictionary {
    /// Build a dictionary from training images.
    ///
    /// `alpha` responses are sampled from every image, then the pooled
    /// samples are clustered into `params.words` centers. Images are
    /// filtered in parallel; every image gets its own generator seeded
    /// from `rng`, so a seeded `rng` gives a reproducible dictionary.
    pub fn build<R: Rng>(
        params: &DictionaryParams,
        filterbank: &FilterBank,
        images: &[RgbImage],
        rng: &mut R,
    ) -> BowResult<Self> {
        Self::validate(params)?;
        let seeds: Vec<u64> = images.iter().map(|_| rng.gen()).collect();

        let per_image: Vec<Vec<Vec<f64>>> = images
            .par_iter()
            .zip(seeds)
            .map(|(image, seed)| {
                let response = filterbank.filter(image);
                sample_responses(&response, params.alpha, &mut StdRng::seed_from_u64(seed))
            })
            .collect::<BowResult<_>>()?;

        let pool: Vec<Vec<f64>> = per_image.into_iter().flatten().collect();
        Self::from_samples(&pool, params, rng)
    }

    /// Cluster an already assembled sample pool.
    pub fn from_samples<R: Rng>(
        samples: &[Vec<f64>],
        params: &DictionaryParams,
        rng: &mut R,
    ) -> BowResult<Self> {
        Self::validate(params)?;
        info!(
            "Clustering {} sampled responses into {} words",
            samples.len(),
            params.words
        );
        let clustering = kmeans(samples, params.words, &params.criteria(), rng)?;
        Self::from_centers(clustering.centers)
    }

    /// Wrap existing centers, rejecting empty or ragged input.
    pub fn from_centers(centers: Vec<Vec<f64>>) -> BowResult<Self> {
        let dim = centers.first().map(|c| c.len()).unwrap_or(0);
        if dim == 0 {
            return Err(BowErr::EmptyMatrix);
        }
        if centers.iter().any(|c| c.len() != dim) {
            return Err(BowErr::RaggedMatrix);
        }
        Ok(Self { centers })
    }

    /// Number of visual words K.
    pub fn words(&self) -> usize {
        self.centers.len()
    }

    /// Dimension of every center (must equal the filter bank's response dimension).
    pub fn dim(&self) -> usize {
        self.centers[0].len()
    }

    pub fn center(&self, word: usize) -> &[f64] {
        &self.centers[word]
    }

    pub fn centers(&self) -> &[Vec<f64>] {
        &self.centers
    }

    /// Fail if this dictionary was built with a different filter bank layout.
    pub fn check_filter_bank(&self, filterbank: &FilterBank) -> BowResult<()> {
        if filterbank.response_dim() != self.dim() {
            return Err(BowErr::DimensionMismatch {
                expected: self.dim(),
                found: filterbank.response_dim(),
            });
        }
        Ok(())
    }

    /// Id of the word closest (squared Euclidean) to `response`, lowest id on ties.
    pub fn quantize(&self, response: &[f64]) -> BowResult<usize> {
        if response.len() != self.dim() {
            return Err(BowErr::DimensionMismatch {
                expected: self.dim(),
                found: response.len(),
            });
        }
        Ok(nearest_center(response, &self.centers).0)
    }

    /// Quantize every row of `response` and reshape into a `width × height` map.
    pub fn quantize_image(
        &self,
        response: &ResponseMatrix,
        width: usize,
        height: usize,
    ) -> BowResult<WordMap> {
        if response.cols() != self.dim() {
            return Err(BowErr::DimensionMismatch {
                expected: self.dim(),
                found: response.cols(),
            });
        }
        if response.rows() != width * height {
            return Err(BowErr::DimensionMismatch {
                expected: width * height,
                found: response.rows(),
            });
        }
        let words = (0..response.rows())
            .into_par_iter()
            .map(|i| nearest_center(response.row(i), &self.centers).0 as u32)
            .collect();
        WordMap::new(width, height, words)
    }

    /// Filter `image` and map every pixel to its nearest visual word.
    pub fn word_map(&self, image: &RgbImage, filterbank: &FilterBank) -> BowResult<WordMap> {
        self.check_filter_bank(filterbank)?;
        let response = filterbank.filter(image);
        debug!(
            "Quantizing {}x{} image against {} words",
            image.width(),
            image.height(),
            self.words()
        );
        self.quantize_image(&response, image.width() as usize, image.height() as usize)
    }

    /// Load a dictionary from a file
    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> BowResult<Self> {
        let stored: DictionaryFile = io::read_bincode(file)?;
        Self::from_centers(stored.dictionary)
    }

    /// Save dictionary to a file
    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> BowResult<()> {
        io::write_bincode(
            file,
            &DictionaryFile {
                dictionary: self.centers.clone(),
            },
        )
    }

    fn validate(params: &DictionaryParams) -> BowResult<()> {
        if params.alpha == 0 {
            return Err(BowErr::InvalidParameter("alpha must be positive".into()));
        }
        if params.words == 0 {
            return Err(BowErr::InvalidParameter(
                "number of words must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for VisualDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisualDictionary")
            .field("Words", &self.words())
            .field("Dimension", &self.dim())
            .finish()
    }
}

impl WordMap {
    pub fn new(width: usize, height: usize, words: Vec<u32>) -> BowResult<Self> {
        if words.len() != width * height {
            return Err(BowErr::DimensionMismatch {
                expected: width * height,
                found: words.len(),
            });
        }
        Ok(Self {
            width,
            height,
            words,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.words[row * self.width + col]
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> BowResult<Self> {
        let map: Self = io::read_bincode(file)?;
        // re-validate the shape of whatever was on disk
        Self::new(map.width, map.height, map.words)
    }

    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> BowResult<()> {
        io::write_bincode(file, self)
    }
}
