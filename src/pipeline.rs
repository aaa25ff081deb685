use image::RgbImage;
use log::{info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::dictionary::sample_responses;
use crate::*;

/// Where training and test images come from.
pub trait ImageSource: Sync {
    fn load(&self, path: &Path) -> BowResult<RgbImage>;
}

/// Decode images from disk, resolving list entries relative to `root`.
#[derive(Debug, Clone, Default)]
pub struct FsImageSource {
    root: PathBuf,
}

impl FsImageSource {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

impl ImageSource for FsImageSource {
    fn load(&self, path: &Path) -> BowResult<RgbImage> {
        Ok(image::open(self.root.join(path))?.to_rgb8())
    }
}

/// Everything needed to train a dictionary and the training histograms.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TrainConfig {
    pub filterbank: FilterBankParams,
    pub dictionary: DictionaryParams,
    /// Worker threads for per-image work; `None` uses the global rayon pool.
    pub threads: Option<usize>,
    /// Seed for sampling and clustering; `None` draws from system entropy.
    pub seed: Option<u64>,
}

/// One successfully processed item of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Processed<T> {
    /// Position of the item in the input list.
    pub index: usize,
    pub path: PathBuf,
    pub value: T,
}

/// Word map and histogram of one training image.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedImage {
    pub word_map: WordMap,
    pub histogram: Histogram,
}

/// Result of [`train`].
#[derive(Debug, Clone)]
pub struct TrainOutput {
    pub filterbank: FilterBank,
    pub dictionary: VisualDictionary,
    /// Processed training images in input order; failed images are absent.
    pub images: Vec<Processed<TrainedImage>>,
}

impl TrainOutput {
    /// Training-list positions of the rows of [`TrainOutput::histograms`].
    pub fn rows(&self) -> Vec<usize> {
        self.images.iter().map(|p| p.index).collect()
    }

    /// Histogram matrix, row `i` belonging to `rows()[i]`.
    pub fn histograms(&self) -> Vec<Histogram> {
        self.images.iter().map(|p| p.value.histogram.clone()).collect()
    }
}

/// Run `f` on a dedicated pool of `threads` workers, or on the global pool for `None`.
pub fn with_pool<T, F>(threads: Option<usize>, f: F) -> BowResult<T>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    match threads {
        None => Ok(f()),
        Some(0) => Err(BowErr::InvalidParameter(
            "thread count must be > 0".into(),
        )),
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| BowErr::InvalidParameter(e.to_string()))?;
            Ok(pool.install(f))
        }
    }
}

/// Apply `f` to every path in parallel.
///
/// Results keep the input order; each failure is wrapped with the offending path.
pub fn map_images<T, F>(paths: &[PathBuf], f: F) -> Vec<BowResult<T>>
where
    T: Send,
    F: Fn(usize, &Path) -> BowResult<T> + Sync,
{
    paths
        .par_iter()
        .enumerate()
        .map(|(i, path)| {
            f(i, path.as_path()).map_err(|e| BowErr::ImageFailed {
                path: path.clone(),
                source: Box::new(e),
            })
        })
        .collect()
}

/// Keep the successful items of a batch.
///
/// Failed items are logged and skipped. A configuration error aborts the
/// batch, as does a batch in which nothing succeeded.
pub fn collect_successes<T>(
    paths: &[PathBuf],
    results: Vec<BowResult<T>>,
    operation: &'static str,
) -> BowResult<Vec<Processed<T>>> {
    let mut processed = Vec::with_capacity(results.len());
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(value) => processed.push(Processed {
                index,
                path: paths[index].clone(),
                value,
            }),
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => warn!(
                "Skipping {:?} during {}: {}",
                paths[index],
                operation,
                source_chain(&e)
            ),
        }
    }
    if processed.is_empty() {
        return Err(BowErr::NoImagesProcessed { operation });
    }
    Ok(processed)
}

/// Build the dictionary, word maps and histograms of a training list.
///
/// Every image is loaded once. Responses are sampled from every image
/// before clustering starts. Word maps are then computed in parallel from
/// the decoded images that sampled successfully; histograms are assembled
/// afterwards in list order.
pub fn train<S: ImageSource>(
    paths: &[PathBuf],
    source: &S,
    config: &TrainConfig,
) -> BowResult<TrainOutput> {
    let filterbank = FilterBank::new(&config.filterbank)?;
    info!("Filter bank: {:?}", filterbank);
    let mut rng = seeded_rng(config.seed);
    let seeds: Vec<u64> = paths.iter().map(|_| rng.gen()).collect();
    let alpha = config.dictionary.alpha;

    info!("Computing dictionary from {} images ...", paths.len());
    let watch = Stopwatch::start();
    let sampled = with_pool(config.threads, || {
        map_images(paths, |i, path| {
            let image = source.load(path)?;
            let response = filterbank.filter(&image);
            let samples =
                sample_responses(&response, alpha, &mut StdRng::seed_from_u64(seeds[i]))?;
            Ok((image, samples))
        })
    })?;
    let sampled = collect_successes(paths, sampled, "response sampling")?;
    let mut pool = Vec::with_capacity(sampled.len() * alpha);
    let mut decoded = Vec::with_capacity(sampled.len());
    for p in sampled {
        let (image, samples) = p.value;
        pool.extend(samples);
        decoded.push(Processed {
            index: p.index,
            path: p.path,
            value: image,
        });
    }
    let dictionary = VisualDictionary::from_samples(&pool, &config.dictionary, &mut rng)?;
    info!("Elapsed time(ms): {}", watch.elapsed_ms());

    // decoded images are kept; their responses are recomputed
    info!("Building word maps ...");
    let watch = Stopwatch::start();
    let maps = with_pool(config.threads, || {
        decoded
            .into_par_iter()
            .map(|p| -> BowResult<Processed<WordMap>> {
                let word_map = dictionary.word_map(&p.value, &filterbank)?;
                Ok(Processed {
                    index: p.index,
                    path: p.path,
                    value: word_map,
                })
            })
            .collect::<BowResult<Vec<_>>>()
    })??;
    info!("Elapsed time(ms): {}", watch.elapsed_ms());

    info!("Creating histograms ...");
    let watch = Stopwatch::start();
    let mut images = Vec::with_capacity(maps.len());
    for map in maps {
        let histogram = compute_histogram(&map.value, dictionary.words())?;
        images.push(Processed {
            index: map.index,
            path: map.path,
            value: TrainedImage {
                word_map: map.value,
                histogram,
            },
        });
    }
    info!("Elapsed time(ms): {}", watch.elapsed_ms());

    Ok(TrainOutput {
        filterbank,
        dictionary,
        images,
    })
}

/// Histogram of every test image, computed in parallel. Failed images are skipped.
pub fn query_histograms<S: ImageSource>(
    paths: &[PathBuf],
    source: &S,
    dictionary: &VisualDictionary,
    filterbank: &FilterBank,
    threads: Option<usize>,
) -> BowResult<Vec<Processed<Histogram>>> {
    dictionary.check_filter_bank(filterbank)?;
    let results = with_pool(threads, || {
        map_images(paths, |_, path| {
            let image = source.load(path)?;
            let map = dictionary.word_map(&image, filterbank)?;
            compute_histogram(&map, dictionary.words())
        })
    })?;
    collect_successes(paths, results, "evaluation")
}

/// Classify every test image and tabulate predictions against `labels`.
///
/// `labels[i]` is the real class of `paths[i]`.
pub fn evaluate<S: ImageSource>(
    paths: &[PathBuf],
    labels: &[usize],
    source: &S,
    dictionary: &VisualDictionary,
    filterbank: &FilterBank,
    classifier: &Classifier,
    threads: Option<usize>,
) -> BowResult<ConfusionMatrix> {
    if labels.len() != paths.len() {
        return Err(BowErr::PathCountMismatch {
            paths: paths.len(),
            labels: labels.len(),
        });
    }
    let histograms = query_histograms(paths, source, dictionary, filterbank, threads)?;
    info!(
        "Classifying {} of {} test images",
        histograms.len(),
        paths.len()
    );
    classifier.evaluate(histograms.iter().map(|p| (&p.value, labels[p.index])))
}

fn source_chain(e: &BowErr) -> String {
    let mut msg = e.to_string();
    let mut current: &dyn std::error::Error = e;
    while let Some(next) = current.source() {
        msg.push_str(": ");
        msg.push_str(&next.to_string());
        current = next;
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory image source; unknown paths fail like unreadable files.
    struct MemorySource(HashMap<PathBuf, RgbImage>);

    impl ImageSource for MemorySource {
        fn load(&self, path: &Path) -> BowResult<RgbImage> {
            self.0.get(path).cloned().ok_or_else(|| {
                BowErr::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    path.display().to_string(),
                ))
            })
        }
    }

    /// Records how often every path is requested.
    struct CountingSource {
        inner: MemorySource,
        loads: Mutex<HashMap<PathBuf, usize>>,
    }

    impl ImageSource for CountingSource {
        fn load(&self, path: &Path) -> BowResult<RgbImage> {
            *self
                .loads
                .lock()
                .unwrap()
                .entry(path.to_path_buf())
                .or_insert(0) += 1;
            self.inner.load(path)
        }
    }

    fn config() -> TrainConfig {
        TrainConfig {
            filterbank: FilterBankParams {
                scales: vec![0.],
                gaussian_sigmas: vec![0.5],
                log_sigmas: vec![0.5],
                dgaussian_sigmas: vec![],
            },
            dictionary: DictionaryParams {
                alpha: 8,
                words: 2,
                ..DictionaryParams::default()
            },
            threads: Some(2),
            seed: Some(17),
        }
    }

    fn source() -> (Vec<PathBuf>, MemorySource) {
        let mut images = HashMap::new();
        images.insert(
            PathBuf::from("red.png"),
            RgbImage::from_pixel(4, 4, Rgb([240, 20, 20])),
        );
        images.insert(
            PathBuf::from("blue.png"),
            RgbImage::from_pixel(5, 3, Rgb([20, 20, 240])),
        );
        let paths = vec![
            PathBuf::from("red.png"),
            PathBuf::from("missing.png"),
            PathBuf::from("blue.png"),
        ];
        (paths, MemorySource(images))
    }

    #[test]
    fn test_map_images_keeps_order_and_wraps_errors() {
        let paths: Vec<PathBuf> = (0..20)
            .map(|i| PathBuf::from(format!("{}.png", i)))
            .collect();
        let results = map_images(&paths, |i, _| {
            if i % 7 == 3 {
                Err(BowErr::EmptyWordMap)
            } else {
                Ok(i * 10)
            }
        });
        for (i, r) in results.iter().enumerate() {
            match r {
                Ok(v) => assert_eq!(*v, i * 10),
                Err(BowErr::ImageFailed { path, .. }) => assert_eq!(path, &paths[i]),
                Err(e) => panic!("unexpected error {}", e),
            }
        }
    }

    #[test]
    fn test_collect_successes_policy() {
        let paths = vec![PathBuf::from("a"), PathBuf::from("b")];
        let results = vec![Err(BowErr::EmptyWordMap), Ok(1)];
        let ok = collect_successes(&paths, results, "test").unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!((ok[0].index, ok[0].value), (1, 1));

        let none: Vec<BowResult<u8>> = vec![Err(BowErr::EmptyWordMap), Err(BowErr::NoNeighbours)];
        assert!(matches!(
            collect_successes(&paths, none, "test"),
            Err(BowErr::NoImagesProcessed { operation: "test" })
        ));

        let fatal: Vec<BowResult<u8>> =
            vec![Ok(1), Err(BowErr::AlphaTooLarge { alpha: 9, pixels: 4 })];
        assert!(matches!(
            collect_successes(&paths, fatal, "test"),
            Err(BowErr::AlphaTooLarge { .. })
        ));
        assert!(collect_successes::<u8>(&[], vec![], "test").is_err());
    }

    #[test]
    fn test_with_pool() {
        assert_eq!(with_pool(None, || 3).unwrap(), 3);
        assert_eq!(with_pool(Some(2), rayon::current_num_threads).unwrap(), 2);
        assert!(with_pool(Some(0), || ()).is_err());
    }

    #[test]
    fn test_train_skips_missing_images() {
        let (paths, source) = source();
        let output = train(&paths, &source, &config()).unwrap();
        assert_eq!(output.dictionary.words(), 2);
        assert_eq!(output.rows(), vec![0, 2]);

        let histograms = output.histograms();
        assert_eq!(histograms.len(), 2);
        for h in &histograms {
            assert_eq!(h.len(), 2);
            assert!((h.iter().sum::<f64>() - 1.).abs() < 1e-12);
        }
        // one solid colour per image, one word per colour
        assert_ne!(histograms[0], histograms[1]);
        assert_eq!(output.images[1].value.word_map.width(), 5);
    }

    #[test]
    fn test_train_loads_each_image_once() {
        let (paths, inner) = source();
        let source = CountingSource {
            inner,
            loads: Mutex::new(HashMap::new()),
        };
        let output = train(&paths, &source, &config()).unwrap();
        assert_eq!(output.rows(), vec![0, 2]);
        let loads = source.loads.lock().unwrap();
        for path in &paths {
            assert_eq!(loads.get(path), Some(&1), "{:?}", path);
        }
    }

    #[test]
    fn test_train_is_reproducible() {
        let (paths, source) = source();
        let a = train(&paths, &source, &config()).unwrap();
        let b = train(&paths, &source, &config()).unwrap();
        assert_eq!(a.dictionary, b.dictionary);
        assert_eq!(a.histograms(), b.histograms());
    }

    #[test]
    fn test_train_alpha_too_large_is_fatal() {
        let (paths, source) = source();
        let mut config = config();
        config.dictionary.alpha = 16;
        let err = train(&paths, &source, &config).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_train_nothing_readable() {
        let source = MemorySource(HashMap::new());
        let paths = vec![PathBuf::from("a.png")];
        assert!(matches!(
            train(&paths, &source, &config()),
            Err(BowErr::NoImagesProcessed { .. })
        ));
    }

    #[test]
    fn test_evaluate() {
        let (paths, source) = source();
        let output = train(&paths, &source, &config()).unwrap();
        let training_labels = vec![0, 7, 1];
        let set =
            LabeledHistogramSet::from_rows(output.histograms(), &output.rows(), &training_labels)
                .unwrap();
        let classifier = Classifier::new(set, ClassifierParams { neighbours: 1 });

        let test_paths = vec![
            PathBuf::from("blue.png"),
            PathBuf::from("red.png"),
            PathBuf::from("gone.png"),
        ];
        let cm = evaluate(
            &test_paths,
            &[1, 0, 0],
            &source,
            &output.dictionary,
            &output.filterbank,
            &classifier,
            None,
        )
        .unwrap();
        assert_eq!(cm.total(), 2);
        assert_eq!(cm.accuracy(), Some(1.));

        assert!(matches!(
            evaluate(
                &test_paths,
                &[1],
                &source,
                &output.dictionary,
                &output.filterbank,
                &classifier,
                None
            ),
            Err(BowErr::PathCountMismatch { paths: 3, labels: 1 })
        ));
    }
}
