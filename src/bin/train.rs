use argh::FromArgs;
use log::info;
use std::path::PathBuf;

use texton_bow::io::{self, HistogramFile};
use texton_bow::pipeline::{self, FsImageSource, TrainConfig};
use texton_bow::{DictionaryParams, FilterBankParams};

#[derive(FromArgs)]
/// Build the visual dictionary, word maps and histograms of a training set
struct Args {
    /// text file with the relative paths of all training images
    #[argh(positional)]
    training_set: PathBuf,

    /// directory the image paths are relative to (default: images)
    #[argh(option, default = "PathBuf::from(\"images\")")]
    images: PathBuf,

    /// directory receiving one word map per image (default: wordmaps)
    #[argh(option, default = "PathBuf::from(\"wordmaps\")")]
    wordmaps: PathBuf,

    /// output dictionary file (default: dictionary/dictionary.bin)
    #[argh(option, default = "PathBuf::from(\"dictionary/dictionary.bin\")")]
    dictionary: PathBuf,

    /// output histogram file (default: histograms.bin)
    #[argh(option, default = "PathBuf::from(\"histograms.bin\")")]
    histograms: PathBuf,

    /// responses sampled per image (default: 50)
    #[argh(option, default = "50")]
    alpha: usize,

    /// number of visual words (default: 150)
    #[argh(option, default = "150")]
    words: usize,

    /// seed for sampling and clustering
    #[argh(option)]
    seed: Option<u64>,

    /// worker threads (default: one per core)
    #[argh(option)]
    threads: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Args = argh::from_env();

    let paths = io::read_path_list(&args.training_set)?;
    info!("Read {} training image paths", paths.len());

    let config = TrainConfig {
        filterbank: FilterBankParams::default(),
        dictionary: DictionaryParams {
            alpha: args.alpha,
            words: args.words,
            ..DictionaryParams::default()
        },
        threads: args.threads,
        seed: args.seed,
    };
    let output = pipeline::train(&paths, &FsImageSource::new(&args.images), &config)?;

    output.dictionary.save(&args.dictionary)?;
    for image in &output.images {
        image
            .value
            .word_map
            .save(io::wordmap_path(&args.wordmaps, &image.path))?;
    }
    io::save_histograms(
        &args.histograms,
        &HistogramFile {
            rows: output.rows(),
            histograms: output.histograms(),
        },
    )?;
    info!(
        "Saved {} of {} training histograms to {:?}",
        output.images.len(),
        paths.len(),
        args.histograms
    );
    Ok(())
}
