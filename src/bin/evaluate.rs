use argh::FromArgs;
use log::info;
use std::path::PathBuf;

use texton_bow::io;
use texton_bow::pipeline::{self, FsImageSource};
use texton_bow::{
    Classifier, ClassifierParams, FilterBank, LabeledHistogramSet, Stopwatch, VisualDictionary,
};

#[derive(FromArgs)]
/// Classify a test set against the training histograms and report the confusion matrix
struct Args {
    /// text file with the relative paths of all test images
    #[argh(positional)]
    test_set: PathBuf,

    /// real labels of the test images (default: test_label.txt)
    #[argh(option, default = "PathBuf::from(\"test_label.txt\")")]
    test_labels: PathBuf,

    /// labels of the training images (default: training_label.txt)
    #[argh(option, default = "PathBuf::from(\"training_label.txt\")")]
    training_labels: PathBuf,

    /// training histogram file (default: histograms.bin)
    #[argh(option, default = "PathBuf::from(\"histograms.bin\")")]
    histograms: PathBuf,

    /// dictionary file (default: dictionary/dictionary.bin)
    #[argh(option, default = "PathBuf::from(\"dictionary/dictionary.bin\")")]
    dictionary: PathBuf,

    /// directory the image paths are relative to (default: images)
    #[argh(option, default = "PathBuf::from(\"images\")")]
    images: PathBuf,

    /// number of voting neighbours (default: 5)
    #[argh(option, short = 'k', default = "5")]
    neighbours: usize,

    /// worker threads (default: one per core)
    #[argh(option)]
    threads: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Args = argh::from_env();

    let paths = io::read_path_list(&args.test_set)?;
    let labels = io::read_label_list(&args.test_labels)?;
    let training_labels = io::read_label_list(&args.training_labels)?;
    let stored = io::load_histograms(&args.histograms)?;
    let set = LabeledHistogramSet::from_rows(stored.histograms, &stored.rows, &training_labels)?;

    // must match the filter bank used during training
    let filterbank = FilterBank::default();
    let dictionary = VisualDictionary::load(&args.dictionary)?;
    dictionary.check_filter_bank(&filterbank)?;
    info!("Dictionary: {:?}", dictionary);

    let classifier = Classifier::new(
        set,
        ClassifierParams {
            neighbours: args.neighbours,
        },
    );
    let watch = Stopwatch::start();
    let cm = pipeline::evaluate(
        &paths,
        &labels,
        &FsImageSource::new(&args.images),
        &dictionary,
        &filterbank,
        &classifier,
        args.threads,
    )?;
    info!("Elapsed time(ms): {}", watch.elapsed_ms());

    println!("Evaluation result (k = {})", args.neighbours);
    println!("Confusion matrix:\n{}", cm);
    if let Some(accuracy) = cm.accuracy() {
        println!("Accuracy: {}", accuracy);
    }
    Ok(())
}
