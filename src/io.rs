use std::path::{Path, PathBuf};

use crate::*;

/// Extension of stored word maps.
pub const WORDMAP_EXTENSION: &str = "wmap";

/// Read a whitespace separated list of image paths.
pub fn read_path_list<P: AsRef<Path>>(file: P) -> BowResult<Vec<PathBuf>> {
    let text = std::fs::read_to_string(file)?;
    Ok(text.split_whitespace().map(PathBuf::from).collect())
}

/// Read a whitespace separated list of integer class labels.
pub fn read_label_list<P: AsRef<Path>>(file: P) -> BowResult<Vec<usize>> {
    let path = file.as_ref();
    let text = std::fs::read_to_string(path)?;
    let mut labels = Vec::new();
    for (i, line) in text.lines().enumerate() {
        for token in line.split_whitespace() {
            let label = token.parse().map_err(|_| BowErr::ListParse {
                path: path.to_path_buf(),
                line: i + 1,
            })?;
            labels.push(label);
        }
    }
    Ok(labels)
}

/// Location of the word map of `image` under `target_dir`: the image path with its
/// extension replaced.
pub fn wordmap_path<P: AsRef<Path>, Q: AsRef<Path>>(target_dir: P, image: Q) -> PathBuf {
    target_dir
        .as_ref()
        .join(image)
        .with_extension(WORDMAP_EXTENSION)
}

#[cfg(feature = "bincode")]
pub(crate) fn read_bincode<T, P>(file: P) -> BowResult<T>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<Path>,
{
    let mut file = std::fs::File::open(file)?;
    let mut buffer: Vec<u8> = Vec::new();
    std::io::Read::read_to_end(&mut file, &mut buffer)?;
    Ok(bincode::deserialize(&buffer)?)
}

#[cfg(feature = "bincode")]
pub(crate) fn write_bincode<T, P>(file: P, value: &T) -> BowResult<()>
where
    T: serde::Serialize,
    P: AsRef<Path>,
{
    let serialized = bincode::serialize(value)?;
    if let Some(parent) = file.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(file)?;
    std::io::Write::write_all(&mut file, &serialized)?;
    Ok(())
}

/// Training histograms as stored on disk: one row per successfully processed
/// image, with the position of that image in the training list.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct HistogramFile {
    pub rows: Vec<usize>,
    pub histograms: Vec<Histogram>,
}

/// Save the training histogram matrix.
#[cfg(feature = "bincode")]
pub fn save_histograms<P: AsRef<Path>>(file: P, stored: &HistogramFile) -> BowResult<()> {
    write_bincode(file, stored)
}

/// Load a histogram matrix, rejecting empty or ragged data.
#[cfg(feature = "bincode")]
pub fn load_histograms<P: AsRef<Path>>(file: P) -> BowResult<HistogramFile> {
    let stored: HistogramFile = read_bincode(file)?;
    let words = stored.histograms.first().map(|h| h.len()).unwrap_or(0);
    if words == 0 {
        return Err(BowErr::EmptyMatrix);
    }
    if stored.histograms.iter().any(|h| h.len() != words) {
        return Err(BowErr::RaggedMatrix);
    }
    if stored.rows.len() != stored.histograms.len() {
        return Err(BowErr::DimensionMismatch {
            expected: stored.histograms.len(),
            found: stored.rows.len(),
        });
    }
    Ok(stored)
}
