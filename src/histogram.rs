use crate::*;

/// Provides method(s) for computing the similarity score between histograms.
pub trait HistogramExt {
    /// Histogram intersection: sum of elementwise minimums.
    ///
    /// A similarity, not a distance: higher means closer, and two identical
    /// L1-normalized histograms score 1.
    fn intersection(&self, other: &Self) -> f64;

    /// L1 score `1 - ½‖a - b‖₁` (Galvez, Eq 2).
    fn l1_similarity(&self, other: &Self) -> f64;
}

impl HistogramExt for Histogram {
    fn intersection(&self, other: &Self) -> f64 {
        self.iter().zip(other).fold(0., |a, (b, c)| a + b.min(*c))
    }

    fn l1_similarity(&self, other: &Self) -> f64 {
        1. - 0.5
            * (self
                .iter()
                .zip(other)
                .fold(0., |a, (b, c)| a + (b - c).abs()))
    }
}

/// L1-normalized word-occurrence histogram of a word map over a vocabulary of `words` entries.
pub fn compute_histogram(word_map: &WordMap, words: usize) -> BowResult<Histogram> {
    if word_map.is_empty() {
        return Err(BowErr::EmptyWordMap);
    }
    let mut h: Histogram = vec![0.; words];
    for &w in word_map.words() {
        match h.get_mut(w as usize) {
            Some(bin) => *bin += 1.,
            None => {
                return Err(BowErr::WordOutOfRange {
                    word: w as usize,
                    k: words,
                })
            }
        }
    }

    // L1 normalize; every cell added exactly one count
    let sum = word_map.words().len() as f64;
    for bin in h.iter_mut() {
        *bin /= sum;
    }
    Ok(h)
}
