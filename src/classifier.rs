use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::*;

/// Parameters of k-nearest-neighbour classification.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierParams {
    /// Number of neighbours that vote.
    pub neighbours: usize,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self { neighbours: 5 }
    }
}

/// Training histograms and their class labels, row `i` labelled `labels[i]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LabeledHistogramSet {
    histograms: Vec<Histogram>,
    labels: Vec<usize>,
}

impl LabeledHistogramSet {
    pub fn new(histograms: Vec<Histogram>, labels: Vec<usize>) -> BowResult<Self> {
        if histograms.len() != labels.len() {
            return Err(BowErr::LabelCountMismatch {
                histograms: histograms.len(),
                labels: labels.len(),
            });
        }
        if let Some(first) = histograms.first() {
            if histograms.iter().any(|h| h.len() != first.len()) {
                return Err(BowErr::RaggedMatrix);
            }
        }
        Ok(Self { histograms, labels })
    }

    /// Pair `histograms` with the labels of the training-list rows they came from.
    pub fn from_rows(
        histograms: Vec<Histogram>,
        rows: &[usize],
        labels: &[usize],
    ) -> BowResult<Self> {
        let picked = rows
            .iter()
            .map(|&r| {
                labels.get(r).copied().ok_or(BowErr::RowOutOfRange {
                    row: r,
                    labels: labels.len(),
                })
            })
            .collect::<BowResult<Vec<usize>>>()?;
        Self::new(histograms, picked)
    }

    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }

    /// Histogram length (vocabulary size), 0 for an empty set.
    pub fn words(&self) -> usize {
        self.histograms.first().map(|h| h.len()).unwrap_or(0)
    }

    pub fn histograms(&self) -> &[Histogram] {
        &self.histograms
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Intersection similarity of `sample` against every training histogram, in row order.
    pub fn similarities(&self, sample: &Histogram) -> Vec<f64> {
        self.histograms
            .iter()
            .map(|h| sample.intersection(h))
            .collect()
    }

    /// Predict the label of `sample` by majority vote of its `k` most similar rows.
    ///
    /// Rows with equal similarity keep their training order. Equal vote
    /// counts go to the lowest label. `k` is capped at the set size.
    pub fn classify(&self, sample: &Histogram, k: usize) -> BowResult<usize> {
        if k == 0 {
            return Err(BowErr::InvalidParameter(
                "number of neighbours must be positive".into(),
            ));
        }
        if self.is_empty() {
            return Err(BowErr::NoNeighbours);
        }
        if sample.len() != self.words() {
            return Err(BowErr::DimensionMismatch {
                expected: self.words(),
                found: sample.len(),
            });
        }

        let scores = self.similarities(sample);
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

        let mut votes = BTreeMap::new();
        for &i in order.iter().take(k) {
            *votes.entry(self.labels[i]).or_insert(0usize) += 1;
        }

        // increasing label order, first maximum wins
        let mut best = (0, 0);
        for (&label, &count) in &votes {
            if count > best.1 {
                best = (label, count);
            }
        }
        Ok(best.0)
    }
}

/// A training set together with its classification parameters.
#[derive(Debug, Clone)]
pub struct Classifier {
    set: LabeledHistogramSet,
    params: ClassifierParams,
}

impl Classifier {
    pub fn new(set: LabeledHistogramSet, params: ClassifierParams) -> Self {
        Self { set, params }
    }

    pub fn set(&self) -> &LabeledHistogramSet {
        &self.set
    }

    pub fn predict(&self, sample: &Histogram) -> BowResult<usize> {
        self.set.classify(sample, self.params.neighbours)
    }

    /// Classify `(histogram, real label)` pairs and tabulate the outcome.
    pub fn evaluate<'a, I>(&self, samples: I) -> BowResult<ConfusionMatrix>
    where
        I: IntoIterator<Item = (&'a Histogram, usize)>,
    {
        let mut cm = ConfusionMatrix::new(self.set.labels().iter().copied());
        for (h, real) in samples {
            cm.record(real, self.predict(h)?);
        }
        Ok(cm)
    }
}

/// Counts of `(real label, predicted label)` pairs.
///
/// Rows and columns are the distinct labels seen so far, in increasing order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    labels: BTreeSet<usize>,
    counts: BTreeMap<(usize, usize), u64>,
}

impl ConfusionMatrix {
    /// Empty matrix whose rows and columns already include `labels`.
    pub fn new<I: IntoIterator<Item = usize>>(labels: I) -> Self {
        Self {
            labels: labels.into_iter().collect(),
            counts: BTreeMap::new(),
        }
    }

    /// Number of classes (rows and columns).
    pub fn classes(&self) -> usize {
        self.labels.len()
    }

    /// Class labels in row/column order.
    pub fn labels(&self) -> impl Iterator<Item = usize> + '_ {
        self.labels.iter().copied()
    }

    /// Add one observation. Unseen labels become new rows and columns.
    pub fn record(&mut self, real: usize, predicted: usize) {
        self.labels.insert(real);
        self.labels.insert(predicted);
        *self.counts.entry((real, predicted)).or_insert(0) += 1;
    }

    pub fn get(&self, real: usize, predicted: usize) -> u64 {
        self.counts.get(&(real, predicted)).copied().unwrap_or(0)
    }

    /// Correct predictions.
    pub fn trace(&self) -> u64 {
        self.counts
            .iter()
            .filter(|((real, predicted), _)| real == predicted)
            .map(|(_, &c)| c)
            .sum()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// `trace / total`, or `None` before anything was recorded.
    pub fn accuracy(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.trace() as f64 / total as f64),
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .values()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(1);
        write!(f, "[")?;
        for (i, real) in self.labels().enumerate() {
            if i > 0 {
                write!(f, ";\n ")?;
            }
            let cells: Vec<String> = self
                .labels()
                .map(|predicted| format!("{:>w$}", self.get(real, predicted), w = width))
                .collect();
            write!(f, "{}", cells.join(", "))?;
        }
        write!(f, "]")
    }
}
