use log::{debug, info};
use rand::{seq::index, Rng};
use rayon::prelude::*;

use crate::*;

/// Termination settings for [`kmeans`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansCriteria {
    /// Number of independent restarts; the most compact result wins.
    pub attempts: usize,
    /// Stop once no center moves further than this (Euclidean).
    pub epsilon: f64,
    pub max_iterations: usize,
}

impl Default for KMeansCriteria {
    fn default() -> Self {
        Self {
            attempts: 3,
            epsilon: 0.01,
            max_iterations: 100,
        }
    }
}

/// Outcome of a k-means run.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    pub centers: Vec<Vec<f64>>,
    /// Cluster of every sample.
    pub labels: Vec<usize>,
    /// Sum of squared distances from every sample to its center.
    pub compactness: f64,
}

/// Squared Euclidean distance. Both slices must have the same length.
#[inline]
pub fn squared_distance(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    x.iter().zip(y).fold(0., |a, (b, c)| a + (b - c) * (b - c))
}

/// Index of the closest center, the lowest index winning ties.
#[inline]
pub fn nearest_center(sample: &[f64], centers: &[Vec<f64>]) -> (usize, f64) {
    let mut best: (usize, f64) = (0, f64::INFINITY);
    for (j, c) in centers.iter().enumerate() {
        let d = squared_distance(sample, c);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

/// Cluster `samples` into `k` groups with Lloyd's algorithm.
///
/// Every attempt starts from `k` distinct samples picked at random.
pub fn kmeans<R: Rng>(
    samples: &[Vec<f64>],
    k: usize,
    criteria: &KMeansCriteria,
    rng: &mut R,
) -> BowResult<Clustering> {
    if k == 0 {
        return Err(BowErr::InvalidParameter("k must be positive".into()));
    }
    if samples.len() < k {
        return Err(BowErr::InvalidParameter(format!(
            "cannot form {} clusters from {} samples",
            k,
            samples.len()
        )));
    }
    let dim = samples[0].len();
    if samples.iter().any(|s| s.len() != dim) {
        return Err(BowErr::RaggedMatrix);
    }
    if k > 1 && samples.iter().all(|s| s == &samples[0]) {
        return Err(BowErr::DegenerateSamples);
    }

    let mut best: Option<Clustering> = None;
    for attempt in 0..criteria.attempts.max(1) {
        let clustering = lloyd(samples, k, criteria, rng);
        info!(
            "KMeans attempt {} with {} samples: compactness {}",
            attempt,
            samples.len(),
            clustering.compactness
        );
        match &best {
            Some(b) if b.compactness <= clustering.compactness => {}
            _ => best = Some(clustering),
        }
    }
    best.ok_or(BowErr::DegenerateSamples)
}

fn lloyd<R: Rng>(
    samples: &[Vec<f64>],
    k: usize,
    criteria: &KMeansCriteria,
    rng: &mut R,
) -> Clustering {
    let dim = samples[0].len();
    let mut centers: Vec<Vec<f64>> = index::sample(rng, samples.len(), k)
        .into_iter()
        .map(|i| samples[i].clone())
        .collect();
    let eps2 = criteria.epsilon * criteria.epsilon;

    for iteration in 0..criteria.max_iterations {
        let mut labels = assign(samples, &centers);

        // update centers
        let mut sums = vec![vec![0.; dim]; k];
        let mut counts = vec![0usize; k];
        for (s, &l) in samples.iter().zip(&labels) {
            counts[l] += 1;
            for (a, b) in sums[l].iter_mut().zip(s) {
                *a += b;
            }
        }
        let mut new_centers: Vec<Vec<f64>> = sums
            .iter()
            .zip(&counts)
            .zip(&centers)
            .map(|((sum, &n), old)| match n {
                0 => old.clone(),
                _ => sum.iter().map(|v| v / n as f64).collect(),
            })
            .collect();

        // reseed empty clusters with the sample farthest from its center
        for c in 0..k {
            if counts[c] > 0 {
                continue;
            }
            let farthest = samples
                .iter()
                .enumerate()
                .filter(|&(i, _)| counts[labels[i]] > 1)
                .map(|(i, s)| (i, squared_distance(s, &new_centers[labels[i]])))
                .fold(None, |acc: Option<(usize, f64)>, (i, d)| match acc {
                    Some((_, bd)) if bd >= d => acc,
                    _ => Some((i, d)),
                });
            if let Some((i, _)) = farthest {
                let old = labels[i];
                counts[old] -= 1;
                for (a, b) in sums[old].iter_mut().zip(&samples[i]) {
                    *a -= b;
                }
                new_centers[old] = sums[old].iter().map(|v| v / counts[old] as f64).collect();
                new_centers[c] = samples[i].clone();
                counts[c] = 1;
                sums[c] = samples[i].clone();
                labels[i] = c;
            }
        }

        let shift = centers
            .iter()
            .zip(&new_centers)
            .map(|(a, b)| squared_distance(a, b))
            .fold(0., f64::max);
        centers = new_centers;
        debug!("KMeans iteration {}: max center shift {}", iteration, shift.sqrt());
        if shift <= eps2 {
            break;
        }
    }

    let assignments: Vec<(usize, f64)> = samples
        .par_iter()
        .map(|s| nearest_center(s, &centers))
        .collect();
    Clustering {
        compactness: assignments.iter().map(|a| a.1).sum(),
        labels: assignments.into_iter().map(|a| a.0).collect(),
        centers,
    }
}

fn assign(samples: &[Vec<f64>], centers: &[Vec<f64>]) -> Vec<usize> {
    samples
        .par_iter()
        .map(|s| nearest_center(s, centers).0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn two_blobs() -> Vec<Vec<f64>> {
        let mut samples = Vec::new();
        for i in 0..20 {
            let d = (i % 5) as f64 * 0.1;
            samples.push(vec![d, -d]);
            samples.push(vec![10. + d, 10. - d]);
        }
        samples
    }

    #[test]
    fn test_nearest_center_ties() {
        let centers = vec![vec![1., 0.], vec![-1., 0.], vec![1., 0.]];
        assert_eq!(nearest_center(&[0., 0.], &centers).0, 0);
        assert_eq!(nearest_center(&[1., 0.], &centers), (0, 0.));
        assert_eq!(nearest_center(&[-0.9, 0.], &centers).0, 1);
    }

    #[test]
    fn test_two_blobs() {
        let samples = two_blobs();
        let mut rng = StdRng::seed_from_u64(7);
        let result = kmeans(&samples, 2, &KMeansCriteria::default(), &mut rng).unwrap();

        assert_eq!(result.centers.len(), 2);
        assert_eq!(result.labels.len(), samples.len());
        for pair in result.labels.chunks(2) {
            assert_ne!(pair[0], pair[1]);
        }
        let low = &result.centers[result.labels[0]];
        let high = &result.centers[result.labels[1]];
        assert_abs_diff_eq!(low[0], 0.2, epsilon = 1e-9);
        assert_abs_diff_eq!(high[1], 9.8, epsilon = 1e-9);
        assert!(result.compactness > 0.);
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let samples = two_blobs();
        let criteria = KMeansCriteria::default();
        let a = kmeans(&samples, 3, &criteria, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = kmeans(&samples, 3, &criteria, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_cluster_is_mean() {
        let samples = vec![vec![0., 2.], vec![2., 4.], vec![4., 0.]];
        let mut rng = StdRng::seed_from_u64(1);
        let result = kmeans(&samples, 1, &KMeansCriteria::default(), &mut rng).unwrap();
        assert_abs_diff_eq!(result.centers[0][0], 2., epsilon = 1e-12);
        assert_abs_diff_eq!(result.centers[0][1], 2., epsilon = 1e-12);
        assert_eq!(result.labels, vec![0, 0, 0]);

        let flat = vec![vec![5.; 3]; 4];
        let result = kmeans(&flat, 1, &KMeansCriteria::default(), &mut rng).unwrap();
        assert_eq!(result.centers, vec![vec![5.; 3]]);
        assert_eq!(result.compactness, 0.);
    }

    #[test]
    fn test_errors() {
        let mut rng = StdRng::seed_from_u64(0);
        let criteria = KMeansCriteria::default();
        let samples = two_blobs();
        assert!(matches!(
            kmeans(&samples, 0, &criteria, &mut rng),
            Err(BowErr::InvalidParameter(_))
        ));
        assert!(matches!(
            kmeans(&samples[..3], 4, &criteria, &mut rng),
            Err(BowErr::InvalidParameter(_))
        ));
        assert!(matches!(
            kmeans(&vec![vec![1., 1.]; 10], 2, &criteria, &mut rng),
            Err(BowErr::DegenerateSamples)
        ));
        assert!(matches!(
            kmeans(&[vec![1.], vec![1., 2.]], 1, &criteria, &mut rng),
            Err(BowErr::RaggedMatrix)
        ));
    }
}
